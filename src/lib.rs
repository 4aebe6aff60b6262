//! renderq: a single-worker render queue.
//!
//! Submissions go into a FIFO drained by one background worker. The worker
//! renders each script inside a persistent container sandbox, moves the
//! artifact to durable storage, records the outcome in the [`StatusStore`]
//! and fires a completion webhook without waiting for it.

pub mod config;
pub mod error;
pub mod notifier;
pub mod processor;
pub mod queue;
pub mod resolver;
pub mod sandbox;
pub mod script;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod upload;
pub mod worker;

pub use error::RenderError;
pub use service::{HealthReport, RenderService, WorkerHandle};
pub use store::{StatusReport, StatusStore};
