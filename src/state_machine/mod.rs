mod job;
mod state;

pub use job::{Job, JobConfig, JobResult, JobStatus, Quality, RenderRequest};
pub use state::{InvalidTransition, StateMachine};
