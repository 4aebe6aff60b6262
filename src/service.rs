//! The pipeline as seen by a front door: submit, query, health, shutdown.

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::QueueConfig;
use crate::error::{RenderError, WorkerError};
use crate::notifier::Notifier;
use crate::processor::JobProcessor;
use crate::queue::{self, RenderQueue, Submission};
use crate::sandbox::{SandboxRuntime, SandboxSnapshot};
use crate::state_machine::{Job, JobConfig, JobStatus, RenderRequest};
use crate::store::{StatusReport, StatusStore};
use crate::upload::Uploader;
use crate::worker::Worker;

/// Snapshot answered by `health()`; never touches the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub queue_size: usize,
    pub tool_version: String,
    pub sandbox_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_error: Option<String>,
    pub active_jobs: usize,
}

/// The spawned worker loop. If it finishes while the service is still
/// accepting jobs, nothing will drain the queue any more.
pub struct WorkerHandle(JoinHandle<Result<(), WorkerError>>);

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    pub async fn join(self) -> Result<(), WorkerError> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => Err(WorkerError::Crashed(e.to_string())),
        }
    }
}

pub struct RenderService {
    queue: RenderQueue,
    store: StatusStore,
    notifier: Notifier,
    sandbox: watch::Receiver<SandboxSnapshot>,
}

impl RenderService {
    /// Spawn the worker loop and return the submission side.
    pub fn start<R, U>(
        processor: JobProcessor<R, U>,
        notifier: Notifier,
        config: QueueConfig,
    ) -> (Self, WorkerHandle)
    where
        R: SandboxRuntime,
        U: Uploader,
    {
        let store = StatusStore::new();
        let (queue, receiver) = queue::channel(store.clone(), config);
        let sandbox = processor.subscribe();
        let worker = Worker::new(receiver, processor, store.clone(), notifier.clone());
        let handle = tokio::spawn(worker.run());

        (
            Self {
                queue,
                store,
                notifier,
                sandbox,
            },
            WorkerHandle(handle),
        )
    }

    pub fn submit(
        &self,
        job_id: impl Into<String>,
        script: impl Into<String>,
        config: JobConfig,
    ) -> Result<Submission, RenderError> {
        self.queue.submit(Job::new(job_id, script, config))
    }

    pub fn submit_request(&self, request: RenderRequest) -> Result<Submission, RenderError> {
        self.queue.submit(request.into())
    }

    pub fn status(&self, job_id: &str) -> StatusReport {
        self.store.get(job_id)
    }

    pub fn health(&self) -> HealthReport {
        let sandbox = self.sandbox.borrow().clone();
        HealthReport {
            status: "healthy",
            service: "renderq",
            queue_size: self.queue.depth(),
            tool_version: sandbox.tool_version,
            sandbox_ready: sandbox.ready,
            sandbox_error: sandbox.last_error,
            active_jobs: self.store.count(JobStatus::Processing),
        }
    }

    /// Resolves once the first sandbox start has succeeded or failed, and
    /// says which.
    pub async fn sandbox_ready(&mut self) -> bool {
        self.sandbox
            .wait_for(SandboxSnapshot::settled)
            .await
            .is_ok_and(|s| s.ready)
    }

    /// Close the queue, let the worker finish what was accepted, then wait
    /// for pending notifications.
    pub async fn shutdown(self, worker: WorkerHandle) -> Result<(), WorkerError> {
        let Self {
            queue, notifier, ..
        } = self;
        drop(queue);
        let outcome = worker.join().await;
        notifier.drain().await;
        info!("render service shut down");
        outcome
    }
}
