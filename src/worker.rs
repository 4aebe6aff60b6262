use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::notifier::Notifier;
use crate::processor::JobProcessor;
use crate::queue::JobReceiver;
use crate::sandbox::SandboxRuntime;
use crate::state_machine::{Job, JobResult};
use crate::store::StatusStore;
use crate::upload::Uploader;

/// The single consumer of the render queue.
///
/// Jobs run strictly one at a time because the sandbox is one shared,
/// stateful container. A job that errors or panics becomes a failed result;
/// only a fault in the loop itself ends [`Worker::run`] with an error.
pub struct Worker<R, U> {
    receiver: JobReceiver,
    processor: JobProcessor<R, U>,
    store: StatusStore,
    notifier: Notifier,
}

impl<R: SandboxRuntime, U: Uploader> Worker<R, U> {
    pub fn new(
        receiver: JobReceiver,
        processor: JobProcessor<R, U>,
        store: StatusStore,
        notifier: Notifier,
    ) -> Self {
        Self {
            receiver,
            processor,
            store,
            notifier,
        }
    }

    /// Drain the queue until it is closed, then stop the sandbox.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        info!("render worker started");
        self.processor.warm_up().await;

        let outcome = self.drain().await;

        self.processor.shutdown().await;
        info!("render worker stopped");
        outcome
    }

    async fn drain(&mut self) -> Result<(), WorkerError> {
        while let Some(job) = self.receiver.recv().await {
            self.handle(job).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, job: Job) -> Result<(), WorkerError> {
        self.store.mark_processing(&job.id)?;
        info!(job_id = %job.id, "processing job");
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.processor.process(&job))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => JobResult::failed(e.to_string()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %job.id, %message, "job panicked");
                JobResult::failed(format!("Exception: {message}"))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result.error() {
            None => info!(job_id = %job.id, elapsed_ms, "job completed"),
            Some(e) => warn!(job_id = %job.id, elapsed_ms, error = %e, "job failed"),
        }

        self.store.finish(&job.id, result.clone())?;
        self.notifier.notify(&job.id, &result);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
