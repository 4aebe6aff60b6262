//! Single-consumer FIFO of accepted jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::QueueConfig;
use crate::error::RenderError;
use crate::state_machine::Job;
use crate::store::StatusStore;

/// Returned by [`RenderQueue::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_uuid: String,
    pub queue_position: usize,
    /// Advisory only.
    pub estimated_wait_secs: u64,
}

/// Submission side of the queue. Dropping it closes the queue; the worker
/// drains what is left and exits.
#[derive(Debug)]
pub struct RenderQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
    store: StatusStore,
    config: QueueConfig,
}

/// Consumer side, owned by the worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
}

pub fn channel(store: StatusStore, config: QueueConfig) -> (RenderQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        RenderQueue {
            tx,
            depth: depth.clone(),
            store,
            config,
        },
        JobReceiver { rx, depth },
    )
}

/// Job ids become file names inside the sandbox mounts.
fn validate(job: &Job) -> Result<(), RenderError> {
    if job.id.trim().is_empty() {
        return Err(RenderError::Validation("job_uuid is required".into()));
    }
    if !job
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RenderError::Validation(format!(
            "job_uuid {:?} may only contain ASCII letters, digits, '-' and '_'",
            job.id
        )));
    }
    if job.script.trim().is_empty() {
        return Err(RenderError::Validation("code is required".into()));
    }
    Ok(())
}

impl RenderQueue {
    /// Accept a job: validate, record `queued`, append to the queue.
    ///
    /// Nothing is recorded for a rejected submission.
    pub fn submit(&self, job: Job) -> Result<Submission, RenderError> {
        validate(&job)?;
        let position = self.reserve_slot()?;

        if let Err(e) = self.store.insert_queued(&job.id) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        let job_id = job.id.clone();
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            self.store.discard_queued(&job_id);
            return Err(RenderError::QueueClosed);
        }

        info!(job_id = %job_id, position, "queued job");
        Ok(Submission {
            job_uuid: job_id,
            queue_position: position,
            estimated_wait_secs: position as u64 * self.config.seconds_per_job,
        })
    }

    // Claims a place in the queue, honouring `max_depth` when set.
    fn reserve_slot(&self) -> Result<usize, RenderError> {
        let max = self.config.max_depth;
        self.depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| match max {
                Some(max) if depth >= max => None,
                _ => Some(depth + 1),
            })
            .map(|previous| previous + 1)
            .map_err(|depth| RenderError::QueueFull { depth })
    }

    /// Jobs accepted but not yet picked up by the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl JobReceiver {
    /// Wait for the next job. `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<Job> {
        let job = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }
}
