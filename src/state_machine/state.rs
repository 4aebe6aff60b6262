use thiserror::Error;

use super::job::JobStatus;

/// A status change the lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal status transition for job {job_id}: {} -> {to}", describe(.from))]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: Option<JobStatus>,
    pub to: JobStatus,
}

fn describe(from: &Option<JobStatus>) -> String {
    from.map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Guards the per-job lifecycle.
///
/// Every job flows through: (unknown) → QUEUED → PROCESSING → COMPLETED | FAILED
///
/// Nothing moves backward, and terminal states are final. A failed render is
/// never re-queued.
pub struct StateMachine;

impl StateMachine {
    /// Whether `from -> to` is a legal step. `None` means the job is not known
    /// to the store yet.
    pub fn allows(from: Option<JobStatus>, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (None, JobStatus::Queued)
                | (Some(JobStatus::Queued), JobStatus::Processing)
                | (Some(JobStatus::Processing), JobStatus::Completed)
                | (Some(JobStatus::Processing), JobStatus::Failed)
        )
    }

    /// Validate a transition, returning the new status on success.
    pub fn next(
        job_id: &str,
        from: Option<JobStatus>,
        to: JobStatus,
    ) -> Result<JobStatus, InvalidTransition> {
        if Self::allows(from, to) {
            Ok(to)
        } else {
            Err(InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to,
            })
        }
    }
}
