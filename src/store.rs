//! In-memory job status store.
//!
//! [`StatusStore`] is a cheap-to-clone handle over a shared map from job id to
//! the job's current [`JobStatus`] and, once terminal, its [`JobResult`]. The
//! queue records `queued`; the worker records `processing` and the terminal
//! status. Readers never mutate. Every write goes through the
//! [`StateMachine`], so no status ever moves backward.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RenderError;
use crate::state_machine::{InvalidTransition, JobResult, JobStatus, StateMachine};

/// Status as answered to a query. `NotFound` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl From<JobStatus> for ReportedStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => ReportedStatus::Queued,
            JobStatus::Processing => ReportedStatus::Processing,
            JobStatus::Completed => ReportedStatus::Completed,
            JobStatus::Failed => ReportedStatus::Failed,
        }
    }
}

impl fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedStatus::Queued => write!(f, "queued"),
            ReportedStatus::Processing => write!(f, "processing"),
            ReportedStatus::Completed => write!(f, "completed"),
            ReportedStatus::Failed => write!(f, "failed"),
            ReportedStatus::NotFound => write!(f, "not_found"),
        }
    }
}

/// Answer to `status(job_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub job_uuid: String,
    pub status: ReportedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ReportedStatus::Completed | ReportedStatus::Failed
        )
    }
}

#[derive(Debug, Clone)]
struct Entry {
    status: JobStatus,
    history: Vec<JobStatus>,
    result: Option<JobResult>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning only means another thread panicked mid-write; every write
    // below is a single map operation, so the data is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a newly accepted job. Identifiers are unique: a second
    /// submission with a known id is rejected.
    pub fn insert_queued(&self, job_id: &str) -> Result<(), RenderError> {
        let mut map = self.write();
        if let Some(existing) = map.get(job_id) {
            return Err(RenderError::Validation(format!(
                "job {job_id} already exists with status {}",
                existing.status
            )));
        }
        let status = StateMachine::next(job_id, None, JobStatus::Queued)
            .map_err(|e| RenderError::Validation(e.to_string()))?;
        map.insert(
            job_id.to_string(),
            Entry {
                status,
                history: vec![status],
                result: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Drop a queued record whose enqueue never happened.
    pub(crate) fn discard_queued(&self, job_id: &str) {
        let mut map = self.write();
        if map
            .get(job_id)
            .is_some_and(|e| e.status == JobStatus::Queued)
        {
            map.remove(job_id);
        }
    }

    pub fn mark_processing(&self, job_id: &str) -> Result<(), InvalidTransition> {
        self.advance(job_id, JobStatus::Processing, None).map(|_| ())
    }

    /// Store the terminal result. Returns the terminal status it implies.
    pub fn finish(&self, job_id: &str, result: JobResult) -> Result<JobStatus, InvalidTransition> {
        let status = result.status();
        self.advance(job_id, status, Some(result))
    }

    fn advance(
        &self,
        job_id: &str,
        to: JobStatus,
        result: Option<JobResult>,
    ) -> Result<JobStatus, InvalidTransition> {
        let mut map = self.write();
        let from = map.get(job_id).map(|e| e.status);
        let next = StateMachine::next(job_id, from, to)?;
        if let Some(entry) = map.get_mut(job_id) {
            entry.status = next;
            entry.history.push(next);
            entry.result = result;
            entry.updated_at = Utc::now();
        }
        Ok(next)
    }

    /// Current status of a job. Unknown ids answer `not_found`.
    pub fn get(&self, job_id: &str) -> StatusReport {
        match self.read().get(job_id) {
            Some(entry) => StatusReport {
                job_uuid: job_id.to_string(),
                status: entry.status.into(),
                result: entry.result.clone(),
                updated_at: Some(entry.updated_at),
            },
            None => StatusReport {
                job_uuid: job_id.to_string(),
                status: ReportedStatus::NotFound,
                result: None,
                updated_at: None,
            },
        }
    }

    /// Every status the job has held, oldest first.
    pub fn history(&self, job_id: &str) -> Vec<JobStatus> {
        self.read()
            .get(job_id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.read().values().filter(|e| e.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_id_is_not_found() {
        let store = StatusStore::new();
        let report = store.get("missing");
        assert_eq!(report.status, ReportedStatus::NotFound);
        assert!(report.result.is_none());
        assert!(!report.is_terminal());
    }

    #[test]
    fn full_lifecycle_is_recorded() {
        let store = StatusStore::new();
        store.insert_queued("a").unwrap();
        assert_eq!(store.get("a").status, ReportedStatus::Queued);

        store.mark_processing("a").unwrap();
        assert_eq!(store.count(JobStatus::Processing), 1);

        let status = store
            .finish("a", JobResult::completed("https://x/a.mp4", 10))
            .unwrap();
        assert_eq!(status, JobStatus::Completed);

        let report = store.get("a");
        assert_eq!(report.status, ReportedStatus::Completed);
        assert_eq!(report.result.unwrap().file_size(), 10);
        assert_eq!(
            store.history("a"),
            vec![
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Completed
            ]
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = StatusStore::new();
        store.insert_queued("a").unwrap();
        let err = store.insert_queued("a").unwrap_err();
        assert!(matches!(err, RenderError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn finish_without_processing_is_rejected() {
        let store = StatusStore::new();
        store.insert_queued("a").unwrap();
        let err = store.finish("a", JobResult::failed("boom")).unwrap_err();
        assert_eq!(err.from, Some(JobStatus::Queued));
        assert_eq!(store.get("a").status, ReportedStatus::Queued);
    }

    #[test]
    fn unknown_job_cannot_be_advanced() {
        let store = StatusStore::new();
        assert!(store.mark_processing("ghost").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn discard_only_touches_queued_records() {
        let store = StatusStore::new();
        store.insert_queued("a").unwrap();
        store.mark_processing("a").unwrap();
        store.discard_queued("a");
        assert_eq!(store.get("a").status, ReportedStatus::Processing);

        store.insert_queued("b").unwrap();
        store.discard_queued("b");
        assert_eq!(store.get("b").status, ReportedStatus::NotFound);
    }

    #[test]
    fn report_serializes_with_snake_case_status() {
        let store = StatusStore::new();
        let json = serde_json::to_value(store.get("nope")).unwrap();
        assert_eq!(json["status"], "not_found");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn concurrent_readers_see_consistent_state() {
        let store = StatusStore::new();
        store.insert_queued("a").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let status = store.get("a").status;
                        assert_ne!(status, ReportedStatus::NotFound);
                    }
                })
            })
            .collect();
        store.mark_processing("a").unwrap();
        store.finish("a", JobResult::failed("x")).unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("a").status, ReportedStatus::Failed);
    }
}
