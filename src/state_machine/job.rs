use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse render quality requested by the caller.
///
/// Unknown or missing values deserialize to `Medium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// The rendering tool's command-line flag for this tier.
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Low => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
        }
    }
}

impl From<Option<String>> for Quality {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("low") => Quality::Low,
            Some(v) if v.eq_ignore_ascii_case("high") => Quality::High,
            _ => Quality::Medium,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Low => write!(f, "low"),
            Quality::Medium => write!(f, "medium"),
            Quality::High => write!(f, "high"),
        }
    }
}

/// Per-job render options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub quality: Quality,
}

/// A single render request. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub script: String,
    pub config: JobConfig,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, script: impl Into<String>, config: JobConfig) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            config,
            submitted_at: Utc::now(),
        }
    }
}

/// Submission as it arrives over the wire: `{job_uuid, code, config}`.
///
/// Missing fields deserialize to empty strings so that validation, not
/// parsing, decides whether the submission is acceptable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub job_uuid: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub config: Option<JobConfig>,
}

impl From<RenderRequest> for Job {
    fn from(req: RenderRequest) -> Self {
        Job::new(req.job_uuid, req.code, req.config.unwrap_or_default())
    }
}

/// Lifecycle status of a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of a job.
///
/// Built only through [`JobResult::completed`] and [`JobResult::failed`], so a
/// successful result always carries a URL and a failed one always carries a
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    success: bool,
    video_url: Option<String>,
    file_size: u64,
    error: Option<String>,
}

impl JobResult {
    pub fn completed(video_url: impl Into<String>, file_size: u64) -> Self {
        Self {
            success: true,
            video_url: Some(video_url.into()),
            file_size,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            video_url: None,
            file_size: 0,
            error: Some(if error.is_empty() {
                "Unknown error".to_string()
            } else {
                error
            }),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The terminal status this result puts a job into.
    pub fn status(&self) -> JobStatus {
        if self.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_flags() {
        assert_eq!(Quality::Low.flag(), "-ql");
        assert_eq!(Quality::Medium.flag(), "-qm");
        assert_eq!(Quality::High.flag(), "-qh");
    }

    #[test]
    fn unknown_quality_defaults_to_medium() {
        let cfg: JobConfig = serde_json::from_str(r#"{"quality": "ultra"}"#).unwrap();
        assert_eq!(cfg.quality, Quality::Medium);

        let cfg: JobConfig = serde_json::from_str(r#"{"quality": null}"#).unwrap();
        assert_eq!(cfg.quality, Quality::Medium);

        let cfg: JobConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.quality, Quality::Medium);

        let cfg: JobConfig = serde_json::from_str(r#"{"quality": "HIGH"}"#).unwrap();
        assert_eq!(cfg.quality, Quality::High);
    }

    #[test]
    fn request_with_missing_fields_still_parses() {
        let req: RenderRequest = serde_json::from_str(r#"{"code": "x = 1"}"#).unwrap();
        let job = Job::from(req);
        assert!(job.id.is_empty());
        assert_eq!(job.script, "x = 1");
        assert_eq!(job.config.quality, Quality::Medium);
    }

    #[test]
    fn request_carries_quality() {
        let req: RenderRequest = serde_json::from_str(
            r#"{"job_uuid": "abc", "code": "c", "config": {"quality": "low"}}"#,
        )
        .unwrap();
        let job = Job::from(req);
        assert_eq!(job.id, "abc");
        assert_eq!(job.config.quality, Quality::Low);
    }

    #[test]
    fn result_invariants() {
        let ok = JobResult::completed("https://cdn/videos/a.mp4", 42);
        assert!(ok.success());
        assert_eq!(ok.video_url(), Some("https://cdn/videos/a.mp4"));
        assert_eq!(ok.file_size(), 42);
        assert!(ok.error().is_none());
        assert_eq!(ok.status(), JobStatus::Completed);

        let failed = JobResult::failed("");
        assert!(!failed.success());
        assert_eq!(failed.error(), Some("Unknown error"));
        assert!(failed.video_url().is_none());
        assert_eq!(failed.file_size(), 0);
        assert_eq!(failed.status(), JobStatus::Failed);
    }

    #[test]
    fn result_serializes_every_field() {
        let json = serde_json::to_value(JobResult::failed("boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "video_url": null,
                "file_size": 0,
                "error": "boom"
            })
        );
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            r#""completed""#
        );
    }
}
