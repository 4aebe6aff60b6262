//! Completion webhooks.
//!
//! [`Notifier::notify`] hands each terminal result to its own task and
//! returns immediately, so a slow or failing backend never delays the worker.
//! Delivery is at-least-once from the backend's point of view: a request that
//! times out after the backend processed it will be sent again.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::error::NotifyError;
use crate::state_machine::{JobResult, JobStatus};

/// Body POSTed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub job_uuid: String,
    pub status: JobStatus,
    pub video_url: Option<String>,
    pub file_size: u64,
    pub error_message: Option<String>,
}

impl NotificationPayload {
    pub fn new(job_id: &str, result: &JobResult) -> Self {
        Self {
            job_uuid: job_id.to_string(),
            status: result.status(),
            video_url: result.video_url().map(str::to_string),
            file_size: result.file_size(),
            error_message: result.error().map(str::to_string),
        }
    }
}

/// Upper bound on configured attempts.
const MAX_ATTEMPTS: u32 = 10;

/// Retry behavior for webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based):
    /// base_delay * 2^(attempt - 1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Every wait a fully failing delivery goes through. There is no wait
    /// after the last attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    tasks: TaskTracker,
}

impl Notifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            api_key: Some(config.api_key.clone()).filter(|k| !k.is_empty()),
            policy: RetryPolicy {
                max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS),
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
            tasks: TaskTracker::new(),
        })
    }

    /// Schedule delivery of `result` and return at once. Returns `false` when
    /// no delivery was scheduled because the API key is missing.
    pub fn notify(&self, job_id: &str, result: &JobResult) -> bool {
        if self.api_key.is_none() {
            warn!(job_id, "WEBHOOK_API_KEY not configured, skipping notification");
            return false;
        }
        let payload = NotificationPayload::new(job_id, result);
        let notifier = self.clone();
        self.tasks.spawn(async move {
            if let Err(e) = notifier.deliver(&payload).await {
                error!(job_id = %payload.job_uuid, error = %e, "giving up notifying backend");
            }
        });
        true
    }

    /// Deliver `payload`, retrying with exponential backoff. Returns the
    /// number of attempts it took.
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<u32, NotifyError> {
        let Some(api_key) = &self.api_key else {
            return Err(NotifyError::MissingCredential);
        };

        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match self.send(api_key, payload).await {
                Ok(()) => {
                    info!(job_id = %payload.job_uuid, attempt, "notified backend");
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(job_id = %payload.job_uuid, attempt, max = attempts, error = %e, "notification attempt failed");
                }
            }
            if attempt < attempts {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }
        Err(NotifyError::Exhausted { attempts })
    }

    async fn send(&self, api_key: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Webhook-Key", api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Stop accepting deliveries and wait for the ones in flight.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, api_key: &str) -> WebhookConfig {
        WebhookConfig {
            backend_url: server.uri(),
            api_key: api_key.to_string(),
            base_delay_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn payload_for_success_has_no_error() {
        let p = NotificationPayload::new("a", &JobResult::completed("https://x/a.mp4", 7));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["job_uuid"], "a");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["video_url"], "https://x/a.mp4");
        assert_eq!(json["file_size"], 7);
        assert!(json["error_message"].is_null());
    }

    #[test]
    fn payload_for_failure_carries_message() {
        let p = NotificationPayload::new("b", &JobResult::failed("Render failed"));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["video_url"].is_null());
        assert_eq!(json["file_size"], 0);
        assert_eq!(json["error_message"], "Render failed");
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(40), policy.delay_after(33));
        assert!(policy.delay_after(40) > policy.delay_after(10));
    }

    #[test]
    fn configured_attempts_are_clamped() {
        let notifier = Notifier::new(&WebhookConfig {
            max_attempts: 1000,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(notifier.policy.max_attempts, MAX_ATTEMPTS);

        let notifier = Notifier::new(&WebhookConfig {
            max_attempts: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(notifier.policy.max_attempts, 1);
    }

    #[test]
    fn default_schedule_is_strictly_increasing() {
        let schedule = RetryPolicy::default().schedule();
        assert_eq!(
            schedule,
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn delivers_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhooks/job-completion"))
            .and(header("X-Webhook-Key", "secret"))
            .and(body_json(serde_json::json!({
                "job_uuid": "a",
                "status": "completed",
                "video_url": "https://x/a.mp4",
                "file_size": 7,
                "error_message": null
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server, "secret")).unwrap();
        let payload = NotificationPayload::new("a", &JobResult::completed("https://x/a.mp4", 7));
        assert_eq!(notifier.deliver(&payload).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server, "secret")).unwrap();
        let payload = NotificationPayload::new("a", &JobResult::failed("x"));
        assert_eq!(notifier.deliver(&payload).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server, "secret")).unwrap();
        let payload = NotificationPayload::new("a", &JobResult::failed("x"));

        let started = Instant::now();
        let err = notifier.deliver(&payload).await.unwrap_err();

        assert!(matches!(err, NotifyError::Exhausted { attempts: 3 }));
        // 10ms + 20ms of backoff, nothing after the last attempt.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn missing_key_makes_no_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server, "")).unwrap();
        assert!(!notifier.notify("a", &JobResult::failed("x")));
        notifier.drain().await;

        let payload = NotificationPayload::new("a", &JobResult::failed("x"));
        assert!(matches!(
            notifier.deliver(&payload).await,
            Err(NotifyError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn notify_runs_in_background() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server, "secret")).unwrap();
        let started = Instant::now();
        assert!(notifier.notify("a", &JobResult::completed("u", 1)));
        assert!(started.elapsed() < Duration::from_millis(200));

        notifier.drain().await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_is_absorbed() {
        let cfg = WebhookConfig {
            backend_url: "http://127.0.0.1:9".to_string(),
            api_key: "secret".to_string(),
            base_delay_ms: 1,
            request_timeout_secs: 1,
            ..Default::default()
        };
        let notifier = Notifier::new(&cfg).unwrap();
        assert!(notifier.notify("a", &JobResult::failed("x")));
        notifier.drain().await;
    }
}
