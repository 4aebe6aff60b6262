use std::time::Duration;

use thiserror::Error;

use crate::state_machine::InvalidTransition;

/// Everything that can end a submission or a render job.
///
/// `Validation`, `QueueFull` and `QueueClosed` are returned synchronously from
/// `submit`; the rest are produced inside the job pipeline and end up as the
/// error message of a failed [`JobResult`](crate::state_machine::JobResult).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Queue is full ({depth} jobs waiting)")]
    QueueFull { depth: usize },

    #[error("Render queue is closed")]
    QueueClosed,

    #[error("No Scene class found in the provided code")]
    NoEntryPointFound,

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Render failed (exit code {exit_code}): {output}")]
    RenderFailed { exit_code: i32, output: String },

    #[error("Render timed out after {limit:?}")]
    RenderTimedOut { limit: Duration },

    #[error("Render completed but no video file was found")]
    ArtifactMissing,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the container runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to launch `{cli}`: {source}")]
    Spawn {
        cli: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("exec timed out after {0:?}")]
    Timeout(Duration),

    #[error("no sandbox is running")]
    NotRunning,
}

/// Falhas na entrega do webhook de conclusão.
///
/// Nenhuma delas altera o status do job: quando o notificador roda, o
/// resultado já foi gravado no [`StatusStore`](crate::store::StatusStore).
#[derive(Debug, Error)]
pub enum NotifyError {
    /// `WEBHOOK_API_KEY` ausente: nenhuma tentativa é feita.
    #[error("webhook API key is not configured")]
    MissingCredential,

    /// O backend respondeu com um status fora da faixa 2xx.
    #[error("backend returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Falha de rede (DNS, conexão recusada, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Todas as tentativas falharam; o evento é descartado.
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Failures of the storage collaborator.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Faults in the worker loop's own control flow. These are fatal: once the
/// loop stops nothing else drains the queue.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("status store rejected transition: {0}")]
    Transition(#[from] InvalidTransition),

    #[error("worker task crashed: {0}")]
    Crashed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failed_display_carries_output() {
        let err = RenderError::RenderFailed {
            exit_code: 1,
            output: "NameError: name 'Circl' is not defined".into(),
        };
        assert_eq!(
            err.to_string(),
            "Render failed (exit code 1): NameError: name 'Circl' is not defined"
        );
    }

    #[test]
    fn render_timeout_keeps_sub_second_limits() {
        let err = RenderError::RenderTimedOut {
            limit: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "Render timed out after 50ms");
    }

    #[test]
    fn notify_exhausted_display() {
        let err = NotifyError::Exhausted { attempts: 3 };
        assert_eq!(err.to_string(), "gave up after 3 attempts");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderError>();
        assert_send_sync::<SandboxError>();
        assert_send_sync::<NotifyError>();
        assert_send_sync::<WorkerError>();
    }
}
