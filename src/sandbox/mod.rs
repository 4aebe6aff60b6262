//! Persistent execution sandbox.
//!
//! The [`SandboxManager`] owns exactly one long-lived container, started once
//! and reused for every job because creating one per render is expensive. The
//! container runtime itself sits behind [`SandboxRuntime`] so the manager's
//! health-check-then-invoke policy can be exercised without Docker.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SandboxError;

pub use docker::DockerRuntime;

/// Identity of a running sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

impl SandboxHandle {
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }
}

/// Exit code and combined stdout/stderr of one command run in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

/// A host directory bound read-write into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// How to start the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub image: String,
    /// Rendering tool binary inside the image.
    pub tool: String,
    pub input: Mount,
    pub output: Mount,
}

/// Container backend driven by the manager.
pub trait SandboxRuntime: Send + Sync + 'static {
    fn start(
        &self,
        spec: &SandboxSpec,
    ) -> impl Future<Output = Result<SandboxHandle, SandboxError>> + Send;

    fn is_running(
        &self,
        handle: &SandboxHandle,
    ) -> impl Future<Output = Result<bool, SandboxError>> + Send;

    fn exec(
        &self,
        handle: &SandboxHandle,
        command: &[String],
    ) -> impl Future<Output = Result<ExecOutput, SandboxError>> + Send;

    /// Must tolerate a sandbox that is already gone.
    fn stop(&self, handle: &SandboxHandle) -> impl Future<Output = Result<(), SandboxError>> + Send;

    fn pull(&self, _image: &str) -> impl Future<Output = Result<(), SandboxError>> + Send {
        async { Ok(()) }
    }
}

/// What the health path may know about the sandbox without touching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxSnapshot {
    pub ready: bool,
    pub container_id: Option<String>,
    pub tool_version: String,
    /// Why the most recent start attempt failed. Cleared by a successful start.
    pub last_error: Option<String>,
}

impl SandboxSnapshot {
    /// A start has been attempted and has either succeeded or failed.
    pub fn settled(&self) -> bool {
        self.ready || self.last_error.is_some()
    }
}

impl Default for SandboxSnapshot {
    fn default() -> Self {
        Self {
            ready: false,
            container_id: None,
            tool_version: UNAVAILABLE.to_string(),
            last_error: None,
        }
    }
}

const UNAVAILABLE: &str = "Container not available";
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub pull_image: bool,
    pub exec_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            pull_image: true,
            exec_timeout: Duration::from_secs(600),
        }
    }
}

pub struct SandboxManager<R> {
    runtime: R,
    spec: SandboxSpec,
    settings: ManagerSettings,
    handle: Option<SandboxHandle>,
    pulled: bool,
    state: watch::Sender<SandboxSnapshot>,
}

impl<R: SandboxRuntime> SandboxManager<R> {
    pub fn new(runtime: R, spec: SandboxSpec, settings: ManagerSettings) -> Self {
        let (state, _) = watch::channel(SandboxSnapshot::default());
        Self {
            runtime,
            spec,
            settings,
            handle: None,
            pulled: false,
            state,
        }
    }

    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    /// Live view of the sandbox for health reporting.
    pub fn subscribe(&self) -> watch::Receiver<SandboxSnapshot> {
        self.state.subscribe()
    }

    /// Make sure a sandbox is running, replacing a dead one.
    ///
    /// A failed start leaves no handle behind; the caller fails its job and
    /// the next call tries again.
    pub async fn ensure_running(&mut self) -> Result<(), SandboxError> {
        if let Some(handle) = self.handle.clone() {
            match self.runtime.is_running(&handle).await {
                Ok(true) => return Ok(()),
                Ok(false) => warn!(container = %handle.name, "sandbox stopped, restarting"),
                Err(e) => warn!(container = %handle.name, error = %e, "sandbox health check failed, restarting"),
            }
            self.handle = None;
            if let Err(e) = self.runtime.stop(&handle).await {
                debug!(container = %handle.name, error = %e, "discarding stale sandbox");
            }
            self.publish_stopped();
        }

        if self.settings.pull_image && !self.pulled {
            match self.runtime.pull(&self.spec.image).await {
                Ok(()) => self.pulled = true,
                Err(e) => warn!(image = %self.spec.image, error = %e, "image pull failed, trying local copy"),
            }
        }

        match self.runtime.start(&self.spec).await {
            Ok(handle) => {
                info!(container = %handle.name, id = %handle.short_id(), "started persistent sandbox");
                self.handle = Some(handle);
                let tool_version = self.version().await;
                self.state.send_replace(SandboxSnapshot {
                    ready: true,
                    container_id: self.handle.as_ref().map(|h| h.short_id().to_string()),
                    tool_version,
                    last_error: None,
                });
                Ok(())
            }
            Err(e) => {
                warn!(image = %self.spec.image, error = %e, "failed to start sandbox");
                self.state.send_replace(SandboxSnapshot {
                    last_error: Some(e.to_string()),
                    ..SandboxSnapshot::default()
                });
                Err(e)
            }
        }
    }

    /// Run `command` in the sandbox and wait for it, bounded by the
    /// configured exec timeout. On timeout the sandbox is torn down so the
    /// next job starts from a fresh one.
    pub async fn execute(&mut self, command: &[String]) -> Result<ExecOutput, SandboxError> {
        let handle = self.handle.clone().ok_or(SandboxError::NotRunning)?;
        debug!(container = %handle.name, command = %command.join(" "), "exec");

        let limit = self.settings.exec_timeout;
        let outcome = tokio::time::timeout(limit, self.runtime.exec(&handle, command)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(container = %handle.name, ?limit, "exec timed out, stopping sandbox");
                self.stop().await;
                Err(SandboxError::Timeout(limit))
            }
        }
    }

    /// Rendering tool version, or a description of why it is unknown.
    pub async fn version(&self) -> String {
        let Some(handle) = &self.handle else {
            return UNAVAILABLE.to_string();
        };
        let command = [self.spec.tool.clone(), "--version".to_string()];
        match tokio::time::timeout(VERSION_TIMEOUT, self.runtime.exec(handle, &command)).await {
            Ok(Ok(out)) if out.exit_code == 0 => out.output.trim().to_string(),
            Ok(Ok(out)) => format!("Container error: exit code {}", out.exit_code),
            Ok(Err(e)) => format!("Container error: {e}"),
            Err(_) => format!("Container error: no answer within {VERSION_TIMEOUT:?}"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the sandbox if there is one. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.runtime.stop(&handle).await {
            Ok(()) => info!(container = %handle.name, "sandbox stopped"),
            Err(e) => warn!(container = %handle.name, error = %e, "error stopping sandbox"),
        }
        self.publish_stopped();
    }

    fn publish_stopped(&self) {
        self.state.send_replace(SandboxSnapshot::default());
    }
}
