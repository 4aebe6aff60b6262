//! Scripted in-memory runtime for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ExecOutput, SandboxHandle, SandboxRuntime, SandboxSpec};
use crate::error::SandboxError;

type ExecHook = Arc<dyn Fn(&[String]) -> ExecOutput + Send + Sync>;

#[derive(Default)]
struct Inner {
    starts: AtomicUsize,
    stops: AtomicUsize,
    pulls: AtomicUsize,
    running: AtomicBool,
    fail_starts: AtomicBool,
    fail_execs: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    exec_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Vec<String>>>,
    hook: Mutex<Option<ExecHook>>,
}

/// Records every call; renders succeed with exit code 0 unless a hook says
/// otherwise. `--version` probes are answered but not recorded as renders.
#[derive(Clone, Default)]
pub(crate) struct ScriptedRuntime {
    inner: Arc<Inner>,
}

impl ScriptedRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_exec(&self, hook: impl Fn(&[String]) -> ExecOutput + Send + Sync + 'static) {
        *self.inner.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    pub(crate) fn fail_starts(&self, fail: bool) {
        self.inner.fail_starts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_execs(&self, fail: bool) {
        self.inner.fail_execs.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_exec_delay(&self, delay: Duration) {
        *self.inner.exec_delay.lock().unwrap() = Some(delay);
    }

    /// Simulate the container dying underneath the manager.
    pub(crate) fn kill(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn pulls(&self) -> usize {
        self.inner.pulls.load(Ordering::SeqCst)
    }

    /// Render commands seen so far, in call order.
    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SandboxRuntime for ScriptedRuntime {
    async fn start(&self, _spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        if self.inner.fail_starts.load(Ordering::SeqCst) {
            return Err(SandboxError::Command {
                command: "docker run".into(),
                stderr: "Cannot connect to the Docker daemon".into(),
            });
        }
        let n = self.inner.starts.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(SandboxHandle {
            id: format!("{n:0>64}"),
            name: format!("renderq-worker-{n}"),
        })
    }

    async fn is_running(&self, _handle: &SandboxHandle) -> Result<bool, SandboxError> {
        Ok(self.inner.running.load(Ordering::SeqCst))
    }

    async fn exec(
        &self,
        _handle: &SandboxHandle,
        command: &[String],
    ) -> Result<ExecOutput, SandboxError> {
        if self.inner.fail_execs.load(Ordering::SeqCst) {
            return Err(SandboxError::NotRunning);
        }
        let is_probe = command.iter().any(|a| a == "--version");
        if !is_probe {
            self.inner.calls.lock().unwrap().push(command.to_vec());
        }

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.inner.exec_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if is_probe {
            return Ok(ExecOutput {
                exit_code: 0,
                output: "Manim Community v0.18.1\n".into(),
            });
        }
        let hook = self.inner.hook.lock().unwrap().clone();
        Ok(match hook {
            Some(hook) => hook(command),
            None => ExecOutput {
                exit_code: 0,
                output: String::new(),
            },
        })
    }

    async fn stop(&self, _handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn pull(&self, _image: &str) -> Result<(), SandboxError> {
        self.inner.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
