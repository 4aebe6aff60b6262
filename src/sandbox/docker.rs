use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::info;
use uuid::Uuid;

use super::{ExecOutput, SandboxHandle, SandboxRuntime, SandboxSpec};
use crate::error::SandboxError;

/// Drives containers through the Docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    cli: String,
}

impl DockerRuntime {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    async fn run(&self, args: &[String]) -> Result<Output, SandboxError> {
        Command::new(&self.cli)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SandboxError::Spawn {
                cli: self.cli.clone(),
                source,
            })
    }

    async fn run_checked(&self, args: &[String]) -> Result<Output, SandboxError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(SandboxError::Command {
                command: format!("{} {}", self.cli, args.first().map_or("", String::as_str)),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Arguments for `docker run` that keep the container alive between jobs.
fn run_args(spec: &SandboxSpec, name: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];
    for mount in [&spec.input, &spec.output] {
        args.push("-v".to_string());
        args.push(format!("{}:{}:rw", mount.host.display(), mount.container));
    }
    args.push(spec.image.clone());
    args.extend(["sleep".to_string(), "infinity".to_string()]);
    args
}

fn exec_args(name: &str, command: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_string(), name.to_string()];
    args.extend(command.iter().cloned());
    args
}

impl SandboxRuntime for DockerRuntime {
    async fn start(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        let name = format!("renderq-worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let output = self.run_checked(&run_args(spec, &name)).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(SandboxHandle { id, name })
    }

    async fn is_running(&self, handle: &SandboxHandle) -> Result<bool, SandboxError> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            handle.name.clone(),
        ];
        // `--rm` containers vanish once stopped, so a failed inspect means "not running".
        let output = self.run(&args).await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &[String],
    ) -> Result<ExecOutput, SandboxError> {
        let output = self.run(&exec_args(&handle.name, command)).await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let output = self.run(&["stop".to_string(), handle.name.clone()]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") || stderr.contains("is not running") {
            return Ok(());
        }
        Err(SandboxError::Command {
            command: format!("{} stop", self.cli),
            stderr: stderr.trim().to_string(),
        })
    }

    async fn pull(&self, image: &str) -> Result<(), SandboxError> {
        info!(image, "pulling sandbox image");
        self.run_checked(&["pull".to_string(), image.to_string()])
            .await
            .map(|_| ())
    }
}
