use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{RenderError, SandboxError};
use crate::resolver::OutputResolver;
use crate::sandbox::{SandboxManager, SandboxRuntime, SandboxSnapshot};
use crate::script;
use crate::state_machine::{Job, JobResult, Quality};
use crate::upload::{Uploader, storage_key};

/// The job's script file in the sandbox input directory. Removed on drop, so
/// every exit path of the pipeline cleans it up.
struct InputScript {
    path: PathBuf,
}

impl InputScript {
    async fn write(dir: &Path, job_id: &str, contents: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{job_id}.py"));
        tokio::fs::write(&path, contents).await?;
        Ok(Self { path })
    }
}

impl Drop for InputScript {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove input script");
        }
    }
}

/// Runs one job end to end: script → sandbox → artifact → storage.
pub struct JobProcessor<R, U> {
    sandbox: SandboxManager<R>,
    resolver: OutputResolver,
    uploader: U,
    key_prefix: String,
}

impl<R: SandboxRuntime, U: Uploader> JobProcessor<R, U> {
    /// The resolver looks in the sandbox's output mount, so host and container
    /// paths always agree.
    pub fn new(sandbox: SandboxManager<R>, uploader: U, key_prefix: impl Into<String>) -> Self {
        let resolver = OutputResolver::new(sandbox.spec().output.host.clone());
        Self {
            sandbox,
            resolver,
            uploader,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SandboxSnapshot> {
        self.sandbox.subscribe()
    }

    /// Start the sandbox ahead of the first job. Failure is not fatal; the
    /// first job will try again.
    pub async fn warm_up(&mut self) {
        if let Err(e) = self.sandbox.ensure_running().await {
            warn!(error = %e, "sandbox not ready at startup");
        }
    }

    pub async fn shutdown(&mut self) {
        self.sandbox.stop().await;
    }

    /// Command line for rendering `scene` from the job's script.
    fn render_command(&self, job_id: &str, scene: &str, quality: Quality) -> Vec<String> {
        let spec = self.sandbox.spec();
        vec![
            spec.tool.clone(),
            format!("{}/{job_id}.py", spec.input.container.trim_end_matches('/')),
            scene.to_string(),
            quality.flag().to_string(),
            "--disable_caching".to_string(),
            "--output_file".to_string(),
            format!("{}/{job_id}.mp4", spec.output.container.trim_end_matches('/')),
        ]
    }

    pub async fn process(&mut self, job: &Job) -> Result<JobResult, RenderError> {
        let source = script::normalize(&job.script);
        let scene = script::entry_point(&source)?;
        let _input = InputScript::write(&self.sandbox.spec().input.host, &job.id, &source).await?;

        self.sandbox
            .ensure_running()
            .await
            .map_err(|e| RenderError::SandboxUnavailable(e.to_string()))?;

        let command = self.render_command(&job.id, &scene, job.config.quality);
        info!(job_id = %job.id, scene = %scene, quality = %job.config.quality, "rendering");
        let exec = self.sandbox.execute(&command).await.map_err(|e| match e {
            SandboxError::Timeout(limit) => RenderError::RenderTimedOut { limit },
            other => RenderError::SandboxUnavailable(other.to_string()),
        })?;
        if exec.exit_code != 0 {
            return Err(RenderError::RenderFailed {
                exit_code: exec.exit_code,
                output: exec.output,
            });
        }

        let artifact = self
            .resolver
            .resolve(&job.id, &scene)
            .await?
            .ok_or(RenderError::ArtifactMissing)?;
        debug!(job_id = %job.id, path = %artifact.path.display(), size = artifact.size, "artifact located");

        let key = storage_key(&self.key_prefix, &job.id);
        let url = self
            .uploader
            .upload(&artifact.path, &key)
            .await
            .map_err(|e| RenderError::UploadFailed(e.to_string()))?;

        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!(job_id = %job.id, path = %artifact.path.display(), error = %e, "failed to remove local artifact");
        }
        Ok(JobResult::completed(url, artifact.size))
    }
}
