//! Locating the rendered video after a sandbox run.
//!
//! The tool honours `--output_file` most of the time, but depending on the
//! resolution preset it may still write into its own
//! `videos/<job>/<preset>/<Scene>.mp4` layout. Whatever it did, the artifact
//! ends up at one canonical path: `<output_dir>/<job_id>.mp4`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

/// Preset directories the tool may fall back to, highest resolution first.
pub const FALLBACK_PRESETS: &[&str] = &["1080p60", "720p30", "480p15"];

/// A rendered file at its canonical location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct OutputResolver {
    output_dir: PathBuf,
}

impl OutputResolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn canonical_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{job_id}.mp4"))
    }

    pub fn fallback_paths(&self, job_id: &str, scene: &str) -> Vec<PathBuf> {
        FALLBACK_PRESETS
            .iter()
            .map(|preset| {
                self.output_dir
                    .join("videos")
                    .join(job_id)
                    .join(preset)
                    .join(format!("{scene}.mp4"))
            })
            .collect()
    }

    /// Find the artifact for `job_id`, moving a fallback file into place if
    /// needed. `Ok(None)` means nothing was rendered.
    pub async fn resolve(&self, job_id: &str, scene: &str) -> io::Result<Option<Artifact>> {
        let canonical = self.canonical_path(job_id);
        if fs::try_exists(&canonical).await? {
            return artifact_at(canonical).await.map(Some);
        }

        for candidate in self.fallback_paths(job_id, scene) {
            if !fs::try_exists(&candidate).await? {
                continue;
            }
            info!(job_id, from = %candidate.display(), "relocating artifact to canonical path");
            relocate(&candidate, &canonical).await?;
            return artifact_at(canonical).await.map(Some);
        }

        debug!(job_id, scene, "no artifact found");
        Ok(None)
    }
}

async fn artifact_at(path: PathBuf) -> io::Result<Artifact> {
    let size = fs::metadata(&path).await?.len();
    Ok(Artifact { path, size })
}

/// `rename`, falling back to copy + remove across filesystems.
async fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}
