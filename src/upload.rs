//! Durable storage for rendered artifacts.
//!
//! [`Uploader`] is the seam the job pipeline calls once a video exists on
//! disk. Two backends ship with the crate: a local directory and an HTTP
//! object store that accepts `PUT <base_url>/<key>`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tokio::fs;
use tracing::debug;

use crate::config::{StorageBackendKind, StorageConfig};
use crate::error::UploadError;

/// Copies a local file to durable storage and returns its public URL.
pub trait Uploader: Send + Sync + 'static {
    fn upload(
        &self,
        local_path: &Path,
        remote_key: &str,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// Storage key for a job's video, e.g. `videos/<job_id>.mp4`.
pub fn storage_key(prefix: &str, job_id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{job_id}.mp4")
    } else {
        format!("{prefix}/{job_id}.mp4")
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Stores artifacts under a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalUploader {
    root: PathBuf,
    base_url: Option<String>,
}

impl LocalUploader {
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            base_url,
        }
    }
}

impl Uploader for LocalUploader {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<String, UploadError> {
        let dest = self.root.join(remote_key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local_path, &dest).await?;
        debug!(dest = %dest.display(), "artifact stored locally");

        Ok(match &self.base_url {
            Some(base) => join_url(base, remote_key),
            None => {
                let absolute = std::path::absolute(&dest)?;
                format!("file://{}", absolute.display())
            }
        })
    }
}

/// Uploads artifacts with `PUT` to an HTTP object store.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpUploader {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<String, UploadError> {
        let body = fs::read(local_path).await?;
        let url = join_url(&self.base_url, remote_key);

        let mut request = self
            .client
            .put(&url)
            .header("content-type", "video/mp4")
            .body(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(url)
    }
}

/// The backend selected by `[storage]` in the configuration.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local(LocalUploader),
    Http(HttpUploader),
}

impl StorageBackend {
    pub fn from_config(config: &StorageConfig) -> Result<Self, UploadError> {
        Ok(match config.backend {
            StorageBackendKind::Local => Self::Local(LocalUploader::new(
                config.root.clone(),
                config.base_url.clone(),
            )),
            StorageBackendKind::Http => Self::Http(HttpUploader::new(
                config.base_url.clone().unwrap_or_default(),
                config.api_key.clone().filter(|k| !k.is_empty()),
            )?),
        })
    }
}

impl Uploader for StorageBackend {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<String, UploadError> {
        match self {
            Self::Local(local) => local.upload(local_path, remote_key).await,
            Self::Http(http) => http.upload(local_path, remote_key).await,
        }
    }
}
