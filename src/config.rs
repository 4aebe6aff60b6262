//! Configuração do renderq carregada a partir de `renderq.toml`.
//!
//! A struct [`RenderqConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `WEBHOOK_API_KEY` e `BACKEND_URL` têm precedência
//! sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::sandbox::{ManagerSettings, Mount, SandboxSpec};

/// Configuração de nível superior carregada de `renderq.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderqConfig {
    /// Diretório de scripts de entrada, montado no sandbox.
    pub work_dir: PathBuf,

    /// Diretório onde o sandbox grava os vídeos renderizados.
    pub output_dir: PathBuf,

    pub sandbox: SandboxConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
}

impl Default for RenderqConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
            sandbox: SandboxConfig::default(),
            queue: QueueConfig::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Parâmetros do container persistente.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Imagem usada para o container.
    pub image: String,
    /// Binário da CLI de containers (`docker`, `podman`).
    pub cli: String,
    /// Ferramenta de renderização dentro da imagem.
    pub tool: String,
    pub container_input_dir: String,
    pub container_output_dir: String,
    /// Faz `pull` da imagem antes do primeiro start.
    pub pull_image: bool,
    /// Tempo máximo de uma renderização, em segundos.
    pub render_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "manimcommunity/manim:latest".to_string(),
            cli: "docker".to_string(),
            tool: "manim".to_string(),
            container_input_dir: "/manim/temp".to_string(),
            container_output_dir: "/manim/output".to_string(),
            pull_image: true,
            render_timeout_secs: 600,
        }
    }
}

/// Limites da fila de jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Profundidade máxima; `None` = fila ilimitada.
    pub max_depth: Option<usize>,
    /// Estimativa (apenas indicativa) de segundos por job.
    pub seconds_per_job: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            seconds_per_job: 30,
        }
    }
}

/// Entrega do webhook de conclusão.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub backend_url: String,
    pub path: String,
    /// Chave enviada no header `X-Webhook-Key`. Vazia = sem notificações.
    pub api_key: String,
    /// Total de tentativas (não retentativas).
    pub max_attempts: u32,
    /// Atraso base em milissegundos para backoff exponencial.
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            path: "/webhooks/job-completion".to_string(),
            api_key: String::new(),
            max_attempts: 3,
            base_delay_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

impl WebhookConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.backend_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Local,
    Http,
}

/// Destino durável dos vídeos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Raiz do backend local.
    pub root: PathBuf,
    /// URL pública (local) ou endpoint de `PUT` (http).
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            root: PathBuf::from("storage"),
            base_url: None,
            api_key: None,
            key_prefix: "videos".to_string(),
        }
    }
}

impl RenderqConfig {
    /// Carrega a configuração de `path`, ou de `renderq.toml` no diretório
    /// atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new("renderq.toml"));
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::parse(&contents)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid renderq configuration")
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = var("WEBHOOK_API_KEY").filter(|k| !k.is_empty()) {
            self.webhook.api_key = key;
        }
        if let Some(url) = var("BACKEND_URL").filter(|u| !u.is_empty()) {
            self.webhook.backend_url = url;
        }
        self
    }

    /// Cria os diretórios de trabalho e monta a especificação do sandbox com
    /// caminhos absolutos (exigidos pelos bind mounts).
    pub fn sandbox_spec(&self) -> Result<SandboxSpec> {
        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("failed to create {}", self.work_dir.display()))?;
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        Ok(SandboxSpec {
            image: self.sandbox.image.clone(),
            tool: self.sandbox.tool.clone(),
            input: Mount {
                host: std::path::absolute(&self.work_dir)?,
                container: self.sandbox.container_input_dir.clone(),
            },
            output: Mount {
                host: std::path::absolute(&self.output_dir)?,
                container: self.sandbox.container_output_dir.clone(),
            },
        })
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            pull_image: self.sandbox.pull_image,
            exec_timeout: Duration::from_secs(self.sandbox.render_timeout_secs),
        }
    }
}
