//! Interface de linha de comando do renderq baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (render, batch, health)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use renderq::state_machine::Quality;

/// renderq: fila de renderização com sandbox persistente.
#[derive(Debug, Parser)]
#[command(name = "renderq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./renderq.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Qualidade aceita pela CLI, mapeada para [`Quality`] internamente.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QualityArg {
    /// 480p15, renderização rápida.
    Low,
    /// 720p30.
    Medium,
    /// 1080p60.
    High,
}

impl From<QualityArg> for Quality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Low => Quality::Low,
            QualityArg::Medium => Quality::Medium,
            QualityArg::High => Quality::High,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Renderiza um script e espera o resultado.
    Render {
        /// Arquivo Python com a cena.
        script: PathBuf,

        /// Identificador do job (padrão: UUID gerado).
        #[arg(long)]
        job_id: Option<String>,

        #[arg(long, short, value_enum, default_value_t = QualityArg::Medium)]
        quality: QualityArg,
    },

    /// Enfileira um arquivo JSON com várias submissões `{job_uuid, code, config}`.
    Batch {
        file: PathBuf,
    },

    /// Inicia o sandbox e mostra o relatório de saúde.
    Health,
}
