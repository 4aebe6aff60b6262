//! Interface de terminal do renderq: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! um job enquanto ele passa pela fila.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use renderq::store::{ReportedStatus, StatusReport};

/// Indicador visual de progresso para um job de renderização.
///
/// Exibe um spinner animado durante a espera e mensagens coloridas para
/// sucesso (verde) e falha (vermelho).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o id do job.
    pub fn start(job_id: &str, queue_position: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{job_id}: queued (position {queue_position})"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o status atual.
    pub fn update(&self, report: &StatusReport) {
        self.pb
            .set_message(format!("{}: {}", report.job_uuid, report.status));
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    pub fn complete(&self, report: &StatusReport) {
        self.pb.finish_and_clear();
        let result = report.result.as_ref();
        match report.status {
            ReportedStatus::Completed => println!(
                "  {} {} → {}",
                self.green.apply_to("✓"),
                report.job_uuid,
                result
                    .and_then(|r| r.video_url())
                    .unwrap_or_default()
            ),
            ReportedStatus::Failed => println!(
                "  {} {} failed: {}",
                self.red.apply_to("✗"),
                report.job_uuid,
                result.and_then(|r| r.error()).unwrap_or_default()
            ),
            _ => println!(
                "  {} {} is still {}",
                self.yellow.apply_to("…"),
                report.job_uuid,
                report.status
            ),
        }
    }
}

/// Imprime um valor serializável como JSON formatado.
pub fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}
