mod cli;
mod ui;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use cli::{Cli, Command};
use renderq::config::RenderqConfig;
use renderq::notifier::Notifier;
use renderq::processor::JobProcessor;
use renderq::sandbox::{DockerRuntime, SandboxManager};
use renderq::state_machine::{JobConfig, Quality, RenderRequest};
use renderq::store::ReportedStatus;
use renderq::upload::StorageBackend;
use renderq::{RenderService, StatusReport, WorkerHandle};
use ui::JobProgress;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const READY_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = RenderqConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Render {
            script,
            job_id,
            quality,
        } => render(&config, &script, job_id, quality.into()).await,
        Command::Batch { file } => batch(&config, &file).await,
        Command::Health => health(&config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "renderq=debug" } else { "renderq=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn start_service(config: &RenderqConfig) -> Result<(RenderService, WorkerHandle)> {
    let manager = SandboxManager::new(
        DockerRuntime::new(config.sandbox.cli.clone()),
        config.sandbox_spec()?,
        config.manager_settings(),
    );
    let uploader =
        StorageBackend::from_config(&config.storage).context("invalid storage configuration")?;
    let processor = JobProcessor::new(manager, uploader, config.storage.key_prefix.clone());
    let notifier = Notifier::new(&config.webhook).context("invalid webhook configuration")?;
    Ok(RenderService::start(processor, notifier, config.queue.clone()))
}

/// Poll until every job is terminal. `None` means the worker died first.
async fn wait_for(
    service: &RenderService,
    worker: &WorkerHandle,
    job_ids: &[String],
    progress: Option<&JobProgress>,
) -> Option<Vec<StatusReport>> {
    loop {
        let reports: Vec<StatusReport> = job_ids.iter().map(|id| service.status(id)).collect();
        if let (Some(progress), Some(report)) = (progress, reports.first()) {
            progress.update(report);
        }
        if reports.iter().all(StatusReport::is_terminal) {
            return Some(reports);
        }
        if worker.is_finished() {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn render(
    config: &RenderqConfig,
    script: &Path,
    job_id: Option<String>,
    quality: Quality,
) -> Result<()> {
    let code = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read {}", script.display()))?;
    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let (service, worker) = start_service(config)?;
    let submission = service.submit(job_id.clone(), code, JobConfig { quality })?;

    let progress = JobProgress::start(&job_id, submission.queue_position);
    let ids = [job_id.clone()];
    let Some(reports) = wait_for(&service, &worker, &ids, Some(&progress)).await else {
        let outcome = worker.join().await;
        bail!("render worker stopped before job {job_id} finished: {outcome:?}");
    };
    let report = &reports[0];
    progress.complete(report);
    ui::print_json(report);

    service.shutdown(worker).await?;
    if report.status != ReportedStatus::Completed {
        bail!("job {job_id} failed");
    }
    Ok(())
}

async fn batch(config: &RenderqConfig, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let requests: Vec<RenderRequest> =
        serde_json::from_str(&contents).context("batch file must be a JSON array of submissions")?;

    let (service, worker) = start_service(config)?;
    let mut accepted = Vec::new();
    for request in requests {
        let job_id = request.job_uuid.clone();
        match service.submit_request(request) {
            Ok(submission) => {
                ui::print_json(&submission);
                accepted.push(job_id);
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "submission rejected"),
        }
    }

    let Some(reports) = wait_for(&service, &worker, &accepted, None).await else {
        let outcome = worker.join().await;
        bail!("render worker stopped with jobs outstanding: {outcome:?}");
    };
    for report in &reports {
        match report.result.as_ref().and_then(|r| r.error()) {
            Some(error) => println!("{}: {} ({error})", report.job_uuid, report.status),
            None => println!("{}: {}", report.job_uuid, report.status),
        }
    }

    service.shutdown(worker).await?;
    let failed = reports
        .iter()
        .filter(|r| r.status != ReportedStatus::Completed)
        .count();
    if failed > 0 {
        bail!("{failed} of {} jobs failed", reports.len());
    }
    Ok(())
}

async fn health(config: &RenderqConfig) -> Result<()> {
    let (mut service, worker) = start_service(config)?;
    if tokio::time::timeout(READY_TIMEOUT, service.sandbox_ready())
        .await
        .is_err()
    {
        tracing::warn!("sandbox did not become ready within {READY_TIMEOUT:?}");
    }
    ui::print_json(&service.health());
    service.shutdown(worker).await?;
    Ok(())
}
