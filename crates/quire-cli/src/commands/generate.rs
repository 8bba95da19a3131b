//! Generate a document shell and, with `--full`, wait for the remaining sections.

use std::time::Duration;

use anyhow::{Result, bail};
use colored::Colorize;
use quire_core::burst::{BurstProgress, BurstReport};
use quire_core::{BurstSupervisor, Config, GenerationRequest, GenerationResponse, GenerationService};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::output::{self, OutputFormat};

/// Arguments for `quire generate`.
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub topic: String,
    pub session_token: String,
    pub full: bool,
    pub document_id: Option<String>,
    pub grace: Duration,
    pub format: OutputFormat,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateOutput<'a> {
    #[serde(flatten)]
    response: &'a GenerationResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    burst: Option<&'a BurstReport>,
}

/// Execute the generate command.
///
/// Returns `false` when a background burst left sections unpersisted.
pub async fn execute(args: GenerateArgs) -> Result<bool> {
    let config = Config::load()?;
    let service = GenerationService::from_config(&config, BurstSupervisor::new())?;

    let mut request = GenerationRequest::new(args.topic, args.session_token).full_document(args.full);
    if let Some(id) = args.document_id {
        request = request.with_existing_document(id);
    }

    let outcome = service.handle(request).await?;
    if args.format == OutputFormat::Text {
        output::print_response(&outcome.response);
    }

    let report = match outcome.burst {
        Some(burst) => {
            let reporter = (args.format == OutputFormat::Text)
                .then(|| tokio::spawn(report_progress(burst.progress())));
            let wait = burst.wait();
            tokio::pin!(wait);

            let report = tokio::select! {
                report = &mut wait => report?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("{}", "Interrupted; stopping background generation".yellow());
                    stop_bursts(service.supervisor(), args.grace).await?;
                    wait.await?
                },
            };
            if let Some(reporter) = reporter {
                reporter.abort();
            }
            Some(report)
        },
        None => None,
    };

    match args.format {
        OutputFormat::Json => output::print_json(&GenerateOutput {
            response: &outcome.response,
            burst: report.as_ref(),
        })?,
        OutputFormat::Text => {
            if let Some(report) = &report {
                println!();
                output::print_report(report);
            }
        },
    }

    let complete = report.as_ref().is_none_or(BurstReport::is_complete);
    if !complete {
        info!(document = %outcome.response.document_id, "document incomplete");
    }
    Ok(complete)
}

async fn stop_bursts(supervisor: &BurstSupervisor, grace: Duration) -> Result<()> {
    if supervisor.shutdown(grace).await {
        return Ok(());
    }
    warn!(grace_secs = grace.as_secs(), "background sections did not stop in time");
    bail!("Background generation did not stop within {} seconds", grace.as_secs())
}

async fn report_progress(mut progress: watch::Receiver<BurstProgress>) {
    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();
        eprintln!(
            "{} {}/{} persisted, {} failed, {} in progress",
            "sections:".dimmed(),
            snapshot.persisted,
            snapshot.total,
            snapshot.failed,
            snapshot.in_progress
        );
        if snapshot.finished {
            break;
        }
    }
}
