//! # opendata-reload CLI
//!
//! Command parsing and wiring for the `opendata-reload` binary. All reload semantics live in
//! `opendata-reload-core`; this module builds the concrete collaborators from the config file,
//! hands them to the orchestrator and publishes what the run noted.
//!
//! - `reload`: check every source, then reload those due today.
//! - `check`: run the pre-flight checks only.
//!
//! [`run`] is the programmatic entrypoint used by `main` and by the integration tests.
use crate::arcgis::ArcGisClient;
use crate::load_config::{load_config, CliConfig};
use crate::ogr::OgrExtractor;
use crate::report::{append_log, deliver_webhook, Report};
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use opendata_reload_core::events::{EventLog, Note};
use opendata_reload_core::orchestrator::{check_sources, reload_all, RunRequest};
use opendata_reload_core::schedule::Weekday;
use std::path::PathBuf;

/// CLI for opendata-reload: refresh hosted open-data layers from source database tables.
#[derive(Parser)]
#[clap(
    name = "opendata-reload",
    version,
    about = "Reload hosted open-data feature layers and tables from source database tables"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reload every configured source scheduled for today
    Reload {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Weekday symbol (U, M, T, W, R, F, S) to run as instead of the local day
        #[clap(long)]
        today: Option<Weekday>,
    },
    /// Verify sources and hosted items without reloading anything
    Check {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Reload { config, today } => {
            let config = load_config(config)?;
            let today = today.unwrap_or_else(Weekday::today);
            tracing::info!(command = "reload", %today, "Starting reload run");

            let (store, extractor) = collaborators(&config);
            let request = RunRequest {
                sources: &config.sources,
                settings: &config.settings,
                staging_root: &config.staging_root,
                today,
            };
            let report = reload_all(request, &store, &extractor).await;

            print_notes(report.events.notes());
            publish(&config, &report.events, !report.succeeded()).await;

            match report.error {
                None => {
                    tracing::info!(command = "reload", outcomes = report.outcomes.len(), "Reload run complete");
                    Ok(())
                }
                Some(e) => {
                    tracing::error!(command = "reload", error = %e, "Reload run failed");
                    Err(anyhow!("Reload run failed: {e}"))
                }
            }
        }
        Commands::Check { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "check", "Running pre-flight checks");

            let (store, extractor) = collaborators(&config);
            let mut events = EventLog::new();
            let result = check_sources(&config.sources, &store, &extractor, &mut events).await;
            if let Ok(checked) = &result {
                events.report(format!(
                    "All {} sources and hosted items look fine.",
                    checked.len()
                ));
            }
            print_notes(events.notes());
            result
                .map(|_| ())
                .map_err(|e| anyhow!("Pre-flight checks failed: {e}"))
        }
    }
}

fn collaborators(config: &CliConfig) -> (ArcGisClient, OgrExtractor) {
    (
        ArcGisClient::new(&config.portal_url, config.credentials.clone()),
        OgrExtractor::new(&config.extractor),
    )
}

fn print_notes(notes: &[Note]) {
    for note in notes.iter().filter(|n| n.printable) {
        println!("{}", note.text);
    }
}

/// Log file and webhook problems are logged and never change the run's result.
async fn publish(config: &CliConfig, events: &EventLog, failed: bool) {
    if let Err(e) = append_log(&config.log_file, events.notes()).await {
        tracing::error!(error = %e, "Could not write activity log");
    }
    let report = Report::render(events, failed);
    if let Some(url) = &config.report.webhook_url {
        if let Err(e) = deliver_webhook(url, &report).await {
            tracing::error!(error = %e, "Could not deliver report");
        }
    }
}
