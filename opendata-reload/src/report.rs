//! Post-run reporting: the report text, the activity log file and webhook delivery.
//!
//! The report body is the run's reportable notes in order. Every note, reportable or not, is
//! appended to the activity log as `YYYYMMDD-HHMM  text` followed by a blank line.

use anyhow::{Context, Result};
use opendata_reload_core::events::{EventLog, Note};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

pub const REPORT_SUBJECT: &str = "opendata-reload - REPORT";
pub const ERROR_SUBJECT: &str = "opendata-reload - ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

impl Report {
    pub fn render(events: &EventLog, failed: bool) -> Self {
        let subject = if failed { ERROR_SUBJECT } else { REPORT_SUBJECT };
        let body = events
            .reportable()
            .map(Note::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            subject: subject.to_string(),
            body,
        }
    }
}

/// Appends every note to the activity log, creating the file if needed.
pub async fn append_log(path: &Path, notes: &[Note]) -> Result<()> {
    let mut text = String::new();
    for note in notes {
        text.push_str(&note.render());
        text.push_str("\n\n");
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    file.write_all(text.as_bytes())
        .await
        .with_context(|| format!("Failed to write log file {}", path.display()))?;
    file.flush().await?;
    info!(log_file = %path.display(), notes = notes.len(), "Appended run notes to log file");
    Ok(())
}

/// POSTs the report as JSON to `url`.
pub async fn deliver_webhook(url: &str, report: &Report) -> Result<()> {
    let response = reqwest::Client::new()
        .post(url)
        .json(report)
        .send()
        .await
        .context("Failed to send report to webhook")?;
    let status = response.status();
    if !status.is_success() {
        error!(%status, "Webhook refused report");
        anyhow::bail!("Webhook answered {status}");
    }
    info!(subject = %report.subject, "Report delivered to webhook");
    Ok(())
}
