//! Run orchestration: pre-flight checks, the schedule gate and one reload cycle per due source.
//!
//! # Responsibilities
//! - Verify every configured source and hosted item before anything is staged
//! - Create the run workspace and remove it again on every exit path
//! - Process sources one at a time, in configuration order
//! - Stop the whole run on the first fatal error; later sources are not attempted
//!
//! # Navigation
//! - Main entrypoint: [`reload_all`]
//! - Pre-flight only: [`check_sources`]

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use tracing::{error, info};

use crate::config::{ReloadSettings, SourceSpec};
use crate::contract::{ContentStore, Extractor};
use crate::error::ReloadError;
use crate::events::EventLog;
use crate::reload::{CheckedSource, ReloadOutcome, Reloader};
use crate::schedule::Weekday;
use crate::staging::RunWorkspace;

/// Inputs of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub sources: &'a [SourceSpec],
    pub settings: &'a ReloadSettings,
    /// Directory under which the run workspace is created.
    pub staging_root: &'a Path,
    pub today: Weekday,
}

/// Everything a run produced, for the caller to render and deliver.
#[derive(Debug)]
pub struct RunReport {
    pub today: Weekday,
    /// One outcome per source reached, in configuration order.
    pub outcomes: Vec<ReloadOutcome>,
    pub events: EventLog,
    /// The fatal error that ended the run early, if any.
    pub error: Option<ReloadError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run the pre-flight checks, then reload every source due on `request.today`.
pub async fn reload_all<S, X>(request: RunRequest<'_>, store: &S, extractor: &X) -> RunReport
where
    S: ContentStore + ?Sized,
    X: Extractor + ?Sized,
{
    info!(
        sources = request.sources.len(),
        today = %request.today,
        "[RUN] Starting reload run"
    );
    let mut events = EventLog::new();
    let mut outcomes = Vec::new();

    // A panicking collaborator still ends in a report; the workspace is removed by its drop.
    let caught = AssertUnwindSafe(run(request, store, extractor, &mut events, &mut outcomes))
        .catch_unwind()
        .await;
    let result = match caught {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%message, "[RUN] Run panicked");
            events.fatal(format!("An unexpected error occurred: {message}."));
            Err(ReloadError::Unexpected(message))
        }
    };

    let error = match result {
        Ok(()) => {
            events.note("-----RUN COMPLETED.");
            None
        }
        Err(e) => {
            error!(error = %e, "[RUN] Run terminated");
            events.fatal(
                "-----Run terminated due to error condition. Check the content store's temporary folder for leftover items.",
            );
            Some(e)
        }
    };

    RunReport {
        today: request.today,
        outcomes,
        events,
        error,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with a non-text payload".to_string()
    }
}

async fn run<S, X>(
    request: RunRequest<'_>,
    store: &S,
    extractor: &X,
    events: &mut EventLog,
    outcomes: &mut Vec<ReloadOutcome>,
) -> Result<(), ReloadError>
where
    S: ContentStore + ?Sized,
    X: Extractor + ?Sized,
{
    let checked = check_sources(request.sources, store, extractor, events).await?;

    events.note("Creating temporary workspace to assemble source data to be loaded...");
    let workspace = match RunWorkspace::create(request.staging_root) {
        Ok(ws) => ws,
        Err(e) => {
            events.fatal(format!("{e}. Run terminated."));
            return Err(e);
        }
    };
    events.note(format!(
        "Temporary workspace for assembly of source data is {}.",
        workspace.id()
    ));

    let result = reload_due(request, &checked, store, extractor, &workspace, events, outcomes).await;

    events.note(format!("Deleting temporary workspace {}...", workspace.id()));
    if let Err(e) = workspace.destroy() {
        events.alert(format!("ALERT - {e}. Delete it manually."));
    }

    result
}

async fn reload_due<S, X>(
    request: RunRequest<'_>,
    checked: &[CheckedSource],
    store: &S,
    extractor: &X,
    workspace: &RunWorkspace,
    events: &mut EventLog,
    outcomes: &mut Vec<ReloadOutcome>,
) -> Result<(), ReloadError>
where
    S: ContentStore + ?Sized,
    X: Extractor + ?Sized,
{
    events.note(format!("Today is day {}.", request.today));
    let reloader = Reloader::new(store, extractor, workspace, request.settings);

    for source in checked {
        let spec = &source.spec;
        if !spec.is_due(request.today) {
            events.trace(format!(
                "Feature service {} ({}) is not reloaded today.",
                spec.title, spec.item_id
            ));
            outcomes.push(ReloadOutcome::skipped(spec));
            continue;
        }

        events.report(format!(
            "Feature service w/ title {} and ID {} gets reloaded today. Starting reload steps.",
            spec.title, spec.item_id
        ));
        match reloader.reload(source, events).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(failure) => {
                outcomes.push(failure.outcome);
                return Err(failure.error);
            }
        }
    }
    Ok(())
}

/// Verify that every source exists, the content store is reachable, and every hosted item
/// exists, carries the configured title and exposes exactly one layer or one table.
///
/// The first failure is noted as fatal and returned.
pub async fn check_sources<S, X>(
    sources: &[SourceSpec],
    store: &S,
    extractor: &X,
    events: &mut EventLog,
) -> Result<Vec<CheckedSource>, ReloadError>
where
    S: ContentStore + ?Sized,
    X: Extractor + ?Sized,
{
    events.note("Making sure given sources exist...");
    let mut handles = Vec::with_capacity(sources.len());
    for spec in sources {
        let handle = spec.resolve();
        let (found, cause) = match extractor.exists(&handle).await {
            Ok(found) => (found, String::new()),
            Err(e) => {
                error!(error = %e, source = %handle.path(), "[RUN] Existence check failed");
                (false, format!(" Existence check failed: {e}."))
            }
        };
        if !found {
            let message = format!(
                "Couldn't find source {} (source for feature service {}).{cause}",
                spec.table, spec.title
            );
            events.fatal(format!("{message} Run terminated."));
            return Err(ReloadError::Config(message));
        }
        handles.push(handle);
    }

    events.note("Connecting to content store...");
    if let Err(e) = store.reconnect().await {
        let message = format!("Couldn't connect to content store: {e}.");
        events.fatal(format!("{message} Run terminated."));
        return Err(ReloadError::Config(message));
    }

    events.note("Making sure given feature services exist and hold one layer or one table...");
    let mut checked = Vec::with_capacity(sources.len());
    for (spec, handle) in sources.iter().zip(handles) {
        let dataset = match store.get_dataset(&spec.item_id).await {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                let message = format!(
                    "Couldn't find item w/ ID {} (given title is {}).",
                    spec.item_id, spec.title
                );
                events.fatal(format!("{message} Run terminated."));
                return Err(ReloadError::Config(message));
            }
            Err(e) => {
                let message = format!("Couldn't look up item w/ ID {}: {e}.", spec.item_id);
                events.fatal(format!("{message} Run terminated."));
                return Err(ReloadError::Config(message));
            }
        };

        if dataset.title.to_lowercase() != spec.title.to_lowercase() {
            let message = format!(
                "Item w/ ID {} wasn't matched to an item w/ given title {}. Title w/ that ID is {}.",
                spec.item_id, spec.title, dataset.title
            );
            events.fatal(format!("{message} Run terminated."));
            return Err(ReloadError::Config(message));
        }

        let Some(kind) = dataset.kind() else {
            let message = format!(
                "Item w/ ID {} (given title is {}) isn't a 1-layer feature service as expected ({} layers, {} tables).",
                spec.item_id,
                spec.title,
                dataset.layers.len(),
                dataset.tables.len()
            );
            events.fatal(format!("{message} Run terminated."));
            return Err(ReloadError::Config(message));
        };

        info!(item_id = %spec.item_id, ?kind, "[RUN] Feature service checked");
        checked.push(CheckedSource {
            spec: spec.clone(),
            handle,
            kind,
        });
    }

    Ok(checked)
}
