//! Reload state machine: drives one source through a single reload cycle.
//!
//! `Pending → Staged → Uploaded → PreCounted → Replaced → PostCounted → CleanedUp → Done`
//!
//! Any step may end the cycle in `Failed`. Staging failures are not retried. Upload and
//! truncate+append run inside the [`RetryPolicy`]. Counting is observational only and cleanup
//! failures are downgraded to alerts.
//!
//! If truncate succeeds and every append attempt then fails, the live dataset is left empty.
//! There is no rollback; the fatal note tells the operator to reload it.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::config::{ReloadSettings, SourceHandle, SourceSpec};
use crate::contract::{ContentStore, DatasetKind, Extractor, UploadRequest, UploadedItem};
use crate::error::ReloadError;
use crate::events::EventLog;
use crate::retry::RetryPolicy;
use crate::staging::{RunWorkspace, StagingArtifact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReloadState {
    Pending,
    Staged,
    Uploaded,
    PreCounted,
    Replaced,
    PostCounted,
    CleanedUp,
    Done,
    Failed(FailedStep),
}

/// The step that ended a cycle in [`ReloadState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailedStep {
    Stage,
    Upload,
    Replace,
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailedStep::Stage => "stage",
            FailedStep::Upload => "upload",
            FailedStep::Replace => "replace",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReloadStatus {
    /// The cycle has not reached a terminal state.
    Pending,
    Success,
    SkippedNotScheduled,
    Failed(FailedStep),
}

/// Per-source record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub item_id: String,
    pub title: String,
    /// Row count of the source table before the reload.
    pub source_count: Option<u64>,
    /// Row count of the live dataset before and after the reload.
    pub pre_count: Option<u64>,
    pub post_count: Option<u64>,
    pub upload_attempts: u32,
    pub replace_attempts: u32,
    pub state: ReloadState,
    pub status: ReloadStatus,
}

impl ReloadOutcome {
    fn pending(spec: &SourceSpec) -> Self {
        Self {
            item_id: spec.item_id.clone(),
            title: spec.title.clone(),
            source_count: None,
            pre_count: None,
            post_count: None,
            upload_attempts: 0,
            replace_attempts: 0,
            state: ReloadState::Pending,
            status: ReloadStatus::Pending,
        }
    }

    pub fn skipped(spec: &SourceSpec) -> Self {
        Self {
            status: ReloadStatus::SkippedNotScheduled,
            ..Self::pending(spec)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReloadStatus::Success
    }
}

/// A cycle that ended in `Failed`, with the outcome recorded so far.
#[derive(Debug)]
pub struct ReloadFailure {
    pub outcome: ReloadOutcome,
    pub error: ReloadError,
}

/// A configured source that passed the pre-flight checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedSource {
    pub spec: SourceSpec,
    pub handle: SourceHandle,
    pub kind: DatasetKind,
}

pub struct Reloader<'a, S: ?Sized, X: ?Sized> {
    store: &'a S,
    extractor: &'a X,
    workspace: &'a RunWorkspace,
    settings: &'a ReloadSettings,
}

impl<'a, S, X> Reloader<'a, S, X>
where
    S: ContentStore + ?Sized,
    X: Extractor + ?Sized,
{
    pub fn new(
        store: &'a S,
        extractor: &'a X,
        workspace: &'a RunWorkspace,
        settings: &'a ReloadSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            workspace,
            settings,
        }
    }

    /// Run one full reload cycle for `source`.
    pub async fn reload(
        &self,
        source: &CheckedSource,
        events: &mut EventLog,
    ) -> Result<ReloadOutcome, ReloadFailure> {
        let spec = &source.spec;
        let mut outcome = ReloadOutcome::pending(spec);
        info!(item_id = %spec.item_id, title = %spec.title, "[RELOAD] Starting reload cycle");

        // Pending -> Staged
        let package_name = spec.package_name();
        events.note(format!(
            "Copying source {} into temporary package {package_name}...",
            spec.table
        ));
        let artifact = match self
            .workspace
            .package(self.extractor, &source.handle, &package_name, spec.table_name())
            .await
        {
            Ok(artifact) => artifact,
            Err(error) => {
                events.fatal(format!(
                    "A problem occurred when copying source {} for feature service {}: {error}. Run terminated.",
                    spec.table, spec.title
                ));
                return Err(fail(outcome, FailedStep::Stage, error));
            }
        };
        advance(&mut outcome, ReloadState::Staged);

        // Staged -> Uploaded
        let uploaded = match self.upload(spec, &artifact, events).await {
            Ok((item, attempts)) => {
                outcome.upload_attempts = attempts;
                item
            }
            Err((attempts, error)) => {
                outcome.upload_attempts = attempts;
                events.fatal(format!(
                    "A problem occurred when uploading source data for feature service {}--tried {attempts} times. Run terminated. Clean up temporary items from folder {} in the content store (if there).",
                    spec.title, self.settings.content_folder
                ));
                return Err(fail(outcome, FailedStep::Upload, error));
            }
        };
        advance(&mut outcome, ReloadState::Uploaded);

        // Uploaded -> PreCounted
        outcome.source_count = match self.extractor.row_count(&source.handle).await {
            Ok(count) => {
                events.report(format!("Record count of source {} is {count}.", spec.table_name()));
                Some(count)
            }
            Err(e) => {
                events.report(format!(
                    "Could not read record count of source {}: {e}",
                    spec.table_name()
                ));
                None
            }
        };
        outcome.pre_count = self.dataset_count(source, events, "Before").await;
        advance(&mut outcome, ReloadState::PreCounted);

        // PreCounted -> Replaced
        match self.replace(source, &uploaded, events).await {
            Ok(attempts) => {
                outcome.replace_attempts = attempts;
                events.report("Successful truncate+append.");
            }
            Err((attempts, error)) => {
                outcome.replace_attempts = attempts;
                events.fatal(format!(
                    "A problem occurred when truncating+appending feature service {}--tried {attempts} times. The dataset may now be empty; reload it once the cause is fixed. Run terminated.",
                    spec.title
                ));
                self.delete_uploaded(&uploaded, events).await;
                return Err(fail(outcome, FailedStep::Replace, error));
            }
        }
        if let Err(e) = artifact.discard() {
            events.trace(format!(
                "Could not discard staging package {}: {e}",
                artifact.package_name
            ));
        }
        advance(&mut outcome, ReloadState::Replaced);

        // Replaced -> PostCounted
        outcome.post_count = self.dataset_count(source, events, "After").await;
        advance(&mut outcome, ReloadState::PostCounted);

        // PostCounted -> CleanedUp
        self.delete_uploaded(&uploaded, events).await;
        advance(&mut outcome, ReloadState::CleanedUp);

        advance(&mut outcome, ReloadState::Done);
        outcome.status = ReloadStatus::Success;
        info!(
            item_id = %spec.item_id,
            upload_attempts = outcome.upload_attempts,
            replace_attempts = outcome.replace_attempts,
            pre_count = ?outcome.pre_count,
            post_count = ?outcome.post_count,
            "[RELOAD] Reload cycle complete"
        );
        Ok(outcome)
    }

    async fn upload(
        &self,
        spec: &SourceSpec,
        artifact: &StagingArtifact,
        events: &mut EventLog,
    ) -> Result<(UploadedItem, u32), (u32, ReloadError)> {
        let policy = RetryPolicy::new(self.settings.max_tries);
        let store = self.store;
        let workspace = self.workspace;
        let folder = self.settings.content_folder.as_str();
        let description = format!(
            "A temporary file for reloading data of feature service {}, which has Item-ID {}. This file can be deleted after reload.",
            spec.title, spec.item_id
        );
        let description = description.as_str();

        let result = policy
            .run(store, events, "uploading zipped staging package", move |attempt| async move {
                let payload = workspace.compress(artifact)?;
                debug!(attempt, upload_name = %payload.upload_name, "[UPLOAD] Uploading payload");
                let request = UploadRequest {
                    payload_path: payload.zip_path.clone(),
                    upload_name: payload.upload_name.clone(),
                    title: artifact.package_name.clone(),
                    description: description.to_string(),
                    folder: folder.to_string(),
                };
                let uploaded = store.upload(request).await;
                if let Err(e) = payload.discard() {
                    tracing::warn!(error = ?e, zip = %payload.zip_path.display(), "[UPLOAD] Could not discard payload");
                }
                uploaded.map_err(|e| ReloadError::TransientIo(format!("upload failed: {e}")))
            })
            .await;

        match result {
            Ok(done) => {
                if done.attempts > 1 {
                    events.alert(format!(
                        "ALERT - It took {} tries to successfully upload the staging package for feature service {}. This likely left some temporary items in folder {} in the content store. Check folder for cleanup.",
                        done.attempts, spec.title, folder
                    ));
                }
                events.note(format!(
                    "Uploaded {} as item {}.",
                    done.value.upload_name, done.value.id
                ));
                Ok((done.value, done.attempts))
            }
            Err(exhausted) => Err((exhausted.attempts, exhausted.last_error)),
        }
    }

    async fn replace(
        &self,
        source: &CheckedSource,
        uploaded: &UploadedItem,
        events: &mut EventLog,
    ) -> Result<u32, (u32, ReloadError)> {
        let policy = RetryPolicy::new(self.settings.max_tries);
        let store = self.store;
        let item_id = source.spec.item_id.as_str();
        let table_name = source.spec.table_name();
        let kind = source.kind;
        let uploaded_id = uploaded.id.as_str();

        let result = policy
            .run(store, events, "truncating+appending", move |attempt| async move {
                let dataset = store
                    .get_dataset(item_id)
                    .await
                    .map_err(|e| ReloadError::TransientIo(format!("dataset lookup failed: {e}")))?
                    .ok_or_else(|| {
                        ReloadError::TransientIo(format!("dataset {item_id} not found"))
                    })?;

                debug!(attempt, item_id, "[REPLACE] Truncating");
                store
                    .truncate(&dataset, kind)
                    .await
                    .map_err(|e| ReloadError::TransientIo(format!("truncate failed: {e}")))?;

                debug!(attempt, item_id, uploaded_id, "[REPLACE] Appending");
                store
                    .append(&dataset, kind, uploaded_id, table_name)
                    .await
                    .map_err(|e| ReloadError::TransientIo(format!("append failed: {e}")))
            })
            .await;

        match result {
            Ok(done) => {
                if done.attempts > 1 {
                    events.alert(format!(
                        "ALERT - It took {} tries to truncate+append feature service {}.",
                        done.attempts, source.spec.title
                    ));
                }
                Ok(done.attempts)
            }
            Err(exhausted) => Err((exhausted.attempts, exhausted.last_error)),
        }
    }

    /// Observational only: a failed count is noted and recorded as `None`.
    async fn dataset_count(
        &self,
        source: &CheckedSource,
        events: &mut EventLog,
        when: &str,
    ) -> Option<u64> {
        let title = &source.spec.title;
        let counted = match self.store.get_dataset(&source.spec.item_id).await {
            Ok(Some(dataset)) => self
                .store
                .row_count(&dataset, source.kind)
                .await
                .map_err(|e| e.to_string()),
            Ok(None) => Err("dataset not found".to_string()),
            Err(e) => Err(e.to_string()),
        };
        match counted {
            Ok(count) => {
                events.report(format!(
                    "{when} reloading, record count of feature service {title} is {count}."
                ));
                Some(count)
            }
            Err(e) => {
                events.report(format!(
                    "{when} reloading, could not read record count of feature service {title}: {e}"
                ));
                None
            }
        }
    }

    async fn delete_uploaded(&self, uploaded: &UploadedItem, events: &mut EventLog) {
        events.note(format!(
            "Deleting temporary item {} ({}) from the content store...",
            uploaded.id, uploaded.upload_name
        ));
        if let Err(e) = self.store.delete_item(&uploaded.id).await {
            tracing::warn!(item_id = %uploaded.id, error = %e, "[CLEANUP] Temporary item left behind");
            let error = ReloadError::Cleanup(e.to_string());
            events.alert(format!(
                "ALERT - A problem occurred deleting temporary item {} ({}) from the content store: {error}. This isn't a show stopper; however, it should be cleaned up.",
                uploaded.id, uploaded.upload_name
            ));
        }
    }
}

fn advance(outcome: &mut ReloadOutcome, next: ReloadState) {
    debug!(item_id = %outcome.item_id, from = ?outcome.state, to = ?next, "[RELOAD] State transition");
    outcome.state = next;
}

fn fail(mut outcome: ReloadOutcome, step: FailedStep, error: ReloadError) -> ReloadFailure {
    advance(&mut outcome, ReloadState::Failed(step));
    outcome.status = ReloadStatus::Failed(step);
    ReloadFailure { outcome, error }
}
