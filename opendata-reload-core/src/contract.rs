//! # contract: interfaces to the content store and the source database
//!
//! The reload pipeline never talks HTTP or SQL itself. It drives two collaborators:
//! - [`ContentStore`]: the hosted content layer (upload items, look up the published dataset,
//!   count, truncate, append, delete).
//! - [`Extractor`]: the source database (existence check, row count, copy a table into a
//!   staging package directory).
//!
//! Both traits are annotated for `mockall`, so tests can script every remote answer.

use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::SourceHandle;
use crate::error::{ExtractError, StoreError};

/// Whether a hosted dataset is a spatial layer or a non-spatial table of its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetKind {
    Layer,
    Table,
}

/// A layer or table inside a hosted service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubLayer {
    pub id: u32,
    pub name: String,
}

/// Handle to a published, long-lived dataset, as returned by [`ContentStore::get_dataset`].
///
/// Handles can go stale with the session that produced them, so they are fetched again for
/// every replace attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataset {
    pub item_id: String,
    pub title: String,
    /// Service URL of the hosted item.
    pub url: String,
    pub layers: Vec<SubLayer>,
    pub tables: Vec<SubLayer>,
}

impl RemoteDataset {
    /// A service with exactly one layer is spatial; failing that, one with exactly one table
    /// is non-spatial. Any other shape is unsupported.
    pub fn kind(&self) -> Option<DatasetKind> {
        if self.layers.len() == 1 {
            Some(DatasetKind::Layer)
        } else if self.tables.len() == 1 {
            Some(DatasetKind::Table)
        } else {
            None
        }
    }

    /// The first layer or table of the given kind.
    pub fn sublayer(&self, kind: DatasetKind) -> Option<&SubLayer> {
        match kind {
            DatasetKind::Layer => self.layers.first(),
            DatasetKind::Table => self.tables.first(),
        }
    }
}

/// Everything needed to upload one staging payload as a new content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub payload_path: PathBuf,
    /// Name of the payload as uploaded; fresh for every attempt.
    pub upload_name: String,
    pub title: String,
    pub description: String,
    pub folder: String,
}

/// A transient content item created by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedItem {
    pub id: String,
    pub upload_name: String,
}

/// Trait for the hosted content layer.
///
/// Implementations hold one session. [`ContentStore::reconnect`] tears it down and opens a
/// new one; the pipeline calls it before every upload and replace attempt.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Drop the current session and establish a fresh one.
    async fn reconnect(&self) -> Result<(), StoreError>;

    /// Look up a hosted dataset by item id. `Ok(None)` when no such item exists.
    async fn get_dataset(&self, item_id: &str) -> Result<Option<RemoteDataset>, StoreError>;

    /// Upload a payload file as a new item in the request's folder.
    async fn upload(&self, request: UploadRequest) -> Result<UploadedItem, StoreError>;

    /// Number of rows currently in the dataset's layer or table.
    async fn row_count(&self, dataset: &RemoteDataset, kind: DatasetKind)
        -> Result<u64, StoreError>;

    /// Remove every row of the dataset's layer or table.
    async fn truncate(&self, dataset: &RemoteDataset, kind: DatasetKind)
        -> Result<(), StoreError>;

    /// Load rows into the dataset from an uploaded item, reading `source_table_name` from it.
    async fn append(
        &self,
        dataset: &RemoteDataset,
        kind: DatasetKind,
        item_id: &str,
        source_table_name: &str,
    ) -> Result<(), StoreError>;

    /// Delete a content item.
    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError>;
}

/// Trait for the source database.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Whether the source table can be found.
    async fn exists(&self, source: &SourceHandle) -> Result<bool, ExtractError>;

    /// Number of rows in the source table.
    async fn row_count(&self, source: &SourceHandle) -> Result<u64, ExtractError>;

    /// Copy the source table's rows and schema into a new package at `package_dir`, naming the
    /// copied table `table_name`. The implementor creates `package_dir`.
    async fn extract(
        &self,
        source: &SourceHandle,
        package_dir: &Path,
        table_name: &str,
    ) -> Result<(), ExtractError>;
}
