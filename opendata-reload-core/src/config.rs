use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::schedule::{self, Weekday};

/// Prefix given to every staging artifact, locally and in the content store, so leftovers are
/// recognisable as safe to delete.
pub const STAGING_PREFIX: &str = "DeleteMe_";

/// Default number of attempts for the upload and the truncate+append steps.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// One configured reload pair: a source table and the hosted dataset it feeds.
///
/// Identity is the remote `item_id`. Immutable once loaded; the resolved source location lives
/// in [`SourceHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Connection string of the source database.
    pub connection: String,
    /// Containing dataset of the source table, when it has one. Recorded in the source path
    /// shown in notes; extractors that expose tables as top-level layers address the table
    /// without it.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Source table name, schema-qualified when the database uses prefixes.
    pub table: String,
    /// Display title of the hosted item (matched case-insensitively).
    pub title: String,
    /// Item id of the hosted service holding the dataset.
    pub item_id: String,
    /// Comma separated weekday symbols, see [`crate::schedule`].
    pub days: String,
}

impl SourceSpec {
    /// Table name without any `database.owner.` prefix.
    pub fn table_name(&self) -> &str {
        match self.table.rfind('.') {
            Some(i) => &self.table[i + 1..],
            None => &self.table,
        }
    }

    pub fn is_due(&self, today: Weekday) -> bool {
        schedule::is_due(today, &self.days)
    }

    /// Name of the local staging package for this source.
    pub fn package_name(&self) -> String {
        format!("{STAGING_PREFIX}{}.gdb", self.item_id)
    }

    pub fn resolve(&self) -> SourceHandle {
        SourceHandle {
            connection: self.connection.clone(),
            namespace: self
                .namespace
                .as_deref()
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string),
            table: self.table.clone(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            item_id = %self.item_id,
            title = %self.title,
            table = %self.table,
            days = %self.days,
            "Loaded source"
        );
        debug!(?self, "Source loaded (full debug)");
    }
}

/// Resolved location of a source table, derived once from a [`SourceSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHandle {
    pub connection: String,
    pub namespace: Option<String>,
    pub table: String,
}

impl SourceHandle {
    /// Human-readable path, `connection/namespace/table`.
    pub fn path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.connection, ns, self.table),
            None => format!("{}/{}", self.connection, self.table),
        }
    }
}

/// Settings shared by every reload cycle of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSettings {
    /// Folder in the content store user's content that receives staging uploads.
    pub content_folder: String,
    /// Attempts per upload and per truncate+append; values below 1 count as 1.
    pub max_tries: u32,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            content_folder: "temp".to_string(),
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}
