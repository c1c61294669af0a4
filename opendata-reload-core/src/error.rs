//! Error types for the reload pipeline.
//!
//! [`ReloadError`] is the closed taxonomy every step boundary maps into. The collaborator errors
//! ([`StoreError`], [`ExtractError`]) stay close to their transport and are classified by the
//! step that observed them, not by their own variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReloadError {
    /// Missing source, missing or mismatched hosted item, unsupported service shape, unusable
    /// staging directory. Fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Packaging the source data failed. Fatal, never retried.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// A remote call failed during upload or replace. Retried, fatal once retries run out.
    #[error("transient remote error: {0}")]
    TransientIo(String),

    /// A collaborator panicked mid-run. Caught at the top of the run, always fatal.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// Temporary artifacts could not be removed. Never fatal.
    #[error("cleanup error: {0}")]
    Cleanup(String),
}

impl ReloadError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReloadError::Cleanup(_))
    }
}

/// Errors reported by a [`crate::contract::ContentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The service answered but refused or failed the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by an [`crate::contract::Extractor`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("extraction command failed: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
