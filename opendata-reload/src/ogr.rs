//! GDAL command-line implementation of the core `Extractor` trait.
//!
//! `ogrinfo` answers existence and row-count questions; `ogr2ogr` copies a source table into a
//! new file geodatabase (`OpenFileGDB` driver). Both binaries are configurable so a specific GDAL
//! install can be pinned in the config file.
//!
//! GDAL drivers expose tables inside feature datasets as top-level layers, so a source is
//! addressed by its table name alone. The handle's namespace only appears in log output.

use async_trait::async_trait;
use opendata_reload_core::config::SourceHandle;
use opendata_reload_core::contract::Extractor;
use opendata_reload_core::error::ExtractError;
use std::ffi::OsString;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::load_config::ExtractorSection;

pub struct OgrExtractor {
    ogr2ogr: String,
    ogrinfo: String,
}

impl OgrExtractor {
    pub fn new(section: &ExtractorSection) -> Self {
        Self {
            ogr2ogr: section.ogr2ogr.clone(),
            ogrinfo: section.ogrinfo.clone(),
        }
    }

    async fn ogrinfo_summary(&self, source: &SourceHandle) -> Result<Output, ExtractError> {
        debug!(source = %source.path(), "Running ogrinfo");
        let output = Command::new(&self.ogrinfo)
            .args(summary_args(source))
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl Extractor for OgrExtractor {
    async fn exists(&self, source: &SourceHandle) -> Result<bool, ExtractError> {
        let output = self.ogrinfo_summary(source).await?;
        if !output.status.success() {
            debug!(
                source = %source.path(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ogrinfo could not open source"
            );
        }
        Ok(output.status.success())
    }

    async fn row_count(&self, source: &SourceHandle) -> Result<u64, ExtractError> {
        let output = self.ogrinfo_summary(source).await?;
        if !output.status.success() {
            return Err(ExtractError::NotFound(source.path()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_feature_count(&stdout).ok_or_else(|| {
            ExtractError::Command(format!("no feature count in ogrinfo output for {}", source.path()))
        })
    }

    async fn extract(
        &self,
        source: &SourceHandle,
        package_dir: &Path,
        table_name: &str,
    ) -> Result<(), ExtractError> {
        info!(
            source = %source.path(),
            package = %package_dir.display(),
            table_name,
            "Copying source table into file geodatabase"
        );
        let output = Command::new(&self.ogr2ogr)
            .args(copy_args(source, package_dir, table_name))
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(source = %source.path(), %stderr, "ogr2ogr failed");
            Err(ExtractError::Command(format!(
                "ogr2ogr exited with {} for {}: {stderr}",
                output.status,
                source.path()
            )))
        }
    }
}

/// `ogrinfo -ro -so <connection> <table>`
fn summary_args(source: &SourceHandle) -> Vec<OsString> {
    vec![
        "-ro".into(),
        "-so".into(),
        source.connection.as_str().into(),
        source.table.as_str().into(),
    ]
}

/// `ogr2ogr -f OpenFileGDB <package_dir> <connection> <table> -nln <table_name>`
fn copy_args(source: &SourceHandle, package_dir: &Path, table_name: &str) -> Vec<OsString> {
    vec![
        "-f".into(),
        "OpenFileGDB".into(),
        package_dir.as_os_str().to_os_string(),
        source.connection.as_str().into(),
        source.table.as_str().into(),
        "-nln".into(),
        table_name.into(),
    ]
}

/// Reads the `Feature Count: N` line of an `ogrinfo -so` summary.
fn parse_feature_count(summary: &str) -> Option<u64> {
    summary
        .lines()
        .find_map(|line| line.trim().strip_prefix("Feature Count:"))
        .and_then(|count| count.trim().parse().ok())
}
