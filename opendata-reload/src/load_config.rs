/// `load_config` module: loads the static YAML config and injects secrets from the environment.
///
/// This module is the only place where the user-supplied YAML is parsed and mapped to the core's
/// strongly-typed settings.
///
/// # Responsibilities
/// - Parse the YAML file into typed sections, applying defaults for optional keys
/// - Resolve relative paths (`staging_root`, `log_file`) against the config file's directory
/// - Read `ARCGIS_USERNAME` / `ARCGIS_PASSWORD` from the environment; secrets never live in the file
/// - Reject configs the run could not honour (zero tries, duplicate or blank item ids)
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{bail, Result};
use opendata_reload_core::config::{ReloadSettings, SourceSpec, DEFAULT_MAX_TRIES};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const USERNAME_VAR: &str = "ARCGIS_USERNAME";
pub const PASSWORD_VAR: &str = "ARCGIS_PASSWORD";
pub const DEFAULT_LOG_FILE: &str = "opendata_reload.log";

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_portal_url")]
    portal_url: String,
    #[serde(default = "default_content_folder")]
    content_folder: String,
    #[serde(default = "default_max_tries")]
    max_tries: u32,
    #[serde(default)]
    staging_root: Option<PathBuf>,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    report: ReportSection,
    #[serde(default)]
    extractor: ExtractorSection,
    #[serde(default)]
    sources: Option<Vec<SourceSpec>>,
}

fn default_portal_url() -> String {
    "https://www.arcgis.com".to_string()
}

fn default_content_folder() -> String {
    "temp".to_string()
}

fn default_max_tries() -> u32 {
    DEFAULT_MAX_TRIES
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportSection {
    /// Receives the rendered report as JSON after every run.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorSection {
    #[serde(default = "default_ogr2ogr")]
    pub ogr2ogr: String,
    #[serde(default = "default_ogrinfo")]
    pub ogrinfo: String,
}

fn default_ogr2ogr() -> String {
    "ogr2ogr".to_string()
}

fn default_ogrinfo() -> String {
    "ogrinfo".to_string()
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            ogr2ogr: default_ogr2ogr(),
            ogrinfo: default_ogrinfo(),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fully merged configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub portal_url: String,
    pub settings: ReloadSettings,
    pub staging_root: PathBuf,
    pub log_file: PathBuf,
    pub report: ReportSection,
    pub extractor: ExtractorSection,
    pub sources: Vec<SourceSpec>,
    pub credentials: Credentials,
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            bail!("Failed to read config file {:?}: {}", path_ref, e);
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            bail!("Failed to parse config YAML: {e}");
        }
    };

    if raw.max_tries == 0 {
        error!("max_tries must be at least 1");
        bail!("max_tries must be at least 1");
    }

    let sources = raw.sources.unwrap_or_default();
    let mut seen = HashSet::new();
    for source in &sources {
        if source.item_id.trim().is_empty() || source.table.trim().is_empty() {
            error!(?source, "Source is missing its item_id or table");
            bail!(
                "Every source needs an item_id and a table (source titled {:?})",
                source.title
            );
        }
        if !seen.insert(source.item_id.as_str()) {
            error!(item_id = %source.item_id, "Duplicate item_id in config");
            bail!("Duplicate item_id in config: {}", source.item_id);
        }
        source.trace_loaded();
    }

    let credentials = Credentials {
        username: required_env(USERNAME_VAR)?,
        password: required_env(PASSWORD_VAR)?,
    };

    let base_dir = path_ref
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let staging_root = raw
        .staging_root
        .map(|p| resolve(&base_dir, p))
        .unwrap_or_else(|| base_dir.clone());
    let log_file = resolve(
        &base_dir,
        raw.log_file.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    );

    info!(
        portal_url = %raw.portal_url,
        content_folder = %raw.content_folder,
        max_tries = raw.max_tries,
        sources = sources.len(),
        staging_root = %staging_root.display(),
        "Config loaded and merged successfully"
    );

    Ok(CliConfig {
        portal_url: raw.portal_url,
        settings: ReloadSettings {
            content_folder: raw.content_folder,
            max_tries: raw.max_tries,
        },
        staging_root,
        log_file,
        report: raw.report,
        extractor: raw.extractor,
        sources,
        credentials,
    })
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) | Err(_) => {
            error!(var = name, "Required environment variable not set");
            bail!("{name} environment variable not set");
        }
    }
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
