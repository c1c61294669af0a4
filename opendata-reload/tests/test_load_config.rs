use opendata_reload::load_config::{load_config, DEFAULT_LOG_FILE, PASSWORD_VAR, USERNAME_VAR};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::{tempdir, NamedTempFile};

fn set_credentials() {
    env::set_var(USERNAME_VAR, "publisher");
    env::set_var(PASSWORD_VAR, "not-used");
}

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// A full config loads with every section mapped and secrets taken from the environment.
#[tokio::test]
#[serial]
async fn test_load_config_full() {
    let config_yaml = r#"
portal_url: https://bigcity.maps.arcgis.com
content_folder: reload-temp
max_tries: 5
staging_root: /var/tmp/opendata
log_file: /var/log/opendata_reload.log
report:
  webhook_url: https://hooks.example/reload
extractor:
  ogr2ogr: /opt/gdal/bin/ogr2ogr
sources:
  - connection: "PG:dbname=bigcity"
    namespace: ""
    table: BigCity.GISadmin.parcels
    title: Big City Parcels
    item_id: ac32ee49-9648-4963-8e61-b974372852e7
    days: "U"
  - connection: "PG:dbname=bigcity"
    namespace: Cadastre
    table: BigCity.GISadmin.owners
    title: Big City Owners
    item_id: 0f4e1d2c
    days: "M, w"
"#;
    let file = config_file(config_yaml);
    set_credentials();

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.portal_url, "https://bigcity.maps.arcgis.com");
    assert_eq!(config.settings.content_folder, "reload-temp");
    assert_eq!(config.settings.max_tries, 5);
    assert_eq!(config.staging_root, PathBuf::from("/var/tmp/opendata"));
    assert_eq!(config.log_file, PathBuf::from("/var/log/opendata_reload.log"));
    assert_eq!(
        config.report.webhook_url.as_deref(),
        Some("https://hooks.example/reload")
    );
    assert_eq!(config.extractor.ogr2ogr, "/opt/gdal/bin/ogr2ogr");
    assert_eq!(config.extractor.ogrinfo, "ogrinfo");
    assert_eq!(config.credentials.username, "publisher");

    let item_ids: Vec<&str> = config.sources.iter().map(|s| s.item_id.as_str()).collect();
    assert_eq!(item_ids, ["ac32ee49-9648-4963-8e61-b974372852e7", "0f4e1d2c"]);
    assert_eq!(config.sources[0].resolve().namespace, None);
    assert_eq!(
        config.sources[1].resolve().namespace.as_deref(),
        Some("Cadastre")
    );
}

/// Optional keys fall back to defaults; relative paths resolve next to the config file.
#[tokio::test]
#[serial]
async fn test_load_config_defaults_and_relative_paths() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reload.yaml");
    write(&path, "staging_root: staging\nsources: []\n").unwrap();
    set_credentials();

    let config = load_config(&path).expect("Config should load");

    assert_eq!(config.portal_url, "https://www.arcgis.com");
    assert_eq!(config.settings.content_folder, "temp");
    assert_eq!(config.settings.max_tries, 3);
    assert_eq!(config.staging_root, dir.path().join("staging"));
    assert_eq!(config.log_file, dir.path().join(DEFAULT_LOG_FILE));
    assert!(config.report.webhook_url.is_none());
    assert!(config.sources.is_empty());
}

#[tokio::test]
#[serial]
async fn test_load_config_missing_password_fails() {
    let file = config_file("sources: []\n");
    env::set_var(USERNAME_VAR, "publisher");
    env::remove_var(PASSWORD_VAR);

    let err = load_config(file.path()).expect_err("Missing password must fail");
    assert!(err.to_string().contains(PASSWORD_VAR));
}

#[tokio::test]
#[serial]
async fn test_load_config_zero_tries_fails() {
    let file = config_file("max_tries: 0\nsources: []\n");
    set_credentials();

    let err = load_config(file.path()).expect_err("Zero tries must fail");
    assert!(err.to_string().contains("max_tries"));
}

#[tokio::test]
#[serial]
async fn test_load_config_duplicate_item_ids_fail() {
    let source = r#"
  - connection: "PG:dbname=bigcity"
    table: BigCity.GISadmin.parcels
    title: Big City Parcels
    item_id: same-id
    days: "U"
"#;
    let file = config_file(&format!("sources:{source}{source}"));
    set_credentials();

    let err = load_config(file.path()).expect_err("Duplicate item ids must fail");
    assert!(err.to_string().contains("Duplicate item_id"));
}

#[tokio::test]
#[serial]
async fn test_load_config_invalid_yaml_fails() {
    let file = config_file("sources: [unclosed\n");
    set_credentials();

    let err = load_config(file.path()).expect_err("Broken YAML must fail");
    assert!(err.to_string().contains("Failed to parse config YAML"));
}
