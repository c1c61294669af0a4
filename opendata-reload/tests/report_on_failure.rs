use opendata_reload::report::{append_log, Report, ERROR_SUBJECT};
use opendata_reload_core::config::{ReloadSettings, SourceSpec};
use opendata_reload_core::contract::{MockContentStore, MockExtractor};
use opendata_reload_core::orchestrator::{reload_all, RunRequest};
use opendata_reload_core::schedule::Weekday;
use tempfile::tempdir;

fn source() -> SourceSpec {
    SourceSpec {
        connection: "PG:dbname=bigcity".to_string(),
        namespace: None,
        table: "BigCity.GISadmin.parcels".to_string(),
        title: "Big City Parcels".to_string(),
        item_id: "item-a".to_string(),
        days: "M".to_string(),
    }
}

/// A collaborator that panics mid-check still yields an ERROR report and a log entry.
#[tokio::test]
async fn panicking_store_produces_error_report_and_log_entry() {
    let dir = tempdir().unwrap();
    let staging_root = dir.path().join("staging");
    let log_file = dir.path().join("activity.log");
    let sources = vec![source()];
    let settings = ReloadSettings::default();

    let mut extractor = MockExtractor::new();
    extractor.expect_exists().returning(|_| Ok(true));
    let mut store = MockContentStore::new();
    store.expect_reconnect().returning(|| Ok(()));
    store
        .expect_get_dataset()
        .returning(|_| panic!("session state corrupted"));

    let report = reload_all(
        RunRequest {
            sources: &sources,
            settings: &settings,
            staging_root: &staging_root,
            today: Weekday::Monday,
        },
        &store,
        &extractor,
    )
    .await;

    assert!(!report.succeeded());
    let rendered = Report::render(&report.events, !report.succeeded());
    assert_eq!(rendered.subject, ERROR_SUBJECT);
    assert!(rendered.body.contains("session state corrupted"));

    append_log(&log_file, report.events.notes()).await.unwrap();
    let log = std::fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("Run terminated due to error condition"));
    assert!(!staging_root.exists(), "no workspace is created before checks pass");
}
