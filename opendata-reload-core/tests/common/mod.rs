#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use opendata_reload_core::config::SourceSpec;
use opendata_reload_core::contract::{
    DatasetKind, MockContentStore, MockExtractor, RemoteDataset, SubLayer, UploadedItem,
};
use opendata_reload_core::error::StoreError;

pub fn spec(item_id: &str, days: &str) -> SourceSpec {
    SourceSpec {
        connection: "PG:dbname=bigcity".to_string(),
        namespace: None,
        table: "BigCity.GISadmin.parcels".to_string(),
        title: "Big City Parcels".to_string(),
        item_id: item_id.to_string(),
        days: days.to_string(),
    }
}

pub fn layer_dataset(item_id: &str) -> RemoteDataset {
    RemoteDataset {
        item_id: item_id.to_string(),
        title: "Big City Parcels".to_string(),
        url: "https://services.example.com/arcgis/rest/services/parcels/FeatureServer".to_string(),
        layers: vec![SubLayer {
            id: 0,
            name: "parcels".to_string(),
        }],
        tables: vec![],
    }
}

/// Extractor whose sources all exist, hold 42 rows and extract into a one-file package.
pub fn working_extractor() -> MockExtractor {
    let mut extractor = MockExtractor::new();
    extractor.expect_exists().returning(|_| Ok(true));
    extractor.expect_row_count().returning(|_| Ok(42));
    extractor.expect_extract().returning(|_, dir, _| {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("a00000009.gdbtable"), b"rows")?;
        Ok(())
    });
    extractor
}

/// How a scripted store should behave.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Number of leading upload calls that fail.
    pub upload_failures: u32,
    pub truncate_fails: bool,
    pub append_fails: bool,
    pub delete_fails: bool,
    pub pre_count: u64,
    pub post_count: u64,
    /// Dataset shape returned for every lookup; defaults to one layer.
    pub dataset: Option<RemoteDataset>,
}

/// Everything a scripted store was asked to do.
#[derive(Debug, Default)]
pub struct Calls {
    pub reconnects: u32,
    pub upload_names: Vec<String>,
    pub upload_titles: Vec<String>,
    pub truncates: u32,
    pub appends: Vec<(String, String)>,
    pub deletes: Vec<String>,
    pub counted_kinds: Vec<DatasetKind>,
}

pub fn scripted_store(script: Script) -> (MockContentStore, Arc<Mutex<Calls>>) {
    let calls = Arc::new(Mutex::new(Calls::default()));
    let mut store = MockContentStore::new();

    let log = calls.clone();
    store.expect_reconnect().returning(move || {
        log.lock().unwrap().reconnects += 1;
        Ok(())
    });

    let dataset = script.dataset.clone();
    store.expect_get_dataset().returning(move |id| {
        Ok(Some(dataset.clone().unwrap_or_else(|| layer_dataset(id))))
    });

    let log = calls.clone();
    let upload_failures = script.upload_failures;
    store.expect_upload().returning(move |req| {
        let mut log = log.lock().unwrap();
        log.upload_names.push(req.upload_name.clone());
        log.upload_titles.push(req.title.clone());
        assert!(req.payload_path.is_file(), "payload should exist while uploading");
        if log.upload_names.len() as u32 <= upload_failures {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        Ok(UploadedItem {
            id: "tmp-item".to_string(),
            upload_name: req.upload_name,
        })
    });

    let log = calls.clone();
    let (pre, post) = (script.pre_count, script.post_count);
    store.expect_row_count().returning(move |_, kind| {
        let mut log = log.lock().unwrap();
        log.counted_kinds.push(kind);
        Ok(if log.counted_kinds.len() == 1 { pre } else { post })
    });

    let log = calls.clone();
    let truncate_fails = script.truncate_fails;
    store.expect_truncate().returning(move |_, _| {
        log.lock().unwrap().truncates += 1;
        if truncate_fails {
            Err(StoreError::Rejected("truncate returned success=false".to_string()))
        } else {
            Ok(())
        }
    });

    let log = calls.clone();
    let append_fails = script.append_fails;
    store.expect_append().returning(move |_, _, item_id, table| {
        log.lock()
            .unwrap()
            .appends
            .push((item_id.to_string(), table.to_string()));
        if append_fails {
            Err(StoreError::Rejected("append job failed".to_string()))
        } else {
            Ok(())
        }
    });

    let log = calls.clone();
    let delete_fails = script.delete_fails;
    store.expect_delete_item().returning(move |item_id| {
        log.lock().unwrap().deletes.push(item_id.to_string());
        if delete_fails {
            Err(StoreError::Transport("timed out".to_string()))
        } else {
            Ok(())
        }
    });

    (store, calls)
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
