#![doc = "ArcGIS Online implementation of the core `ContentStore` trait."]
//
//! # ArcGIS content store client
//!
//! Bridges [`opendata_reload_core::contract::ContentStore`] to the ArcGIS sharing and feature
//! service REST APIs:
//!
//! - `generateToken` opens a session; [`ArcGisClient`] keeps one token and one HTTP client and
//!   replaces both on [`ContentStore::reconnect`].
//! - Items are looked up and uploaded through `/sharing/rest/content`.
//! - Counts, `append` and `truncate` go to the hosted service's first layer or table; truncate
//!   uses the service's admin endpoint.
//!
//! The REST API reports most failures as HTTP 200 with an `error` object, so every response is
//! checked for one before it is read.

use async_trait::async_trait;
use opendata_reload_core::contract::{
    ContentStore, DatasetKind, RemoteDataset, SubLayer, UploadRequest, UploadedItem,
};
use opendata_reload_core::error::StoreError;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::load_config::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const APPEND_POLL_INTERVAL: Duration = Duration::from_secs(2);
const APPEND_MAX_POLLS: u32 = 900;
/// Token lifetime requested from `generateToken`, in minutes.
const TOKEN_EXPIRATION_MINUTES: &str = "120";

#[derive(Clone)]
struct Session {
    http: Client,
    token: String,
}

pub struct ArcGisClient {
    portal_url: String,
    credentials: Credentials,
    session: RwLock<Option<Session>>,
}

#[derive(Debug, Deserialize)]
struct ItemInfo {
    id: String,
    title: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceInfo {
    #[serde(default)]
    layers: Vec<LayerInfo>,
    #[serde(default)]
    tables: Vec<LayerInfo>,
}

#[derive(Debug, Deserialize)]
struct LayerInfo {
    id: u32,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserContent {
    #[serde(default)]
    folders: Vec<FolderInfo>,
}

#[derive(Debug, Deserialize)]
struct FolderInfo {
    id: String,
    title: String,
}

/// An `error` object in a REST response body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiError {
    code: i64,
    message_code: Option<String>,
    message: String,
}

impl ArcGisClient {
    pub fn new(portal_url: &str, credentials: Credentials) -> Self {
        Self {
            portal_url: portal_url.trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(None),
        }
    }

    fn sharing_url(&self, path: &str) -> String {
        format!("{}/sharing/rest{}", self.portal_url, path)
    }

    fn user_url(&self, path: &str) -> String {
        self.sharing_url(&format!(
            "/content/users/{}{}",
            self.credentials.username, path
        ))
    }

    async fn connect(&self) -> Result<Session, StoreError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let params = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("referer", self.portal_url.as_str()),
            ("expiration", TOKEN_EXPIRATION_MINUTES),
            ("f", "json"),
        ];
        let response = http
            .post(self.sharing_url("/generateToken"))
            .form(&params)
            .send()
            .await
            .map_err(transport)?;
        let body: Value = response.json().await.map_err(transport)?;

        if let Some(err) = api_error(&body) {
            error!(code = err.code, message = %err.message, "generateToken refused");
            return Err(StoreError::Auth(err.message));
        }
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Auth("generateToken returned no token".to_string()))?
            .to_string();

        info!(portal = %self.portal_url, user = %self.credentials.username, "Connected to ArcGIS portal");
        Ok(Session { http, token })
    }

    /// The current session, connecting first if there is none.
    async fn session(&self) -> Result<Session, StoreError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        let session = self.connect().await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, StoreError> {
        let session = self.session().await?;
        debug!(url, "GET");
        let response = session
            .http
            .get(url)
            .query(query)
            .query(&[("f", "json"), ("token", session.token.as_str())])
            .send()
            .await
            .map_err(transport)?;
        read_body(response).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, StoreError> {
        let session = self.session().await?;
        debug!(url, "POST");
        let mut params: Vec<(&str, &str)> = form.to_vec();
        params.push(("f", "json"));
        params.push(("token", session.token.as_str()));
        let response = session
            .http
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(transport)?;
        read_body(response).await
    }

    async fn folder_id(&self, folder: &str) -> Result<String, StoreError> {
        let body = self.get_json(&self.user_url(""), &[]).await?;
        let content: UserContent = parse(body)?;
        content
            .folders
            .into_iter()
            .find(|f| f.title.eq_ignore_ascii_case(folder))
            .map(|f| f.id)
            .ok_or_else(|| {
                StoreError::Rejected(format!(
                    "folder {folder:?} not found in content of {}",
                    self.credentials.username
                ))
            })
    }

    async fn wait_for_job(&self, status_url: &str) -> Result<(), StoreError> {
        for poll in 1..=APPEND_MAX_POLLS {
            let body = self.get_json(status_url, &[]).await?;
            match job_state(&body) {
                JobState::Completed => return Ok(()),
                JobState::Failed(reason) => return Err(StoreError::Rejected(reason)),
                JobState::Running => {
                    debug!(poll, status_url, "Append job still running");
                    tokio::time::sleep(APPEND_POLL_INTERVAL).await;
                }
            }
        }
        Err(StoreError::Transport(format!(
            "append job at {status_url} did not finish in time"
        )))
    }
}

#[async_trait]
impl ContentStore for ArcGisClient {
    async fn reconnect(&self) -> Result<(), StoreError> {
        let mut guard = self.session.write().await;
        *guard = None;
        let session = self.connect().await?;
        *guard = Some(session);
        Ok(())
    }

    async fn get_dataset(&self, item_id: &str) -> Result<Option<RemoteDataset>, StoreError> {
        let url = self.sharing_url(&format!("/content/items/{item_id}"));
        let body = match self.get_json(&url, &[]).await {
            Ok(body) => body,
            Err(StoreError::Rejected(message)) if is_missing_item(&message) => {
                info!(item_id, "Item not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let item: ItemInfo = parse(body)?;
        let service_url = item.url.ok_or_else(|| {
            StoreError::Rejected(format!("item {item_id} has no service URL"))
        })?;

        let service: ServiceInfo = parse(self.get_json(&service_url, &[]).await?)?;
        let to_sublayers = |infos: Vec<LayerInfo>| {
            infos
                .into_iter()
                .map(|l| SubLayer {
                    id: l.id,
                    name: l.name,
                })
                .collect::<Vec<_>>()
        };
        Ok(Some(RemoteDataset {
            item_id: item.id,
            title: item.title,
            url: service_url.trim_end_matches('/').to_string(),
            layers: to_sublayers(service.layers),
            tables: to_sublayers(service.tables),
        }))
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadedItem, StoreError> {
        info!(
            upload_name = %request.upload_name,
            folder = %request.folder,
            "Uploading staging payload"
        );
        let folder_id = self.folder_id(&request.folder).await?;
        let bytes = tokio::fs::read(&request.payload_path).await?;
        let file_name = format!("{}.zip", request.upload_name);

        let session = self.session().await?;
        let form = multipart::Form::new()
            .text("f", "json")
            .text("token", session.token.clone())
            .text("title", request.title.clone())
            .text("type", "File Geodatabase")
            .text("description", request.description.clone())
            .text("tags", "temporary")
            .text("overwrite", "true")
            .text("filename", file_name.clone())
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let response = session
            .http
            .post(self.user_url(&format!("/{folder_id}/addItem")))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let body = read_body(response).await?;
        require_success(&body, "addItem")?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Rejected("addItem returned no item id".to_string()))?
            .to_string();

        info!(item_id = %id, upload_name = %request.upload_name, "Uploaded staging payload");
        Ok(UploadedItem {
            id,
            upload_name: request.upload_name,
        })
    }

    async fn row_count(
        &self,
        dataset: &RemoteDataset,
        kind: DatasetKind,
    ) -> Result<u64, StoreError> {
        let url = format!("{}/query", sublayer_url(dataset, kind)?);
        let body = self
            .get_json(&url, &[("where", "1=1"), ("returnCountOnly", "true")])
            .await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Rejected(format!("no count in response from {url}")))
    }

    async fn truncate(
        &self,
        dataset: &RemoteDataset,
        kind: DatasetKind,
    ) -> Result<(), StoreError> {
        let url = format!("{}/truncate", admin_url(&sublayer_url(dataset, kind)?));
        info!(item_id = %dataset.item_id, url = %url, "Truncating");
        let body = self
            .post_form(&url, &[("async", "false"), ("attachmentOnly", "false")])
            .await?;
        require_success(&body, "truncate")
    }

    async fn append(
        &self,
        dataset: &RemoteDataset,
        kind: DatasetKind,
        item_id: &str,
        source_table_name: &str,
    ) -> Result<(), StoreError> {
        let url = format!("{}/append", sublayer_url(dataset, kind)?);
        info!(item_id = %dataset.item_id, source_item = item_id, source_table_name, "Appending");
        let body = self
            .post_form(
                &url,
                &[
                    ("appendItemId", item_id),
                    ("appendUploadFormat", "filegdb"),
                    ("sourceTableName", source_table_name),
                    ("upsert", "false"),
                    ("rollbackOnFailure", "true"),
                ],
            )
            .await?;

        match body.get("statusUrl").and_then(Value::as_str) {
            Some(status_url) => self.wait_for_job(status_url).await,
            None => require_success(&body, "append"),
        }
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError> {
        info!(item_id, "Deleting content item");
        let body = self
            .post_form(&self.user_url(&format!("/items/{item_id}/delete")), &[])
            .await?;
        require_success(&body, "delete").map_err(|e| {
            warn!(item_id, error = %e, "Delete refused");
            e
        })
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

async fn read_body(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        return Err(StoreError::Transport(format!("HTTP {status}")));
    }
    let body: Value = response.json().await.map_err(transport)?;
    match api_error(&body) {
        Some(err) => Err(StoreError::Rejected(err.to_string())),
        None => Ok(body),
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Rejected(format!("unexpected response: {e}")))
}

fn api_error(body: &Value) -> Option<ApiError> {
    let err = body.get("error")?;
    Some(ApiError {
        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
        message_code: err
            .get("messageCode")
            .and_then(Value::as_str)
            .map(str::to_string),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message_code {
            Some(mc) => write!(f, "{} ({}, {})", self.message, self.code, mc),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

/// `CONT_0001` is "Item does not exist or is inaccessible".
fn is_missing_item(message: &str) -> bool {
    message.contains("CONT_0001") || message.contains("(404")
}

fn require_success(body: &Value, operation: &str) -> Result<(), StoreError> {
    match body.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        _ => Err(StoreError::Rejected(format!("{operation} was not successful: {body}"))),
    }
}

fn sublayer_url(dataset: &RemoteDataset, kind: DatasetKind) -> Result<String, StoreError> {
    let sublayer = dataset.sublayer(kind).ok_or_else(|| {
        StoreError::Rejected(format!("{} has no {kind:?}", dataset.item_id))
    })?;
    Ok(format!("{}/{}", dataset.url, sublayer.id))
}

/// `.../rest/services/...` becomes `.../rest/admin/services/...`.
fn admin_url(service_url: &str) -> String {
    service_url.replacen("/rest/services/", "/rest/admin/services/", 1)
}

#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Running,
    Completed,
    Failed(String),
}

fn job_state(body: &Value) -> JobState {
    match body.get("status").and_then(Value::as_str) {
        Some("Completed") => JobState::Completed,
        Some(s @ ("Failed" | "CompletedWithErrors")) => JobState::Failed(format!("append job {s}: {body}")),
        _ => JobState::Running,
    }
}
