//! Push/pull transport to the sync server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::changeset::ChangeSet;
use super::error::SyncError;
use crate::clock::Millis;
use crate::config::SyncConfig;

/// Body of `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub changes: ChangeSet,
    #[serde(default)]
    pub last_pulled_at: Option<Millis>,
}

/// Body returned by `GET /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub changes: ChangeSet,
    /// Server time the next pull should start from.
    pub timestamp: Millis,
}

/// The network side of a sync round.
pub trait Transport: Send + Sync + 'static {
    /// Uploads local changes. Success means the server durably accepted all of them.
    fn push(&self, request: &PushRequest) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Downloads every change newer than `last_pulled_at`, or everything when `None`.
    fn pull(
        &self,
        last_pulled_at: Option<Millis>,
        schema_version: i64,
    ) -> impl Future<Output = Result<PullResponse, SyncError>> + Send;

    /// Cheap reachability check.
    fn ping(&self) -> impl Future<Output = bool> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn push(&self, request: &PushRequest) -> impl Future<Output = Result<(), SyncError>> + Send {
        (**self).push(request)
    }

    fn pull(
        &self,
        last_pulled_at: Option<Millis>,
        schema_version: i64,
    ) -> impl Future<Output = Result<PullResponse, SyncError>> + Send {
        (**self).pull(last_pulled_at, schema_version)
    }

    fn ping(&self) -> impl Future<Output = bool> + Send {
        (**self).ping()
    }
}

/// HTTP transport with bearer-token auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&server_url.into()),
            api_key: api_key.into(),
        })
    }

    /// Creates a transport from config.
    ///
    /// Returns `NotConfigured` unless both server URL and API key are set.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or(SyncError::NotConfigured)?;
        let api_key = config.api_key.clone().ok_or(SyncError::NotConfigured)?;

        Self::new(server_url, api_key, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sync_url(&self) -> String {
        format!("{}/sync", self.base_url)
    }

    fn pull_url(&self, last_pulled_at: Option<Millis>, schema_version: i64) -> String {
        match last_pulled_at {
            Some(ts) => format!(
                "{}?last_pulled_at={}&schema_version={}",
                self.sync_url(),
                ts,
                schema_version
            ),
            None => format!("{}?schema_version={}", self.sync_url(), schema_version),
        }
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Trims trailing slashes and defaults to `http://` when no scheme is given.
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

fn request_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Transport("request timed out".to_string())
    } else if e.is_connect() {
        SyncError::Transport(format!("connection failed: {}", e))
    } else {
        SyncError::Transport(e.to_string())
    }
}

/// Maps non-success statuses onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(message),
        StatusCode::CONFLICT => SyncError::AlreadySyncing,
        s if s.is_server_error() => {
            SyncError::Transport(format!("server error {}: {}", s.as_u16(), message))
        }
        s => SyncError::ServerRejection {
            status: s.as_u16(),
            message,
        },
    }
}

impl Transport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.sync_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(request_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn pull(
        &self,
        last_pulled_at: Option<Millis>,
        schema_version: i64,
    ) -> Result<PullResponse, SyncError> {
        let response = self
            .client
            .get(self.pull_url(last_pulled_at, schema_version))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(request_error)?;

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(request_error)?;

        serde_json::from_str(&body).map_err(|e| SyncError::Malformed(e.to_string()))
    }

    async fn ping(&self) -> bool {
        match self.client.get(self.health_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Sync server unreachable");
                false
            }
        }
    }
}
