// src/core/api.rs

use crate::config::ApiSettings;
use crate::core::errors::ApiError;
use crate::core::models::{ScanStatus, TaskId};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Timeout of a single readiness probe.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of response-body bytes kept in `ApiError::Status`.
const ERROR_BODY_LIMIT: usize = 512;

/// The engine's REST control surface.
///
/// Every call is a single request/response round trip; retry decisions belong
/// to the callers.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Readiness handshake: succeeds once the control endpoint answers at all.
    async fn ping(&self) -> Result<(), ApiError>;

    /// Creates a scan task from a prepared request body.
    async fn create_scan(&self, request: &Value) -> Result<TaskId, ApiError>;

    async fn scan_status(&self, task: &TaskId) -> Result<ScanStatus, ApiError>;

    async fn resume_scan(&self, task: &TaskId) -> Result<(), ApiError>;

    /// Fetches the full scan payload, including whatever findings exist so far.
    async fn fetch_findings(&self, task: &TaskId) -> Result<Value, ApiError>;
}

/// `ControlApi` over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct RestControlApi {
    client: Client,
    base_url: String,
    prefix: String,
    request_timeout: Duration,
    export_timeout: Duration,
}

impl RestControlApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .user_agent(concat!("VanguardOrchestrator/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url(),
            prefix: settings.prefix.trim_end_matches('/').to_string(),
            request_timeout: settings.request_timeout,
            export_timeout: settings.export_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.prefix, path)
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Response, ApiError> {
        request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(timeout)
            } else {
                ApiError::Transport(e)
            }
        })
    }

    async fn json_body(response: Response) -> Result<Value, ApiError> {
        let response = ensure_success(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Malformed(format!("response body is not JSON: {}", e)))
    }
}

/// Turns non-2xx responses into `ApiError::Status`, keeping a bounded excerpt of the body.
async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ApiError::Status { status: status.as_u16(), body })
}

/// Extracts the task identifier from a `Location` header such as `/v0.1/scan/7`.
pub fn task_id_from_location(location: &str) -> Option<TaskId> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(TaskId::new)
}

/// Fallback for engines that return the identifier in the body instead.
fn task_id_from_body(body: &Value) -> Option<TaskId> {
    ["task_id", "id"].iter().find_map(|key| match body.get(*key)? {
        Value::String(s) => TaskId::new(s.clone()),
        Value::Number(n) => TaskId::new(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl ControlApi for RestControlApi {
    async fn ping(&self) -> Result<(), ApiError> {
        let url = format!("{}/", self.base_url);
        let response = self.send(self.client.get(&url), PING_TIMEOUT).await?;
        match response.status() {
            // A bare 404 on the root still proves the API listener is up.
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(ApiError::Status { status: status.as_u16(), body: String::new() }),
        }
    }

    async fn create_scan(&self, request: &Value) -> Result<TaskId, ApiError> {
        let url = self.url("/scan");
        debug!(url = %url, "Creating scan.");
        let response = self.send(self.client.post(&url).json(request), self.request_timeout).await?;
        let response = ensure_success(response).await?;

        if let Some(location) = response.headers().get(LOCATION) {
            let location = location
                .to_str()
                .map_err(|_| ApiError::Malformed("Location header is not valid UTF-8".to_string()))?;
            return task_id_from_location(location).ok_or_else(|| {
                ApiError::Malformed(format!("no task identifier in Location header '{}'", location))
            });
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        task_id_from_body(&body)
            .ok_or_else(|| ApiError::Malformed("scan created but no task identifier returned".to_string()))
    }

    async fn scan_status(&self, task: &TaskId) -> Result<ScanStatus, ApiError> {
        let url = self.url(&format!("/scan/{}", task));
        let response = self.send(self.client.get(&url), self.request_timeout).await?;
        let payload = Self::json_body(response).await?;
        ScanStatus::from_payload(&payload).map_err(ApiError::Malformed)
    }

    async fn resume_scan(&self, task: &TaskId) -> Result<(), ApiError> {
        let url = self.url(&format!("/scan/{}/resume", task));
        debug!(url = %url, "Requesting resume.");
        let response = self.send(self.client.post(&url), self.request_timeout).await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn fetch_findings(&self, task: &TaskId) -> Result<Value, ApiError> {
        let url = self.url(&format!("/scan/{}", task));
        let request = self.client.get(&url).header(ACCEPT, "application/json");
        let response = self.send(request, self.export_timeout).await?;
        Self::json_body(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    #[test]
    fn task_id_is_last_location_segment() {
        assert_eq!(task_id_from_location("/v0.1/scan/7").unwrap().as_str(), "7");
        assert_eq!(task_id_from_location("http://127.0.0.1:8090/v0.1/scan/12/").unwrap().as_str(), "12");
        assert!(task_id_from_location("").is_none());
        assert!(task_id_from_location("/v0.1/scan/?x").is_none());
    }

    #[test]
    fn task_id_falls_back_to_body() {
        assert_eq!(task_id_from_body(&json!({ "task_id": "abc" })).unwrap().as_str(), "abc");
        assert_eq!(task_id_from_body(&json!({ "id": 9 })).unwrap().as_str(), "9");
        assert!(task_id_from_body(&json!({ "status": "ok" })).is_none());
    }

    #[test]
    fn urls_include_prefix_once() {
        let mut config = Config::default();
        config.api.prefix = "/v0.1/".to_string();
        let api = RestControlApi::new(&config.api).unwrap();
        assert_eq!(api.url("/scan"), "http://127.0.0.1:8090/v0.1/scan");
    }
}
