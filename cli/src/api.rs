use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::library::LibraryUpdate;
use crate::types::{
    FormattedInput, GenerationRequest, LibraryTrack, LoraInfo, ModelCatalog, RandomSample,
    TaskHandle, TaskStatus,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8001";
const RANDOM_SAMPLE_MODE: &str = "simple_mode";

const STATUS_PENDING: i64 = 0;
const STATUS_SUCCEEDED: i64 = 1;
const STATUS_FAILED: i64 = 2;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} responded with status {status}: {message}")]
    Status { endpoint: String, status: u16, message: String },
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("invalid URL {0}")]
    Url(String),
}

impl ApiError {
    /// Text worth showing to a user: the server's own message when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::Transport { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

/// The two calls the submit/poll workflow needs from the remote service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn release_task(&self, request: &GenerationRequest) -> Result<TaskHandle, ApiError>;

    async fn query_task(&self, handle: &TaskHandle) -> Result<TaskStatus, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ReleaseData {
    #[serde(default)]
    task_id: Option<Value>,
}

/// Only `status` decides the outcome; the other fields are read loosely.
#[derive(Debug, Default, Deserialize)]
struct QueryEntry {
    #[serde(default)]
    task_id: Option<Value>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let raw = base_url.unwrap_or(DEFAULT_BASE_URL);
        let url = normalize_base(raw).context("invalid service base URL")?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn models(&self) -> Result<ModelCatalog, ApiError> {
        self.call::<(), ModelCatalog>(Method::GET, "v1/models", None).await
    }

    pub async fn history(&self) -> Result<Vec<LibraryTrack>, ApiError> {
        self.call::<(), Vec<LibraryTrack>>(Method::GET, "v1/history", None).await
    }

    pub async fn delete_history(&self, id: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, "v1/history", Some(&json!({ "id": id }))).await.map(drop)
    }

    pub async fn update_library(&self, update: &LibraryUpdate) -> Result<(), ApiError> {
        self.send(Method::POST, "v1/library/update", Some(update)).await.map(drop)
    }

    pub async fn random_sample(&self) -> Result<RandomSample, ApiError> {
        let body = json!({ "sample_type": RANDOM_SAMPLE_MODE });
        self.call(Method::POST, "create_random_sample", Some(&body)).await
    }

    pub async fn format_input(&self, prompt: &str, lyrics: &str) -> Result<FormattedInput, ApiError> {
        let body = json!({ "prompt": prompt, "lyrics": lyrics });
        self.call(Method::POST, "format_input", Some(&body)).await
    }

    pub async fn loras(&self) -> Result<Vec<LoraInfo>, ApiError> {
        self.call::<(), Vec<LoraInfo>>(Method::GET, "v1/loras", None).await
    }

    pub async fn load_lora(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::POST, "v1/loras/load", Some(&json!({ "path": path }))).await.map(drop)
    }

    pub async fn unload_lora(&self) -> Result<(), ApiError> {
        self.send::<()>(Method::POST, "v1/loras/unload", None).await.map(drop)
    }

    pub async fn set_lora_scale(&self, scale: f32) -> Result<(), ApiError> {
        self.send(Method::POST, "v1/loras/scale", Some(&json!({ "scale": scale }))).await.map(drop)
    }

    pub async fn fetch_audio(&self, url: &Url) -> Result<Vec<u8>, ApiError> {
        let endpoint = url.to_string();
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint: endpoint.clone(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        Ok(bytes.to_vec())
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.send(method, path, body).await?;
        decode_data(path, &text)
    }

    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<String, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.base_url.join(path).map_err(|err| ApiError::Url(format!("{path}: {err}")))?;
        debug!(%method, %url, "service request");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint: path.to_string(), source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ApiError::Transport { endpoint: path.to_string(), source })?;
        if !status.is_success() {
            let message = extract_message(&text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(ApiError::Status { endpoint: path.to_string(), status: status.as_u16(), message });
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerationService for Client {
    async fn release_task(&self, request: &GenerationRequest) -> Result<TaskHandle, ApiError> {
        let text = self.send(Method::POST, "release_task", Some(request)).await?;
        decode_task_handle(&text)
    }

    async fn query_task(&self, handle: &TaskHandle) -> Result<TaskStatus, ApiError> {
        let body = query_body(handle);
        let text = self.send(Method::POST, "query_result", Some(&body)).await?;
        decode_task_status(handle, &text)
    }
}

fn normalize_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash =
        if trimmed.ends_with('/') { trimmed.to_string() } else { format!("{trimmed}/") };
    Url::parse(&with_slash).with_context(|| format!("cannot parse {trimmed}"))
}

fn decode_data<T: DeserializeOwned>(endpoint: &str, text: &str) -> Result<T, ApiError> {
    let envelope: Envelope<T> = serde_json::from_str(text).map_err(|err| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })?;
    envelope.data.ok_or_else(|| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: "response has no data".to_string(),
    })
}

fn decode_task_handle(text: &str) -> Result<TaskHandle, ApiError> {
    let data: ReleaseData = decode_data("release_task", text)?;
    let id = match data.task_id {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(ApiError::Decode {
                endpoint: "release_task".to_string(),
                message: "response did not include a task id".to_string(),
            })
        }
    };
    Ok(TaskHandle::new(id))
}

/// `task_id_list` is itself a JSON-encoded array of ids.
fn query_body(handle: &TaskHandle) -> Value {
    let ids = Value::Array(vec![Value::String(handle.as_str().to_string())]);
    json!({ "task_id_list": ids.to_string() })
}

fn decode_task_status(handle: &TaskHandle, text: &str) -> Result<TaskStatus, ApiError> {
    let entries: Vec<QueryEntry> = decode_data("query_result", text)?;
    let matching = entries
        .iter()
        .position(|entry| loose_text(entry.task_id.clone()).as_deref() == Some(handle.as_str()));
    let index = matching.unwrap_or(0);

    let Some(entry) = entries.into_iter().nth(index) else {
        // Nothing reported for the task yet.
        return Ok(TaskStatus::Pending);
    };

    let payload = loose_text(entry.result);

    Ok(match entry.status {
        Some(STATUS_PENDING) | None => TaskStatus::Pending,
        Some(STATUS_SUCCEEDED) => TaskStatus::Succeeded(payload.unwrap_or_default()),
        Some(STATUS_FAILED) => {
            TaskStatus::Failed(loose_text(entry.error).or(payload).unwrap_or_default())
        }
        Some(code) => {
            warn!(task = %handle, code, "unknown task status code, treating as pending");
            TaskStatus::Pending
        }
    })
}

/// Strings pass through; other JSON values are rendered as JSON text.
fn loose_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Pulls `detail`, `message` or `error` out of an error body.
fn extract_message(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    ["detail", "message", "error"].iter().find_map(|key| match value.get(key)? {
        Value::String(message) if !message.trim().is_empty() => Some(message.clone()),
        Value::Null => None,
        Value::String(_) => None,
        other => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_detail_from_error_bodies() {
        assert_eq!(
            extract_message(r#"{"detail": "model not loaded"}"#).as_deref(),
            Some("model not loaded")
        );
        assert_eq!(extract_message(r#"{"error": "busy"}"#).as_deref(), Some("busy"));
        assert_eq!(
            extract_message(r#"{"detail": [{"msg": "field required"}]}"#).as_deref(),
            Some(r#"[{"msg":"field required"}]"#)
        );
        assert_eq!(extract_message("<html>Bad Gateway</html>"), None);
        assert_eq!(extract_message(r#"{"detail": ""}"#), None);
    }

    #[test]
    fn decodes_task_handle() {
        let handle = decode_task_handle(r#"{"data": {"task_id": "t1"}}"#).unwrap();
        assert_eq!(handle.as_str(), "t1");
        let handle = decode_task_handle(r#"{"data": {"task_id": 17}}"#).unwrap();
        assert_eq!(handle.as_str(), "17");
        assert!(matches!(
            decode_task_handle(r#"{"data": {}}"#),
            Err(ApiError::Decode { .. })
        ));
        assert!(matches!(decode_task_handle(r#"{"code": 200}"#), Err(ApiError::Decode { .. })));
    }

    #[test]
    fn decodes_task_status_codes() {
        let handle = TaskHandle::new("t1");
        assert_eq!(
            decode_task_status(&handle, r#"{"data": [{"status": 0}]}"#).unwrap(),
            TaskStatus::Pending
        );
        assert_eq!(
            decode_task_status(&handle, r#"{"data": [{"status": 1, "result": "[]"}]}"#).unwrap(),
            TaskStatus::Succeeded("[]".to_string())
        );
        assert_eq!(
            decode_task_status(&handle, r#"{"data": [{"status": 2, "error": "oom"}]}"#).unwrap(),
            TaskStatus::Failed("oom".to_string())
        );
        assert_eq!(
            decode_task_status(&handle, r#"{"data": [{"status": 9}]}"#).unwrap(),
            TaskStatus::Pending
        );
        assert_eq!(decode_task_status(&handle, r#"{"data": []}"#).unwrap(), TaskStatus::Pending);
    }

    #[test]
    fn picks_entry_matching_the_handle() {
        let handle = TaskHandle::new("t2");
        let body = r#"{"data": [
            {"task_id": "t1", "status": 2},
            {"task_id": "t2", "status": 1, "result": [{"url": "/files/b.wav"}]}
        ]}"#;
        let TaskStatus::Succeeded(payload) = decode_task_status(&handle, body).unwrap() else {
            panic!("expected success");
        };
        assert!(payload.contains("/files/b.wav"));
    }

    #[test]
    fn query_body_encodes_id_list_as_string() {
        assert_eq!(query_body(&TaskHandle::new("t1")), json!({"task_id_list": "[\"t1\"]"}));
        assert_eq!(
            query_body(&TaskHandle::new("a\"b")),
            json!({"task_id_list": "[\"a\\\"b\"]"})
        );
    }

    #[test]
    fn numeric_task_id_is_matched_when_polling() {
        let handle = decode_task_handle(r#"{"data": {"task_id": 17}}"#).unwrap();
        let body = r#"{"data": [
            {"task_id": 16, "status": 2},
            {"task_id": 17, "status": 1, "result": "[]"}
        ]}"#;
        assert_eq!(
            decode_task_status(&handle, body).unwrap(),
            TaskStatus::Succeeded("[]".to_string())
        );
    }

    #[test]
    fn structured_error_still_reports_failure() {
        let handle = TaskHandle::new("t1");
        let body = r#"{"data": [{"task_id": "t1", "status": 2, "error": {"code": 500}}]}"#;
        assert_eq!(
            decode_task_status(&handle, body).unwrap(),
            TaskStatus::Failed(r#"{"code":500}"#.to_string())
        );
        let body = r#"{"data": [{"task_id": ["odd"], "status": 2}]}"#;
        assert_eq!(decode_task_status(&handle, body).unwrap(), TaskStatus::Failed(String::new()));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = Client::new(Some("http://studio.local:8001/api"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://studio.local:8001/api/");
        assert_eq!(
            client.base_url().join("release_task").unwrap().as_str(),
            "http://studio.local:8001/api/release_task"
        );
    }
}
