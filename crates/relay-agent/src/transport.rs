//! Backend task transport: submit a message, poll the resulting task.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::truncate_chars;
use reqwest::{StatusCode, Url};
use serde_json::{json, Map, Value};

use crate::agent_config::AgentConfig;
use crate::agent_errors::{AgentConfigError, TransportError};

const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Task state as reported by the backend.
pub enum UpstreamTaskState {
    Completed,
    Failed,
    Canceled,
    Rejected,
    InProgress(String),
}

impl UpstreamTaskState {
    /// Missing or unrecognized states are treated as still in progress.
    pub fn parse(raw: Option<&str>) -> Self {
        let normalized = raw
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "in_progress".to_string());
        match normalized.as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            "rejected" => Self::Rejected,
            _ => Self::InProgress(normalized),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::InProgress(raw) => raw.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `TaskSnapshot` used across relay components.
pub struct TaskSnapshot {
    pub state: UpstreamTaskState,
    pub messages: Vec<String>,
    pub artifacts: Vec<String>,
    pub attempt_count: Option<u32>,
    pub raw: Value,
}

impl TaskSnapshot {
    pub fn from_value(raw: Value) -> Self {
        let raw = match raw {
            Value::Object(map) if !map.is_empty() => Value::Object(map),
            _ => json!({"state": "unknown"}),
        };
        let state = UpstreamTaskState::parse(raw.get("state").and_then(Value::as_str));
        let messages = raw
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(value_text).collect())
            .unwrap_or_default();
        let artifacts = raw
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|items| extract_artifacts(items))
            .unwrap_or_default();
        let attempt_count = raw
            .get("attempt_count")
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .filter(|count| *count > 0);
        Self {
            state,
            messages,
            artifacts,
            attempt_count,
            raw,
        }
    }
}

/// Keeps string artifacts and the `text` field of object artifacts.
pub fn extract_artifacts(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|artifact| match artifact {
            Value::String(text) => Some(text.clone()),
            Value::Object(map) => map.get("text").map(value_text),
            _ => None,
        })
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
/// Trait contract for `TaskTransport` behavior.
pub trait TaskTransport: Send + Sync {
    async fn submit(&self, message: &Value) -> Result<String, TransportError>;

    async fn poll(&self, task_id: &str) -> Result<TaskSnapshot, TransportError>;

    /// Liveness probe; `None` when the transport has no probe.
    async fn probe(&self) -> Option<Result<(), TransportError>> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct HttpTaskTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTaskTransport {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentConfigError> {
        let raw_base = config.base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(raw_base).map_err(|error| AgentConfigError::InvalidBaseUrl {
            url: raw_base.to_string(),
            reason: error.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| AgentConfigError::HttpClient(error.to_string()))?;
        Ok(Self {
            client,
            base_url,
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::fatal("agent base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, TransportError> {
        let response = self.authorize(request).send().await.map_err(|error| {
            TransportError::recoverable("Network error").with_detail(error.to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }
        let body = response.text().await.map_err(|error| {
            TransportError::recoverable("Network error").with_detail(error.to_string())
        })?;
        if body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str::<Value>(&body).map_err(|error| {
            TransportError::fatal("Invalid JSON payload from upstream").with_detail(error.to_string())
        })
    }
}

/// 429 and 5xx are worth another submission; other failures are not.
pub fn classify_http_status(status: StatusCode, body: &str) -> TransportError {
    let code = status.as_u16();
    let recoverable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    let message = format!("Upstream HTTP error {code}");
    let error = if recoverable {
        TransportError::recoverable(message)
    } else {
        TransportError::fatal(message)
    }
    .with_status(code);
    let body = body.trim();
    if body.is_empty() {
        return error;
    }
    error.with_detail(truncate_chars(body, ERROR_BODY_MAX_CHARS))
}

#[async_trait]
impl TaskTransport for HttpTaskTransport {
    async fn submit(&self, message: &Value) -> Result<String, TransportError> {
        let url = self.endpoint(&["send_message"])?;
        let response = self
            .execute(self.client.post(url).json(&json!({ "message": message })))
            .await?;
        response
            .get("task_id")
            .map(value_text)
            .map(|task_id| task_id.trim().to_string())
            .filter(|task_id| !task_id.is_empty())
            .ok_or_else(|| TransportError::fatal("Upstream response missing task_id"))
    }

    async fn poll(&self, task_id: &str) -> Result<TaskSnapshot, TransportError> {
        let url = self.endpoint(&["tasks", task_id])?;
        let response = self
            .execute(self.client.get(url))
            .await
            .map_err(|error| error.with_task_id(task_id))?;
        Ok(TaskSnapshot::from_value(response))
    }

    async fn probe(&self) -> Option<Result<(), TransportError>> {
        let url = match self.endpoint(&["health"]) {
            Ok(url) => url,
            Err(error) => return Some(Err(error)),
        };
        let request = self
            .authorize(self.client.get(url))
            .timeout(Duration::from_secs(5));
        let result = match request.send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(classify_http_status(response.status(), "")),
            Err(error) => {
                Err(TransportError::recoverable("Network error").with_detail(error.to_string()))
            }
        };
        Some(result)
    }
}
