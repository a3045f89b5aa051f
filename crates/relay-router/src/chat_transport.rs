//! Chat front-end transport: Telegram Bot API client and a local stub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::health::ComponentHealth;
use crate::render_helpers::escape_markdown_v2;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_REQUEST_TIMEOUT_SECS: u64 = 10;
const STUB_MAX_POLL_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatTransportError {
    #[error("transient chat transport error: {0}")]
    Transient(String),
    #[error("chat transport rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
/// Trait contract for `ChatTransport` behavior.
pub trait ChatTransport: Send + Sync {
    /// Long-polls for raw updates newer than `offset`.
    async fn poll_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, ChatTransportError>;

    /// Sends already-escaped MarkdownV2 text.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChatTransportError>;
}

#[derive(Debug, Clone)]
pub struct TelegramBotClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramBotClient {
    pub fn new(token: &str, api_base: &str) -> Result<Self, ChatTransportError> {
        let base = api_base.trim().trim_end_matches('/');
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| ChatTransportError::Rejected(error.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{base}/bot{}", token.trim()),
        })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ChatTransportError> {
        let response = request
            .send()
            .await
            .map_err(|error| ChatTransportError::Transient(error.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatTransportError::Transient(format!(
                "telegram {}: body={body}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(ChatTransportError::Rejected(format!(
                "telegram {}: body={body}",
                status.as_u16()
            )));
        }
        let parsed = serde_json::from_str::<Value>(&body)
            .map_err(|error| ChatTransportError::Transient(format!("invalid json: {error}")))?;
        if parsed.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(ChatTransportError::Transient(parsed.to_string()));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ChatTransport for TelegramBotClient {
    async fn poll_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, ChatTransportError> {
        let mut query = vec![
            ("timeout", timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let request_timeout =
            Duration::from_secs(timeout_secs.saturating_add(5).max(MIN_REQUEST_TIMEOUT_SECS));
        let response = self
            .execute(
                self.client
                    .get(format!("{}/getUpdates", self.base_url))
                    .query(&query)
                    .timeout(request_timeout),
            )
            .await?;
        Ok(response
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChatTransportError> {
        self.execute(
            self.client
                .post(format!("{}/sendMessage", self.base_url))
                .json(&json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "MarkdownV2",
                    "disable_web_page_preview": true,
                }))
                .timeout(SEND_TIMEOUT),
        )
        .await
        .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Offline transport: never yields updates and only logs outbound messages.
pub struct StubChatTransport;

#[async_trait]
impl ChatTransport for StubChatTransport {
    async fn poll_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, ChatTransportError> {
        tokio::time::sleep(Duration::from_secs(timeout_secs).min(STUB_MAX_POLL_SLEEP)).await;
        tracing::debug!(?offset, timeout_secs, "stub chat transport polled");
        Ok(Vec::new())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChatTransportError> {
        let preview = relay_core::truncate_chars(text, 80);
        tracing::info!(chat_id, preview = %preview, "stub chat transport send");
        Ok(())
    }
}

/// Sends replies to the configured chat and feeds outcomes into chat health.
#[derive(Clone)]
pub struct ChatReplier {
    transport: Arc<dyn ChatTransport>,
    chat_id: i64,
    chat_health: Arc<ComponentHealth>,
}

impl ChatReplier {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        chat_id: i64,
        chat_health: Arc<ComponentHealth>,
    ) -> Self {
        Self {
            transport,
            chat_id,
            chat_health,
        }
    }

    /// Escapes `body` and sends it; delivery failures are logged, not raised.
    pub async fn reply(&self, body: &str) -> bool {
        match self
            .transport
            .send_message(self.chat_id, &escape_markdown_v2(body))
            .await
        {
            Ok(()) => true,
            Err(error) => {
                self.chat_health.mark_failure(&error.to_string());
                tracing::warn!(chat_id = self.chat_id, error = %error, "chat reply failed");
                false
            }
        }
    }
}
