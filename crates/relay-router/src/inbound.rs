//! Inbound chat events and the work items derived from them.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use relay_agent::Persona;
use relay_core::new_correlation_id;
use serde_json::Value;

use crate::retry_cache::RetryRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// One chat message as received; identifiers are validated later.
pub struct InboundEvent {
    pub sequence: Option<i64>,
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub message_id: Option<i64>,
    pub text: Option<String>,
}

impl InboundEvent {
    /// Extracts the `message` of a raw update; `None` when the update has no message.
    pub fn from_update(update: &Value) -> Option<Self> {
        let message = update.get("message").filter(|message| !message.is_null())?;
        Some(Self {
            sequence: update.get("update_id").and_then(Value::as_i64),
            chat_id: message
                .get("chat")
                .and_then(|chat| chat.get("id"))
                .and_then(Value::as_i64),
            sender_id: message
                .get("from")
                .and_then(|sender| sender.get("id"))
                .and_then(Value::as_i64),
            message_id: message.get("message_id").and_then(Value::as_i64),
            text: message
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Parses raw update bytes; malformed JSON yields `None`.
pub fn parse_update_bytes(raw: &[u8]) -> Option<InboundEvent> {
    let update = serde_json::from_slice::<Value>(raw).ok()?;
    InboundEvent::from_update(&update)
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `WorkItem` used across relay components.
pub struct WorkItem {
    pub persona: Persona,
    pub payload: String,
    pub correlation_id: String,
    pub chat_hash: String,
    pub user_hash: String,
    pub chat_message_id: i64,
    pub sequence: i64,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    /// Follow-up item for an automatic retry: fresh correlation id, next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            attempt: self.attempt.saturating_add(1),
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Fresh first-attempt item rebuilt from a cached outcome.
    pub fn from_retry_record(record: &RetryRecord, command: &AdminCommand) -> Self {
        Self {
            persona: record.persona.clone(),
            payload: record.payload.clone(),
            correlation_id: new_correlation_id(),
            chat_hash: record.chat_hash.clone(),
            user_hash: record.user_hash.clone(),
            chat_message_id: command.chat_message_id,
            sequence: command.sequence,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn enqueued_at_rfc3339(&self) -> String {
        self.enqueued_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    /// Lower-cased, including the leading `/`.
    pub name: String,
    pub args: Vec<String>,
    pub persona: Persona,
    pub requester_hash: String,
    pub chat_message_id: i64,
    pub sequence: i64,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
/// Highest update sequence seen by the ingestion loop.
pub struct UpdateCursor {
    last: Mutex<Option<i64>>,
}

impl UpdateCursor {
    pub fn record(&self, sequence: i64) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(last.map_or(sequence, |current| current.max(sequence)));
    }

    pub fn last(&self) -> Option<i64> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_offset(&self) -> Option<i64> {
        self.last().map(|last| last.saturating_add(1))
    }
}
