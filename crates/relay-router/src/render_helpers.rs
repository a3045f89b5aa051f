use chrono::{DateTime, SecondsFormat, Utc};
use relay_agent::{AgentResponse, Persona};
use relay_core::truncate_chars;

use crate::rate_limiter::RateLimitDecision;

pub const QUEUE_FULL_REPLY: &str = "Queue is full, please retry shortly.";
pub const ADAPTER_FAILURE_REPLY: &str = "Adapter failure encountered. Operators notified.";
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command.";
pub const RETRY_USAGE_REPLY: &str = "Usage: /retry <task_id>";
pub const RETRY_NOT_FOUND_REPLY: &str = "Task ID not found or expired.";
const DIAGNOSTICS_MAX_CHARS: usize = 400;
const MARKDOWN_V2_RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

/// Escapes every MarkdownV2 reserved character with a backslash.
pub fn escape_markdown_v2(body: &str) -> String {
    let mut escaped = String::with_capacity(body.len() + body.len() / 4);
    for ch in body.chars() {
        if MARKDOWN_V2_RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn render_accept_reply(persona: &Persona, correlation_id: &str, queue_position: usize) -> String {
    format!(
        "Accepted prompt for persona {persona}.\nCorrelation: {correlation_id}\nQueue position: {queue_position}"
    )
}

pub fn render_throttle_reply(decision: &RateLimitDecision) -> String {
    let wait_secs = decision.retry_after_secs.max(0.0).trunc() as u64;
    format!("Rate limit reached. Please wait {wait_secs}s before sending another prompt.")
}

pub fn render_final_state_reply(response: &AgentResponse, latency_ms: u64) -> String {
    let diagnostics =
        serde_json::to_string(&response.diagnostics).unwrap_or_else(|_| "{}".to_string());
    format!(
        "State: {}\nTask: {}\nLatency: {latency_ms} ms\nDiagnostics: {}",
        response.final_state.as_str(),
        response.task_id,
        truncate_chars(&diagnostics, DIAGNOSTICS_MAX_CHARS)
    )
}

pub fn render_status_reply(
    queue_depth: usize,
    retry_cache_len: usize,
    last_update_id: Option<i64>,
    now: DateTime<Utc>,
) -> String {
    let last_update_id = last_update_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "queue_depth: {queue_depth}\nretry_cache: {retry_cache_len}\nlast_update_id: {last_update_id}\ntimestamp: {}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

pub fn render_requeued_reply(task_id: &str) -> String {
    format!("Task {task_id} requeued.")
}

pub fn render_flush_reply(drained: usize) -> String {
    format!("Flushed {drained} queued prompts and cleared retry cache.")
}
