//! Outbound task envelope composition.

use std::collections::BTreeSet;

use relay_core::{new_message_id, sanitize_prompt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::agent_config::AgentConfig;
use crate::agent_errors::AgentConfigError;
use crate::persona::Persona;

pub const ENVELOPE_VERSION: u32 = 1;
pub const DEFAULT_REDACTION_RULE: &str = "relay-router-sanitize";
pub const DEFAULT_TELEMETRY_SOURCE: &str = "relay_router";
pub const DEFAULT_TELEMETRY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    pub queue_depth: usize,
    pub concurrency_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryDescriptor {
    pub source: String,
    pub version: String,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaContext {
    pub persona: Persona,
    pub duty_status: &'static str,
    pub user_hash: String,
    pub queue_entered_at: String,
    pub chat_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Validated request for one backend submission.
pub struct TaskCommand {
    pub correlation_id: String,
    pub persona: String,
    pub prompt: String,
    pub chat_hash: String,
    pub user_hash: String,
    pub received_at: String,
    pub queue_entered_at: Option<String>,
    pub telemetry_source: Option<String>,
    pub telemetry_version: Option<String>,
    pub compliance_tags: Map<String, Value>,
    pub redaction_rules: Vec<String>,
    pub trace: TraceContext,
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `TaskEnvelope` used across relay components.
pub struct TaskEnvelope {
    pub correlation_id: String,
    pub message_id: String,
    pub persona: Persona,
    pub duty_status: &'static str,
    pub chat_hash: String,
    pub user_hash: String,
    pub received_at: String,
    pub prompt_checksum: String,
    pub telemetry: TelemetryDescriptor,
    pub compliance_tags: Map<String, Value>,
    pub persona_context: PersonaContext,
    pub redaction_rules: Vec<String>,
    pub trace: TraceContext,
    pub envelope_version: u32,
    pub text: String,
}

impl TaskEnvelope {
    /// Renders the message object submitted under the `message` key.
    pub fn to_wire_message(&self) -> Value {
        json!({
            "role": "user",
            "kind": "message",
            "message_id": self.message_id,
            "metadata": {
                "correlation_id": self.correlation_id,
                "chat_hash": self.chat_hash,
                "user_hash": self.user_hash,
                "received_at": self.received_at,
                "telemetry": self.telemetry,
                "compliance_tags": self.compliance_tags,
                "persona_context": self.persona_context,
                "trace": self.trace,
                "envelope_version": self.envelope_version,
            },
            "parts": [{
                "kind": "text",
                "text": self.text,
                "metadata": {
                    "correlation_id": self.correlation_id,
                    "persona_tag": self.persona,
                    "prompt_checksum": self.prompt_checksum,
                    "redaction_rules": self.redaction_rules,
                },
            }],
        })
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeComposer {
    environment: String,
    default_compliance_tags: Map<String, Value>,
    allowed_persona_tags: BTreeSet<String>,
}

impl EnvelopeComposer {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            default_compliance_tags: config.compliance_tags.clone(),
            allowed_persona_tags: config.allowed_persona_tags.clone(),
        }
    }

    /// Canonicalizes persona text and enforces the allow-list.
    pub fn canonical_persona(&self, raw: &str) -> Result<Persona, AgentConfigError> {
        let persona = Persona::parse(raw).ok_or(AgentConfigError::MissingPersona)?;
        if !self.allowed_persona_tags.contains(persona.tag()) {
            return Err(AgentConfigError::PersonaNotAllowed(persona.tag().to_string()));
        }
        Ok(persona)
    }

    pub fn compose(&self, command: &TaskCommand) -> Result<TaskEnvelope, AgentConfigError> {
        let persona = self.canonical_persona(&command.persona)?;
        let text = sanitize_prompt(&command.prompt);
        let duty_status = persona.duty_status();
        let compliance_tags = if command.compliance_tags.is_empty() {
            self.default_compliance_tags.clone()
        } else {
            command.compliance_tags.clone()
        };
        let redaction_rules = if command.redaction_rules.is_empty() {
            vec![DEFAULT_REDACTION_RULE.to_string()]
        } else {
            command.redaction_rules.clone()
        };
        let persona_context = PersonaContext {
            persona: persona.clone(),
            duty_status,
            user_hash: command.user_hash.clone(),
            queue_entered_at: command
                .queue_entered_at
                .clone()
                .unwrap_or_else(|| command.received_at.clone()),
            chat_hash: command.chat_hash.clone(),
        };

        Ok(TaskEnvelope {
            correlation_id: command.correlation_id.clone(),
            message_id: new_message_id(),
            persona,
            duty_status,
            chat_hash: command.chat_hash.clone(),
            user_hash: command.user_hash.clone(),
            received_at: command.received_at.clone(),
            prompt_checksum: prompt_checksum(&text),
            telemetry: TelemetryDescriptor {
                source: command
                    .telemetry_source
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TELEMETRY_SOURCE.to_string()),
                version: command
                    .telemetry_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TELEMETRY_VERSION.to_string()),
                environment: self.environment.clone(),
            },
            compliance_tags,
            persona_context,
            redaction_rules,
            trace: command.trace,
            envelope_version: ENVELOPE_VERSION,
            text,
        })
    }
}

/// SHA-256 hex digest of the sanitized prompt.
pub fn prompt_checksum(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
