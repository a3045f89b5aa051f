//! Request/response contract between the router and a backend agent.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::agent_errors::{AgentConfigError, AgentInvokeError};
use crate::envelope::TraceContext;
use crate::persona::Persona;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Router-side queue metadata forwarded with each request.
pub struct RequestTrace {
    pub queue_depth: usize,
    pub available_permits: usize,
    pub router_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `AgentRequest` used across relay components.
pub struct AgentRequest {
    pub correlation_id: String,
    pub persona: String,
    pub prompt: String,
    pub chat_hash: String,
    pub user_hash: String,
    pub queue_entered_at: String,
    pub attempt: u32,
    pub trace: RequestTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalState {
    Completed,
    Failed,
    Canceled,
    Rejected,
    Timeout,
}

impl FinalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Fatal,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDiagnostics {
    pub persona: Persona,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_state: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub upstream: Value,
}

impl TaskDiagnostics {
    pub fn for_persona(persona: Persona) -> Self {
        Self {
            persona,
            classification: None,
            attempt_count: None,
            upstream_state: None,
            server_messages: Vec::new(),
            trace: None,
            upstream: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `AgentResponse` used across relay components.
pub struct AgentResponse {
    pub final_state: FinalState,
    pub text: String,
    pub task_id: String,
    pub diagnostics: TaskDiagnostics,
    pub retryable: bool,
    pub latency_ms: u64,
    /// Submission attempts made against the backend.
    pub submissions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentHealthProbe {
    Unsupported,
    Healthy,
    Unhealthy(String),
}

#[async_trait]
/// Trait contract for `TaskAgent` behavior.
pub trait TaskAgent: Send + Sync {
    /// Drives one request to a final response.
    ///
    /// Backend and protocol failures come back as classified `Ok` responses;
    /// `Err` is reserved for faults that leave no task to report on.
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentInvokeError>;

    async fn health_check(&self) -> AgentHealthProbe {
        AgentHealthProbe::Unsupported
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Answers every request locally; used when no backend is configured.
pub struct EchoAgent;

#[async_trait]
impl TaskAgent for EchoAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentInvokeError> {
        let persona = Persona::parse(&request.persona).ok_or(AgentConfigError::MissingPersona)?;
        let text = format!(
            "Echo from {persona} ({}): {}",
            request.correlation_id, request.prompt
        );
        let mut diagnostics = TaskDiagnostics::for_persona(persona);
        diagnostics.attempt_count = Some(1);
        diagnostics.upstream_state = Some(FinalState::Completed.as_str().to_string());
        Ok(AgentResponse {
            final_state: FinalState::Completed,
            text,
            task_id: format!("echo-{}", request.correlation_id),
            diagnostics,
            retryable: false,
            latency_ms: 0,
            submissions: 1,
        })
    }

    async fn health_check(&self) -> AgentHealthProbe {
        AgentHealthProbe::Healthy
    }
}
