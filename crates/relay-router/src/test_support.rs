//! In-process fakes shared by router unit tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use relay_agent::{
    AgentHealthProbe, AgentInvokeError, AgentRequest, AgentResponse, FinalState, Persona,
    TaskAgent, TaskDiagnostics,
};
use serde_json::Value;

use crate::chat_transport::{ChatTransport, ChatTransportError};

#[derive(Default)]
pub(crate) struct RecordingChatTransport {
    updates: Mutex<VecDeque<Vec<Value>>>,
    sent: Mutex<Vec<(i64, String)>>,
    fail_sends: bool,
    slow_sends: Option<(String, Duration)>,
}

impl RecordingChatTransport {
    pub(crate) fn with_updates(batches: Vec<Vec<Value>>) -> Self {
        Self {
            updates: Mutex::new(batches.into()),
            ..Self::default()
        }
    }

    pub(crate) fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    /// Delays sends whose text starts with `prefix` before recording them.
    pub(crate) fn with_slow_sends(mut self, prefix: &str, delay: Duration) -> Self {
        self.slow_sends = Some((prefix.to_string(), delay));
        self
    }

    pub(crate) fn sent(&self) -> Vec<(i64, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn wait_for_sent(&self, count: usize) -> Vec<(i64, String)> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl ChatTransport for RecordingChatTransport {
    async fn poll_updates(
        &self,
        _offset: Option<i64>,
        _timeout_secs: u64,
    ) -> Result<Vec<Value>, ChatTransportError> {
        let next = self
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChatTransportError> {
        if self.fail_sends {
            return Err(ChatTransportError::Rejected("chat not found".to_string()));
        }
        if let Some((prefix, delay)) = &self.slow_sends {
            if text.starts_with(prefix.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((chat_id, text.to_string()));
        Ok(())
    }
}

pub(crate) enum Scripted {
    Respond(AgentResponse),
    Fail(String),
}

pub(crate) fn response(final_state: FinalState, task_id: &str, retryable: bool) -> AgentResponse {
    AgentResponse {
        final_state,
        text: format!("{} text", final_state.as_str()),
        task_id: task_id.to_string(),
        diagnostics: TaskDiagnostics::for_persona(Persona::Operator),
        retryable,
        latency_ms: 5,
        submissions: 1,
    }
}

/// Replays scripted results in order, then completes every further request.
#[derive(Default)]
pub(crate) struct ScriptedAgent {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<AgentRequest>>,
    health: Option<AgentHealthProbe>,
}

impl ScriptedAgent {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub(crate) fn with_health(mut self, probe: AgentHealthProbe) -> Self {
        self.health = Some(probe);
        self
    }

    pub(crate) fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskAgent for ScriptedAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentInvokeError> {
        let task_id = format!("task-{}", request.correlation_id);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(reason)) => Err(AgentInvokeError::Unavailable(reason)),
            None => Ok(response(FinalState::Completed, &task_id, false)),
        }
    }

    async fn health_check(&self) -> AgentHealthProbe {
        self.health.clone().unwrap_or(AgentHealthProbe::Unsupported)
    }
}
