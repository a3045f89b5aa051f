//! Submission and polling state machine for backend tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::utc_now_rfc3339;
use serde_json::{json, Value};
use tokio::time::{sleep, sleep_until, Instant};

use crate::agent_config::{AgentConfig, ApiKeyAge, API_KEY_MAX_AGE_DAYS};
use crate::agent_contract::{
    AgentHealthProbe, AgentRequest, AgentResponse, FailureClass, FinalState, TaskAgent,
    TaskDiagnostics,
};
use crate::agent_errors::{AgentConfigError, AgentInvokeError, TransportError};
use crate::backoff::{poll_delay, BackoffPolicy};
use crate::envelope::{EnvelopeComposer, TaskCommand, TaskEnvelope, TraceContext};
use crate::persona::Persona;
use crate::telemetry::AgentTelemetry;
use crate::transport::{HttpTaskTransport, TaskTransport, UpstreamTaskState};

const COMPLETED_FALLBACK_TEXT: &str = "Task completed";

#[derive(Debug, Clone, PartialEq)]
/// Terminal result of one submission attempt.
pub struct TaskOutcome {
    pub task_id: String,
    pub final_state: FinalState,
    pub attempt_count: u32,
    pub latency_ms: u64,
    pub server_messages: Vec<String>,
    pub artifacts: Vec<String>,
    pub upstream: Value,
    pub retryable: bool,
}

#[derive(Debug)]
enum AttemptResult {
    Finished(TaskOutcome),
    SlaExpired { task_id: String, upstream: Value },
}

struct InvocationContext<'a> {
    correlation_id: &'a str,
    persona: &'a Persona,
    trace: TraceContext,
    started: Instant,
    submissions: u32,
}

impl InvocationContext<'_> {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Drives a request through submit, poll, classify, and escalate.
pub struct TaskIntegrationService {
    config: AgentConfig,
    composer: EnvelopeComposer,
    transport: Arc<dyn TaskTransport>,
    telemetry: Arc<AgentTelemetry>,
}

impl TaskIntegrationService {
    pub fn new(config: AgentConfig, transport: Arc<dyn TaskTransport>) -> Self {
        Self {
            composer: EnvelopeComposer::new(&config),
            config,
            transport,
            telemetry: Arc::new(AgentTelemetry::default()),
        }
    }

    /// Builds the service over the HTTP transport after validating `config`.
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentConfigError> {
        let config = config.normalize();
        if let ApiKeyAge::NearingExpiry { age_days } = config.validate()? {
            tracing::warn!(
                age_days,
                max_days = API_KEY_MAX_AGE_DAYS,
                "agent api key is nearing expiry; rotate soon"
            );
        }
        let transport = HttpTaskTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn telemetry(&self) -> Arc<AgentTelemetry> {
        Arc::clone(&self.telemetry)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.config.retry_backoff,
            multiplier: self.config.retry_backoff_multiplier,
            max: self.config.retry_backoff_max,
        }
    }

    fn command_from_request(request: &AgentRequest) -> TaskCommand {
        let received_at = if request.queue_entered_at.trim().is_empty() {
            utc_now_rfc3339()
        } else {
            request.queue_entered_at.clone()
        };
        TaskCommand {
            correlation_id: request.correlation_id.clone(),
            persona: request.persona.clone(),
            prompt: request.prompt.clone(),
            chat_hash: if request.chat_hash.is_empty() {
                "na".to_string()
            } else {
                request.chat_hash.clone()
            },
            user_hash: request.user_hash.clone(),
            queue_entered_at: Some(received_at.clone()),
            received_at,
            telemetry_source: None,
            telemetry_version: Some(request.trace.router_version.clone())
                .filter(|version| !version.is_empty()),
            compliance_tags: Default::default(),
            redaction_rules: Vec::new(),
            trace: TraceContext {
                queue_depth: request.trace.queue_depth,
                concurrency_slots: request.trace.available_permits,
            },
        }
    }

    async fn run_attempt(
        &self,
        envelope: &TaskEnvelope,
        sla_deadline: Instant,
    ) -> Result<AttemptResult, TransportError> {
        let submitted_at = Instant::now();
        let task_id = self.transport.submit(&envelope.to_wire_message()).await?;
        let poll_deadline = submitted_at + self.config.poll_timeout;
        let max_polls = self.config.max_polls();
        let spread = self.config.poll_jitter_spread();
        let mut polls = 0_u32;
        let mut upstream = json!({ "task_id": task_id });

        loop {
            let now = Instant::now();
            if now >= sla_deadline {
                return Ok(AttemptResult::SlaExpired { task_id, upstream });
            }
            if now >= poll_deadline || polls >= max_polls {
                return Err(TransportError::fatal("Polling exceeded timeout")
                    .with_detail(format!("polls={polls}"))
                    .with_task_id(&task_id));
            }

            let snapshot = self
                .transport
                .poll(&task_id)
                .await
                .map_err(|error| error.with_task_id(&task_id))?;
            polls = polls.saturating_add(1);
            tracing::debug!(
                correlation_id = %envelope.correlation_id,
                task_id = %task_id,
                poll = polls,
                state = snapshot.state.as_str(),
                "agent task polled"
            );
            upstream = snapshot.raw.clone();

            let final_state = match snapshot.state {
                UpstreamTaskState::Completed => Some(FinalState::Completed),
                UpstreamTaskState::Failed => Some(FinalState::Failed),
                UpstreamTaskState::Canceled => Some(FinalState::Canceled),
                UpstreamTaskState::Rejected => Some(FinalState::Rejected),
                UpstreamTaskState::InProgress(_) => None,
            };
            if let Some(final_state) = final_state {
                return Ok(AttemptResult::Finished(TaskOutcome {
                    task_id,
                    final_state,
                    attempt_count: snapshot.attempt_count.unwrap_or(polls),
                    latency_ms: u64::try_from(submitted_at.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                    server_messages: snapshot.messages,
                    artifacts: snapshot.artifacts,
                    upstream,
                    retryable: final_state == FinalState::Canceled,
                }));
            }

            let wake_at = (Instant::now() + poll_delay(self.config.poll_interval, spread))
                .min(sla_deadline);
            sleep_until(wake_at).await;
        }
    }

    fn success_response(context: &InvocationContext<'_>, outcome: TaskOutcome) -> AgentResponse {
        let text = outcome
            .artifacts
            .first()
            .cloned()
            .or_else(|| {
                Some(outcome.server_messages.join("\n")).filter(|joined| !joined.is_empty())
            })
            .unwrap_or_else(|| COMPLETED_FALLBACK_TEXT.to_string());
        let mut diagnostics = TaskDiagnostics::for_persona(context.persona.clone());
        diagnostics.attempt_count = Some(outcome.attempt_count);
        diagnostics.upstream_state = Some(outcome.final_state.as_str().to_string());
        diagnostics.server_messages = outcome.server_messages;
        diagnostics.trace = Some(context.trace);
        AgentResponse {
            final_state: FinalState::Completed,
            text,
            task_id: outcome.task_id,
            diagnostics,
            retryable: false,
            latency_ms: context.elapsed_ms(),
            submissions: context.submissions,
        }
    }

    fn error_response(
        context: &InvocationContext<'_>,
        classification: FailureClass,
        message: &str,
        task_id: Option<String>,
        upstream: Value,
        sla_passed: bool,
    ) -> AgentResponse {
        let (final_state, retryable) = match classification {
            FailureClass::Fatal => (FinalState::Failed, false),
            FailureClass::Transient if sla_passed => (FinalState::Timeout, false),
            FailureClass::Transient => (FinalState::Canceled, true),
        };
        let mut diagnostics = TaskDiagnostics::for_persona(context.persona.clone());
        diagnostics.classification = Some(classification);
        diagnostics.upstream = if upstream.is_null() {
            json!({})
        } else {
            upstream
        };
        AgentResponse {
            final_state,
            text: message.to_string(),
            task_id: task_id.unwrap_or_else(|| context.correlation_id.to_string()),
            diagnostics,
            retryable,
            latency_ms: context.elapsed_ms(),
            submissions: context.submissions,
        }
    }
}

#[async_trait]
impl TaskAgent for TaskIntegrationService {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentInvokeError> {
        let started = Instant::now();
        let command = Self::command_from_request(&request);
        let persona = self.composer.canonical_persona(&command.persona)?;
        let retry_budget = self.config.auto_retry_budget(&persona);
        let sla_deadline = started + self.config.sla_budget(&persona);
        let backoff = self.backoff_policy();
        let mut context = InvocationContext {
            correlation_id: &command.correlation_id,
            persona: &persona,
            trace: command.trace,
            started,
            submissions: 0,
        };
        let mut attempt = 1_u32;

        loop {
            let envelope = self.composer.compose(&command)?;
            context.submissions = attempt;
            self.telemetry.emit_request(&envelope.correlation_id, &persona, attempt);

            let (message, task_id, upstream) = match self.run_attempt(&envelope, sla_deadline).await
            {
                Err(error) => {
                    self.telemetry.emit_failure(
                        &envelope.correlation_id,
                        &persona,
                        attempt,
                        &error.to_string(),
                        error.recoverable,
                    );
                    if !error.recoverable {
                        return Ok(Self::error_response(
                            &context,
                            FailureClass::Fatal,
                            &error.message,
                            error.task_id,
                            Value::Null,
                            false,
                        ));
                    }
                    (error.message, error.task_id, Value::Null)
                }
                Ok(AttemptResult::SlaExpired { task_id, upstream }) => {
                    self.telemetry.emit_timeout(&envelope.correlation_id, &persona);
                    return Ok(Self::error_response(
                        &context,
                        FailureClass::Transient,
                        "Task did not finish before its deadline",
                        Some(task_id),
                        upstream,
                        true,
                    ));
                }
                Ok(AttemptResult::Finished(outcome)) => {
                    self.telemetry.emit_response(
                        &envelope.correlation_id,
                        &persona,
                        attempt,
                        outcome.final_state.as_str(),
                        outcome.latency_ms,
                    );
                    match outcome.final_state {
                        FinalState::Completed => {
                            return Ok(Self::success_response(&context, outcome));
                        }
                        FinalState::Failed | FinalState::Rejected => {
                            return Ok(Self::error_response(
                                &context,
                                FailureClass::Fatal,
                                "Upstream reported failure",
                                Some(outcome.task_id),
                                outcome.upstream,
                                false,
                            ));
                        }
                        FinalState::Canceled | FinalState::Timeout => (
                            "Task canceled upstream".to_string(),
                            Some(outcome.task_id),
                            outcome.upstream,
                        ),
                    }
                }
            };

            let sla_passed = Instant::now() >= sla_deadline;
            if attempt > retry_budget || sla_passed {
                if sla_passed {
                    self.telemetry.emit_timeout(&envelope.correlation_id, &persona);
                }
                return Ok(Self::error_response(
                    &context,
                    FailureClass::Transient,
                    &message,
                    task_id,
                    upstream,
                    sla_passed,
                ));
            }

            let wait = backoff.delay(attempt);
            self.telemetry.emit_retry(&envelope.correlation_id, &persona, attempt, wait);
            let remaining = sla_deadline.saturating_duration_since(Instant::now());
            sleep(wait.min(remaining.max(Duration::from_millis(1)))).await;
            if Instant::now() >= sla_deadline {
                self.telemetry.emit_timeout(&envelope.correlation_id, &persona);
                return Ok(Self::error_response(
                    &context,
                    FailureClass::Transient,
                    &message,
                    task_id,
                    upstream,
                    true,
                ));
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn health_check(&self) -> AgentHealthProbe {
        match self.transport.probe().await {
            None => AgentHealthProbe::Unsupported,
            Some(Ok(())) => AgentHealthProbe::Healthy,
            Some(Err(error)) => AgentHealthProbe::Unhealthy(error.to_string()),
        }
    }
}
