//! Work-queue consumer: invokes the agent, caches outcomes, re-enqueues retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use relay_agent::{AgentRequest, AgentResponse, RequestTrace, TaskAgent};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::chat_transport::ChatReplier;
use crate::health::ComponentHealth;
use crate::inbound::WorkItem;
use crate::render_helpers::{render_final_state_reply, ADAPTER_FAILURE_REPLY};
use crate::retry_cache::{RetryCache, RetryRecord};
use crate::work_queue::WorkQueue;

/// Resolves once `shutdown` reads true or its sender is gone.
pub(crate) async fn shutdown_signaled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Delay before re-enqueueing a retryable item: `unit * 2^attempt`.
pub fn requeue_delay(unit: Duration, attempt: u32) -> Duration {
    let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

pub struct DispatchContext {
    pub agent: Arc<dyn TaskAgent>,
    pub queue: Arc<WorkQueue<WorkItem>>,
    pub retry_cache: Arc<RetryCache>,
    pub agent_health: Arc<ComponentHealth>,
    pub replier: ChatReplier,
    pub retry_attempts: u32,
    pub retry_unit: Duration,
    pub router_version: String,
}

/// Single consumer of the work queue gated by a semaphore.
pub struct DispatchLoop {
    context: Arc<DispatchContext>,
    permits: Arc<Semaphore>,
}

impl DispatchLoop {
    pub fn new(context: DispatchContext, concurrency: usize) -> Self {
        Self {
            context: Arc::new(context),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight items.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();
        loop {
            let permit = tokio::select! {
                _ = shutdown_signaled(&mut shutdown) => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let item = tokio::select! {
                _ = shutdown_signaled(&mut shutdown) => break,
                item = self.context.queue.pop() => item,
            };
            let context = Arc::clone(&self.context);
            let permits = Arc::clone(&self.permits);
            let item_shutdown = shutdown.clone();
            in_flight.spawn(async move {
                context.process(item, permit, &permits, item_shutdown).await;
            });
            while in_flight.try_join_next().is_some() {}
        }
        tracing::info!(in_flight = in_flight.len(), "dispatch loop stopping");
        while in_flight.join_next().await.is_some() {}
    }
}

impl DispatchContext {
    fn request_for(&self, item: &WorkItem, permits: &Semaphore) -> AgentRequest {
        AgentRequest {
            correlation_id: item.correlation_id.clone(),
            persona: item.persona.tag().to_string(),
            prompt: item.payload.clone(),
            chat_hash: item.chat_hash.clone(),
            user_hash: item.user_hash.clone(),
            queue_entered_at: item.enqueued_at_rfc3339(),
            attempt: item.attempt,
            trace: RequestTrace {
                queue_depth: self.queue.len(),
                available_permits: permits.available_permits(),
                router_version: self.router_version.clone(),
            },
        }
    }

    async fn process(
        &self,
        item: WorkItem,
        permit: OwnedSemaphorePermit,
        permits: &Semaphore,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let request = self.request_for(&item, permits);
        let started = Instant::now();
        let response = match self.agent.invoke(request).await {
            Ok(response) => response,
            Err(error) => {
                self.agent_health.mark_failure(&error.to_string());
                tracing::error!(
                    correlation_id = %item.correlation_id,
                    persona = %item.persona,
                    attempt = item.attempt,
                    error = %error,
                    "agent invocation failed"
                );
                self.replier.reply(ADAPTER_FAILURE_REPLY).await;
                return;
            }
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.agent_health.mark_success();
        self.record_outcome(&item, &response);
        tracing::info!(
            correlation_id = %item.correlation_id,
            task_id = %response.task_id,
            final_state = response.final_state.as_str(),
            retryable = response.retryable,
            attempt = item.attempt,
            latency_ms,
            "work item finished"
        );
        self.replier
            .reply(&render_final_state_reply(&response, latency_ms))
            .await;

        if !response.retryable || item.attempt >= self.retry_attempts {
            return;
        }
        drop(permit);
        let delay = requeue_delay(self.retry_unit, item.attempt);
        tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => {
                tracing::info!(
                    correlation_id = %item.correlation_id,
                    "shutdown during retry delay; retry abandoned"
                );
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        let retry = item.next_attempt();
        let correlation_id = retry.correlation_id.clone();
        match self.queue.try_push(retry) {
            Ok(depth) => tracing::info!(
                correlation_id = %correlation_id,
                previous_correlation_id = %item.correlation_id,
                attempt = item.attempt + 1,
                depth,
                "retryable outcome re-enqueued"
            ),
            Err(error) => tracing::warn!(
                correlation_id = %correlation_id,
                capacity = error.capacity,
                "work queue full; automatic retry dropped"
            ),
        }
    }

    fn record_outcome(&self, item: &WorkItem, response: &AgentResponse) {
        self.retry_cache.add(RetryRecord {
            task_id: response.task_id.clone(),
            payload: item.payload.clone(),
            persona: item.persona.clone(),
            chat_hash: item.chat_hash.clone(),
            user_hash: item.user_hash.clone(),
            last_final_state: response.final_state,
            diagnostics: response.diagnostics.clone(),
            stored_at: Utc::now(),
        });
    }
}
