//! Structured events and in-memory counters for backend invocations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::persona::Persona;

#[derive(Debug, Default)]
/// Public struct `AgentTelemetry` used across relay components.
pub struct AgentTelemetry {
    requests: AtomicU64,
    responses: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    latency_ms_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentTelemetrySnapshot {
    pub requests: u64,
    pub responses: u64,
    pub failures: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub latency_ms_total: u64,
}

impl AgentTelemetry {
    pub fn emit_request(&self, correlation_id: &str, persona: &Persona, attempt: u32) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            correlation_id,
            persona = %persona,
            attempt,
            "agent request submitted"
        );
    }

    pub fn emit_response(
        &self,
        correlation_id: &str,
        persona: &Persona,
        attempt: u32,
        final_state: &str,
        latency_ms: u64,
    ) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
        tracing::info!(
            correlation_id,
            persona = %persona,
            attempt,
            final_state,
            latency_ms,
            "agent response received"
        );
    }

    pub fn emit_failure(
        &self,
        correlation_id: &str,
        persona: &Persona,
        attempt: u32,
        reason: &str,
        retryable: bool,
    ) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            correlation_id,
            persona = %persona,
            attempt,
            reason,
            retryable,
            "agent invocation failed"
        );
    }

    pub fn emit_retry(&self, correlation_id: &str, persona: &Persona, attempt: u32, wait: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            correlation_id,
            persona = %persona,
            attempt,
            wait_ms = wait.as_millis() as u64,
            "agent retry scheduled"
        );
    }

    pub fn emit_timeout(&self, correlation_id: &str, persona: &Persona) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(correlation_id, persona = %persona, "agent sla deadline exceeded");
    }

    pub fn snapshot(&self) -> AgentTelemetrySnapshot {
        AgentTelemetrySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            latency_ms_total: self.latency_ms_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AgentTelemetry;
    use crate::persona::Persona;

    #[test]
    fn unit_emitters_increment_matching_counters() {
        let telemetry = AgentTelemetry::default();
        let persona = Persona::Operator;
        telemetry.emit_request("corr-1", &persona, 1);
        telemetry.emit_retry("corr-1", &persona, 1, Duration::from_millis(600));
        telemetry.emit_request("corr-1", &persona, 2);
        telemetry.emit_response("corr-1", &persona, 2, "completed", 120);
        telemetry.emit_failure("corr-2", &persona, 1, "boom", false);
        telemetry.emit_timeout("corr-3", &persona);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.responses, 1);
        assert_eq!(snapshot.latency_ms_total, 120);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.timeouts, 1);
    }
}
