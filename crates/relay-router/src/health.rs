//! Component health tracking and router state derivation.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use relay_core::truncate_chars;
use serde::Serialize;

pub const LAST_ERROR_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealthPayload {
    pub status: HealthStatus,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct HealthRecord {
    failed: bool,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
/// Last-success / last-error tracker for one monitored component.
pub struct ComponentHealth {
    record: Mutex<HealthRecord>,
}

impl ComponentHealth {
    fn record(&self) -> MutexGuard<'_, HealthRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_success(&self) {
        self.mark_success_at(Utc::now());
    }

    pub fn mark_success_at(&self, now: DateTime<Utc>) {
        let mut record = self.record();
        record.failed = false;
        record.last_success = Some(now);
        record.last_error = None;
    }

    /// Records a failure; `failed` sticks until the next success.
    pub fn mark_failure(&self, reason: &str) {
        let mut record = self.record();
        record.failed = true;
        record.last_error = Some(truncate_chars(reason, LAST_ERROR_MAX_CHARS));
    }

    pub fn is_failed(&self) -> bool {
        self.record().failed
    }

    pub fn resolved_status(&self, now: DateTime<Utc>, stale_after: Duration) -> HealthStatus {
        resolve(&self.record(), now, stale_after)
    }

    pub fn payload(&self, now: DateTime<Utc>, stale_after: Duration) -> ComponentHealthPayload {
        let record = self.record();
        ComponentHealthPayload {
            status: resolve(&record, now, stale_after),
            last_success: record
                .last_success
                .map(|stamp| stamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            last_error: record.last_error.clone(),
        }
    }
}

fn resolve(record: &HealthRecord, now: DateTime<Utc>, stale_after: Duration) -> HealthStatus {
    if record.failed {
        return HealthStatus::Failed;
    }
    let Some(last_success) = record.last_success else {
        return HealthStatus::Starting;
    };
    let age = now
        .signed_duration_since(last_success)
        .to_std()
        .unwrap_or_default();
    if age <= stale_after {
        HealthStatus::Ready
    } else {
        HealthStatus::Degraded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    Starting,
    Ready,
    Degraded,
    Draining,
}

impl RouterState {
    /// Draining wins; both ready is ready; any failed or degraded component degrades.
    pub fn derive(draining: bool, chat: HealthStatus, agent: HealthStatus) -> Self {
        if draining {
            return Self::Draining;
        }
        match (chat, agent) {
            (HealthStatus::Ready, HealthStatus::Ready) => Self::Ready,
            (HealthStatus::Failed | HealthStatus::Degraded, _)
            | (_, HealthStatus::Failed | HealthStatus::Degraded) => Self::Degraded,
            _ => Self::Starting,
        }
    }

    /// Top-level probe label: ready, draining, or degraded.
    pub fn probe_status(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Starting | Self::Degraded => "degraded",
        }
    }
}
