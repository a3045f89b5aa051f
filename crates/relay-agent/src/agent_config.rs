//! Backend agent configuration, validation, and per-persona policy tables.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{Map, Value};

use crate::agent_errors::AgentConfigError;
use crate::persona::Persona;

pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
pub const DEFAULT_POLL_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_RETRY_LIMIT: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF_SECS: f64 = 2.0;
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_RETRY_BACKOFF_MAX_SECS: f64 = 8.0;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const API_KEY_MAX_AGE_DAYS: i64 = 90;
pub const API_KEY_WARN_AGE_DAYS: i64 = 75;
const MIN_POLL_INTERVAL_SECS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Wall-clock ceilings per persona class.
pub struct SlaBudgets {
    pub incident_commander: Duration,
    pub automation_auditor: Duration,
    pub default: Duration,
}

impl Default for SlaBudgets {
    fn default() -> Self {
        Self {
            incident_commander: Duration::from_secs(8),
            automation_auditor: Duration::from_secs(10),
            default: Duration::from_secs(12),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `AgentConfig` used across relay components.
pub struct AgentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_multiplier: f64,
    pub retry_backoff_max: Duration,
    pub allowed_persona_tags: BTreeSet<String>,
    pub api_key_issued_at: Option<DateTime<Utc>>,
    pub allow_insecure: bool,
    pub environment: String,
    pub compliance_tags: Map<String, Value>,
    pub sla_budgets: SlaBudgets,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of the api key rotation check.
pub enum ApiKeyAge {
    Unknown,
    Fresh { age_days: i64 },
    NearingExpiry { age_days: i64 },
}

impl AgentConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            poll_timeout: Duration::from_secs_f64(DEFAULT_POLL_TIMEOUT_SECS),
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff: Duration::from_secs_f64(DEFAULT_RETRY_BACKOFF_SECS),
            retry_backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
            retry_backoff_max: Duration::from_secs_f64(DEFAULT_RETRY_BACKOFF_MAX_SECS),
            allowed_persona_tags: default_persona_tags(),
            api_key_issued_at: None,
            allow_insecure: false,
            environment: "dev".to_string(),
            compliance_tags: default_compliance_tags("us-east-1", "confidential"),
            sla_budgets: SlaBudgets::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Clamps derived settings: trailing slashes, multiplier >= 1, max >= base.
    pub fn normalize(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            self.retry_backoff_multiplier = 1.0;
        }
        self.retry_backoff_max = self.retry_backoff_max.max(self.retry_backoff);
        self
    }

    pub fn validate(&self) -> Result<ApiKeyAge, AgentConfigError> {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<ApiKeyAge, AgentConfigError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(AgentConfigError::MissingBaseUrl);
        }
        let parsed = Url::parse(base_url).map_err(|error| AgentConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;
        if parsed.scheme() != "https" && !self.allow_insecure {
            return Err(AgentConfigError::InsecureBaseUrl);
        }

        let Some(issued_at) = self.api_key_issued_at else {
            return Ok(ApiKeyAge::Unknown);
        };
        let age_days = now.signed_duration_since(issued_at).num_days();
        if age_days > API_KEY_MAX_AGE_DAYS {
            return Err(AgentConfigError::ApiKeyExpired {
                age_days,
                max_days: API_KEY_MAX_AGE_DAYS,
            });
        }
        if age_days > API_KEY_WARN_AGE_DAYS {
            return Ok(ApiKeyAge::NearingExpiry { age_days });
        }
        Ok(ApiKeyAge::Fresh { age_days })
    }

    /// Maximum polls per submission attempt, never below one.
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_secs_f64().max(MIN_POLL_INTERVAL_SECS);
        let polls = (self.poll_timeout.as_secs_f64() / interval).floor();
        if polls >= f64::from(u32::MAX) {
            return u32::MAX;
        }
        (polls as u32).max(1)
    }

    /// Symmetric jitter magnitude applied between polls.
    pub fn poll_jitter_spread(&self) -> f64 {
        0.2 * self.poll_interval.as_secs_f64()
    }

    pub fn sla_budget(&self, persona: &Persona) -> Duration {
        match persona {
            Persona::IncidentCommander => self.sla_budgets.incident_commander,
            Persona::AutomationAuditor => self.sla_budgets.automation_auditor,
            _ => self.sla_budgets.default,
        }
    }

    /// Automatic resubmissions allowed after the first attempt.
    pub fn auto_retry_budget(&self, persona: &Persona) -> u32 {
        match persona {
            Persona::Operator => 2.min(self.retry_limit.saturating_add(1)),
            Persona::OnCall => 1.min(self.retry_limit),
            _ => 0,
        }
    }
}

/// Converts a seconds value from configuration into a [`Duration`].
pub fn seconds_to_duration(field: &'static str, value: f64) -> Result<Duration, AgentConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| AgentConfigError::InvalidDuration { field, value })
}

pub fn default_persona_tags() -> BTreeSet<String> {
    Persona::canonical_tags()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Parses the allow-listed persona tags from a JSON list/object or CSV.
///
/// Entries are canonicalized the same way as inbound persona text, so the
/// set holds [`Persona::tag`] values. Empty input falls back to the
/// canonical persona set.
pub fn parse_persona_tags(raw: Option<&str>) -> BTreeSet<String> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return default_persona_tags();
    };
    let values = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items.iter().map(json_scalar_text).collect::<Vec<_>>(),
        Ok(Value::Object(map)) => map.keys().cloned().collect(),
        Ok(other) => vec![json_scalar_text(&other)],
        Err(_) => raw
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect(),
    };
    let normalized = values
        .iter()
        .filter_map(|value| Persona::parse(value))
        .map(|persona| persona.tag().to_string())
        .collect::<BTreeSet<_>>();
    if normalized.is_empty() {
        return default_persona_tags();
    }
    normalized
}

/// Parses compliance tags from a JSON object; anything else yields `None`.
pub fn parse_compliance_tags(raw: Option<&str>) -> Option<Map<String, Value>> {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty())?;
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

pub fn default_compliance_tags(region: &str, classification: &str) -> Map<String, Value> {
    let mut tags = Map::new();
    tags.insert("region".to_string(), Value::String(region.to_string()));
    tags.insert(
        "classification".to_string(),
        Value::String(classification.to_string()),
    );
    tags
}

/// Parses an RFC 3339 issued-at timestamp (a bare `Z` suffix is accepted).
pub fn parse_issued_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AgentConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|_| AgentConfigError::InvalidIssuedAt(raw.to_string()))
}

fn json_scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};

    use super::{
        parse_compliance_tags, parse_issued_at, parse_persona_tags, seconds_to_duration,
        AgentConfig, ApiKeyAge,
    };
    use crate::agent_errors::AgentConfigError;
    use crate::persona::Persona;

    #[test]
    fn unit_validate_rejects_plain_http_unless_insecure_allowed() {
        let config = AgentConfig::new("http://agent.internal");
        assert_eq!(config.validate(), Err(AgentConfigError::InsecureBaseUrl));

        let insecure = AgentConfig {
            allow_insecure: true,
            ..AgentConfig::new("http://agent.internal")
        };
        assert_eq!(insecure.validate(), Ok(ApiKeyAge::Unknown));
    }

    #[test]
    fn unit_validate_rejects_missing_and_malformed_base_urls() {
        assert_eq!(
            AgentConfig::new("  ").validate(),
            Err(AgentConfigError::MissingBaseUrl)
        );
        assert!(matches!(
            AgentConfig::new("not a url").validate(),
            Err(AgentConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn functional_validate_applies_api_key_rotation_policy() {
        let now = Utc::now();
        let mut config = AgentConfig::new("https://agent.example.com");

        config.api_key_issued_at = Some(now - ChronoDuration::days(10));
        assert_eq!(
            config.validate_at(now),
            Ok(ApiKeyAge::Fresh { age_days: 10 })
        );

        config.api_key_issued_at = Some(now - ChronoDuration::days(80));
        assert_eq!(
            config.validate_at(now),
            Ok(ApiKeyAge::NearingExpiry { age_days: 80 })
        );

        config.api_key_issued_at = Some(now - ChronoDuration::days(91));
        assert!(matches!(
            config.validate_at(now),
            Err(AgentConfigError::ApiKeyExpired { age_days: 91, .. })
        ));
    }

    #[test]
    fn unit_normalize_clamps_backoff_settings() {
        let config = AgentConfig {
            retry_backoff: Duration::from_secs(4),
            retry_backoff_max: Duration::from_secs(1),
            retry_backoff_multiplier: 0.5,
            ..AgentConfig::new("https://agent.example.com///")
        }
        .normalize();
        assert_eq!(config.base_url, "https://agent.example.com");
        assert_eq!(config.retry_backoff_multiplier, 1.0);
        assert_eq!(config.retry_backoff_max, Duration::from_secs(4));
    }

    #[test]
    fn unit_max_polls_is_derived_from_timeout_and_interval() {
        let mut config = AgentConfig::new("https://agent.example.com");
        assert_eq!(config.max_polls(), 15);

        config.poll_interval = Duration::from_millis(10);
        config.poll_timeout = Duration::from_secs(1);
        assert_eq!(config.max_polls(), 10);

        config.poll_timeout = Duration::ZERO;
        assert_eq!(config.max_polls(), 1);
    }

    #[test]
    fn unit_persona_policy_tables_key_off_canonical_persona() {
        let config = AgentConfig {
            retry_limit: 2,
            ..AgentConfig::new("https://agent.example.com")
        };
        assert_eq!(config.auto_retry_budget(&Persona::Operator), 2);
        assert_eq!(config.auto_retry_budget(&Persona::OnCall), 1);
        assert_eq!(config.auto_retry_budget(&Persona::IncidentCommander), 0);
        assert_eq!(
            config.auto_retry_budget(&Persona::Custom("Guest".to_string())),
            0
        );

        assert_eq!(
            config.sla_budget(&Persona::IncidentCommander),
            Duration::from_secs(8)
        );
        assert_eq!(
            config.sla_budget(&Persona::AutomationAuditor),
            Duration::from_secs(10)
        );
        assert_eq!(config.sla_budget(&Persona::OnCall), Duration::from_secs(12));
    }

    #[test]
    fn regression_zero_retry_limit_still_grants_operator_one_resubmission() {
        let config = AgentConfig {
            retry_limit: 0,
            ..AgentConfig::new("https://agent.example.com")
        };
        assert_eq!(config.auto_retry_budget(&Persona::Operator), 1);
        assert_eq!(config.auto_retry_budget(&Persona::OnCall), 0);
    }

    #[test]
    fn unit_parse_persona_tags_accepts_json_and_csv() {
        let from_json = parse_persona_tags(Some(r#"["operator", "OnCall"]"#));
        assert!(from_json.contains("Operator"));
        assert!(from_json.contains("OnCall"));
        assert_eq!(from_json.len(), 2);

        let from_object = parse_persona_tags(Some(r#"{"IncidentCommander": true}"#));
        assert!(from_object.contains("IncidentCommander"));

        let from_csv = parse_persona_tags(Some("operator, automation auditor ,"));
        assert!(from_csv.contains("Operator"));
        assert!(from_csv.contains("AutomationAuditor"));

        let fallback = parse_persona_tags(Some("   "));
        assert_eq!(fallback.len(), 4);
    }

    #[test]
    fn regression_parse_persona_tags_canonicalizes_known_personas() {
        let tags = parse_persona_tags(Some("operator,oncall,incident_commander"));
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["IncidentCommander", "OnCall", "Operator"]
        );

        let custom = parse_persona_tags(Some(r#"["SRE", "release manager"]"#));
        assert_eq!(
            custom.into_iter().collect::<Vec<_>>(),
            vec!["Release Manager", "Sre"]
        );
    }

    #[test]
    fn unit_parse_compliance_tags_requires_json_object() {
        let tags = parse_compliance_tags(Some(r#"{"region":"eu-west-1"}"#)).expect("object");
        assert_eq!(tags["region"], "eu-west-1");
        assert!(parse_compliance_tags(Some("[1,2]")).is_none());
        assert!(parse_compliance_tags(Some("not json")).is_none());
        assert!(parse_compliance_tags(None).is_none());
    }

    #[test]
    fn unit_parse_issued_at_accepts_rfc3339_and_rejects_garbage() {
        let parsed = parse_issued_at(Some("2026-01-02T03:04:05Z")).expect("parse");
        assert!(parsed.is_some());
        assert_eq!(parse_issued_at(None), Ok(None));
        assert!(matches!(
            parse_issued_at(Some("yesterday")),
            Err(AgentConfigError::InvalidIssuedAt(_))
        ));
    }

    #[test]
    fn unit_seconds_to_duration_rejects_negative_values() {
        assert_eq!(
            seconds_to_duration("poll_interval", 0.25),
            Ok(Duration::from_millis(250))
        );
        assert!(seconds_to_duration("poll_interval", -1.0).is_err());
        assert!(seconds_to_duration("poll_interval", f64::NAN).is_err());
    }
}
