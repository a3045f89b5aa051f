//! Router configuration and startup validation.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use relay_agent::Persona;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_HEALTH_PATH: &str = "/healthz";
pub const MIN_POLL_TIMEOUT_SECS: u64 = 5;
pub const MAX_POLL_TIMEOUT_SECS: u64 = 60;
const TELEGRAM_TOKEN_PATTERN: &str = r"^\d+:[A-Za-z0-9_-]{35,}$";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `RouterConfigError` values.
pub enum RouterConfigError {
    #[error("transport mode must be 'live' or 'stub' (got '{0}')")]
    InvalidTransportMode(String),
    #[error("telegram bot token failed validation")]
    InvalidBotToken,
    #[error("queue size must be positive")]
    ZeroQueueSize,
    #[error("poll timeout must be between 5 and 60 seconds (got {0})")]
    PollTimeoutOutOfRange(u64),
    #[error("retry attempts must be >= 1")]
    ZeroRetryAttempts,
    #[error("dispatch concurrency must be >= 1")]
    ZeroDispatchConcurrency,
    #[error("persona map is required")]
    EmptyPersonaMap,
    #[error("invalid persona map entry '{0}'")]
    InvalidPersonaMapEntry(String),
    #[error("health port must be between 1 and 65535")]
    InvalidHealthPort,
    #[error("health path must start with '/'")]
    InvalidHealthPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatTransportMode {
    #[default]
    Live,
    Stub,
}

impl ChatTransportMode {
    pub fn parse(raw: &str) -> Result<Self, RouterConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "live" => Ok(Self::Live),
            "stub" => Ok(Self::Stub),
            other => Err(RouterConfigError::InvalidTransportMode(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Stub => "stub",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `RouterConfig` used across relay components.
pub struct RouterConfig {
    pub telegram_bot_token: String,
    pub telegram_chat_id: i64,
    pub persona_map: BTreeMap<i64, Persona>,
    pub transport_mode: ChatTransportMode,
    pub telegram_api_base: String,
    pub queue_size: usize,
    pub poll_timeout_secs: u64,
    pub retry_attempts: u32,
    pub rate_capacity: u32,
    pub rate_refill_per_min: u32,
    pub commander_capacity: u32,
    pub commander_refill_per_min: u32,
    pub health_interval: Duration,
    pub retry_cache_size: usize,
    pub dispatch_concurrency: usize,
    pub health_host: String,
    pub health_port: u16,
    pub health_path: String,
    pub env: String,
    pub router_version: String,
    /// Unit multiplied by `2^attempt` before a retryable item is re-enqueued.
    pub retry_unit: Duration,
    pub drain_grace: Duration,
}

impl RouterConfig {
    pub fn new(
        telegram_bot_token: impl Into<String>,
        telegram_chat_id: i64,
        persona_map: BTreeMap<i64, Persona>,
    ) -> Self {
        Self {
            telegram_bot_token: telegram_bot_token.into(),
            telegram_chat_id,
            persona_map,
            transport_mode: ChatTransportMode::Live,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            queue_size: 25,
            poll_timeout_secs: 30,
            retry_attempts: 2,
            rate_capacity: 2,
            rate_refill_per_min: 6,
            commander_capacity: 4,
            commander_refill_per_min: 12,
            health_interval: Duration::from_secs(60),
            retry_cache_size: 25,
            dispatch_concurrency: 1,
            health_host: "0.0.0.0".to_string(),
            health_port: 8080,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            env: "local".to_string(),
            router_version: "1.0.0".to_string(),
            retry_unit: Duration::from_secs(1),
            drain_grace: Duration::from_secs(10),
        }
    }

    pub fn validate(&self) -> Result<(), RouterConfigError> {
        if self.transport_mode != ChatTransportMode::Stub
            && !is_valid_bot_token(&self.telegram_bot_token)
        {
            return Err(RouterConfigError::InvalidBotToken);
        }
        if self.queue_size == 0 {
            return Err(RouterConfigError::ZeroQueueSize);
        }
        if !(MIN_POLL_TIMEOUT_SECS..=MAX_POLL_TIMEOUT_SECS).contains(&self.poll_timeout_secs) {
            return Err(RouterConfigError::PollTimeoutOutOfRange(
                self.poll_timeout_secs,
            ));
        }
        if self.retry_attempts == 0 {
            return Err(RouterConfigError::ZeroRetryAttempts);
        }
        if self.dispatch_concurrency == 0 {
            return Err(RouterConfigError::ZeroDispatchConcurrency);
        }
        if self.persona_map.is_empty() {
            return Err(RouterConfigError::EmptyPersonaMap);
        }
        if self.health_port == 0 {
            return Err(RouterConfigError::InvalidHealthPort);
        }
        if !self.health_path.starts_with('/') {
            return Err(RouterConfigError::InvalidHealthPath);
        }
        Ok(())
    }

    /// Window after which a component's last success no longer counts as fresh.
    pub fn health_stale_after(&self) -> Duration {
        (self.health_interval * 2).max(Duration::from_secs(30))
    }

    pub fn health_bind_addr(&self) -> String {
        format!("{}:{}", self.health_host, self.health_port)
    }
}

pub fn is_valid_bot_token(token: &str) -> bool {
    Regex::new(TELEGRAM_TOKEN_PATTERN)
        .map(|pattern| pattern.is_match(token.trim()))
        .unwrap_or(false)
}

/// Parses `{"<id>": "<persona>"}` JSON or an `id:persona,id:persona` list.
pub fn parse_persona_map(raw: &str) -> Result<BTreeMap<i64, Persona>, RouterConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    let pairs = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| {
                let persona = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, persona)
            })
            .collect::<Vec<_>>(),
        Ok(_) => return Err(RouterConfigError::InvalidPersonaMapEntry(raw.to_string())),
        Err(_) => raw
            .split(',')
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .filter_map(|chunk| {
                let (user, persona) = chunk.split_once(':')?;
                Some((user.trim().to_string(), persona.trim().to_string()))
            })
            .filter(|(user, persona)| !user.is_empty() && !persona.is_empty())
            .collect(),
    };

    let mut mapping = BTreeMap::new();
    for (user, persona) in pairs {
        let user_id = user
            .trim()
            .parse::<i64>()
            .map_err(|_| RouterConfigError::InvalidPersonaMapEntry(format!("{user}:{persona}")))?;
        let persona = Persona::parse(&persona)
            .ok_or_else(|| RouterConfigError::InvalidPersonaMapEntry(format!("{user}:")))?;
        mapping.insert(user_id, persona);
    }
    Ok(mapping)
}

/// Trims the path and prefixes `/` when missing; blank falls back to `/healthz`.
pub fn normalize_health_path(raw: Option<&str>) -> String {
    let path = raw.map(str::trim).unwrap_or_default();
    if path.is_empty() {
        return DEFAULT_HEALTH_PATH.to_string();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
