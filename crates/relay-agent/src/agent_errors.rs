use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
/// Enumerates supported `AgentConfigError` values.
pub enum AgentConfigError {
    #[error("agent base url is required")]
    MissingBaseUrl,
    #[error("agent base url '{url}' is invalid: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("agent base url must be https unless insecure transport is allowed")]
    InsecureBaseUrl,
    #[error("agent api key is {age_days} days old (max {max_days}); rotate before deploying")]
    ApiKeyExpired { age_days: i64, max_days: i64 },
    #[error("invalid api key issued-at timestamp '{0}'")]
    InvalidIssuedAt(String),
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("persona tag missing")]
    MissingPersona,
    #[error("persona {0} is not allowed")]
    PersonaNotAllowed(String),
    #[error("failed to build agent http client: {0}")]
    HttpClient(String),
}

/// Transport-level failure surfaced by a [`crate::TaskTransport`].
///
/// `recoverable` separates the server-side/rate-limit class (worth another
/// submission) from the bad-request class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", render_context(.http_status, .detail))]
pub struct TransportError {
    pub message: String,
    pub recoverable: bool,
    pub http_status: Option<u16>,
    pub task_id: Option<String>,
    pub detail: Option<String>,
}

impl TransportError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
            http_status: None,
            task_id: None,
            detail: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            ..Self::recoverable(message)
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a task id unless one is already recorded.
    pub fn with_task_id(mut self, task_id: &str) -> Self {
        if self.task_id.is_none() {
            self.task_id = Some(task_id.to_string());
        }
        self
    }
}

fn render_context(http_status: &Option<u16>, detail: &Option<String>) -> String {
    let mut rendered = String::new();
    if let Some(status) = http_status {
        rendered.push_str(&format!(" (status={status})"));
    }
    if let Some(detail) = detail {
        rendered.push_str(&format!(" detail={detail}"));
    }
    rendered
}

#[derive(Debug, Error)]
/// Infrastructure faults raised out of `TaskAgent::invoke`.
pub enum AgentInvokeError {
    #[error(transparent)]
    Config(#[from] AgentConfigError),
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}
