use clap::{ArgAction, Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliTransportMode {
    Live,
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliAgentMode {
    /// Submit tasks to the backend agent over HTTP.
    Live,
    /// Answer every prompt locally.
    Echo,
}

#[derive(Debug, Parser)]
#[command(
    name = "relay-cli",
    about = "Relays authorized Telegram prompts to a backend task agent",
    version
)]
/// Public struct `Cli` used across relay components.
pub struct Cli {
    #[arg(
        long,
        env = "TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        default_value = "",
        help = "Telegram bot token (not required in stub transport mode)"
    )]
    pub telegram_bot_token: String,

    #[arg(
        long,
        env = "TELEGRAM_CHAT_ID",
        allow_hyphen_values = true,
        help = "Only updates from this chat are admitted"
    )]
    pub telegram_chat_id: i64,

    #[arg(
        long,
        env = "TELEGRAM_PERSONA_MAP",
        default_value = "",
        help = "Sender-to-persona map: JSON object or 'user_id:persona,user_id:persona'"
    )]
    pub telegram_persona_map: String,

    #[arg(
        long,
        env = "TELEGRAM_TRANSPORT_MODE",
        value_enum,
        default_value = "live"
    )]
    pub telegram_transport_mode: CliTransportMode,

    #[arg(
        long,
        env = "TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org"
    )]
    pub telegram_api_base: String,

    #[arg(long, env = "TELEGRAM_QUEUE_SIZE", default_value_t = 25)]
    pub telegram_queue_size: usize,

    #[arg(
        long,
        env = "TELEGRAM_POLL_TIMEOUT",
        default_value_t = 30,
        help = "Long-poll timeout in seconds (5..=60)"
    )]
    pub telegram_poll_timeout: u64,

    #[arg(
        long,
        env = "TELEGRAM_MAX_ATTEMPTS",
        default_value_t = 2,
        help = "Dispatch attempts per prompt including automatic retries"
    )]
    pub telegram_max_attempts: u32,

    #[arg(long, env = "TELEGRAM_RATE_CAPACITY", default_value_t = 2)]
    pub telegram_rate_capacity: u32,

    #[arg(long, env = "TELEGRAM_RATE_REFILL_PER_MIN", default_value_t = 6)]
    pub telegram_rate_refill_per_min: u32,

    #[arg(long, env = "TELEGRAM_COMMANDER_CAPACITY", default_value_t = 4)]
    pub telegram_commander_capacity: u32,

    #[arg(long, env = "TELEGRAM_COMMANDER_REFILL_PER_MIN", default_value_t = 12)]
    pub telegram_commander_refill_per_min: u32,

    #[arg(
        long,
        env = "TELEGRAM_HEALTH_INTERVAL",
        default_value_t = 60,
        help = "Seconds between agent health probes"
    )]
    pub telegram_health_interval: u64,

    #[arg(long, env = "TELEGRAM_RETRY_CACHE_SIZE", default_value_t = 25)]
    pub telegram_retry_cache_size: usize,

    #[arg(long, env = "ROUTER_DISPATCH_CONCURRENCY", default_value_t = 1)]
    pub router_dispatch_concurrency: usize,

    #[arg(long, env = "ROUTER_HEALTH_HOST", default_value = "0.0.0.0")]
    pub router_health_host: String,

    #[arg(long, env = "ROUTER_HEALTH_PORT", default_value_t = 8080)]
    pub router_health_port: u16,

    #[arg(long, env = "ROUTER_HEALTH_PATH", default_value = "/healthz")]
    pub router_health_path: String,

    #[arg(long, env = "ROUTER_ENV", default_value = "local")]
    pub router_env: String,

    #[arg(long, env = "ROUTER_VERSION", default_value = "1.0.0")]
    pub router_version: String,

    #[arg(long, env = "RELAY_AGENT_MODE", value_enum, default_value = "live")]
    pub agent_mode: CliAgentMode,

    #[arg(long, env = "A2A_BASE_URL", help = "Backend task API base URL")]
    pub a2a_base_url: Option<String>,

    #[arg(long, env = "A2A_API_KEY", hide_env_values = true)]
    pub a2a_api_key: Option<String>,

    #[arg(
        long,
        env = "A2A_API_KEY_ISSUED_AT",
        help = "RFC 3339 issue time of the API key; keys older than 90 days are refused"
    )]
    pub a2a_api_key_issued_at: Option<String>,

    #[arg(
        long,
        env = "A2A_ALLOW_INSECURE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Permit a non-https backend base URL"
    )]
    pub a2a_allow_insecure: bool,

    #[arg(long, env = "A2A_POLL_INTERVAL_SECONDS", default_value_t = 2.0)]
    pub a2a_poll_interval_seconds: f64,

    #[arg(long, env = "A2A_POLL_TIMEOUT_SECONDS", default_value_t = 30.0)]
    pub a2a_poll_timeout_seconds: f64,

    #[arg(long, env = "A2A_RETRY_LIMIT", default_value_t = 1)]
    pub a2a_retry_limit: u32,

    #[arg(long, env = "A2A_RETRY_BACKOFF_SECONDS", default_value_t = 2.0)]
    pub a2a_retry_backoff_seconds: f64,

    #[arg(long, env = "A2A_RETRY_BACKOFF_MULTIPLIER", default_value_t = 2.0)]
    pub a2a_retry_backoff_multiplier: f64,

    #[arg(long, env = "A2A_RETRY_BACKOFF_MAX_SECONDS", default_value_t = 8.0)]
    pub a2a_retry_backoff_max_seconds: f64,

    #[arg(
        long,
        env = "A2A_ALLOWED_PROMPT_TAGS",
        help = "Allowed persona tags: JSON list/object or CSV"
    )]
    pub a2a_allowed_prompt_tags: Option<String>,

    #[arg(long, env = "A2A_ENVIRONMENT", default_value = "dev")]
    pub a2a_environment: String,

    #[arg(long, env = "A2A_COMPLIANCE_TAGS", help = "Compliance tags as a JSON object")]
    pub a2a_compliance_tags: Option<String>,

    #[arg(long, env = "A2A_REGION", default_value = "us-east-1")]
    pub a2a_region: String,

    #[arg(long, env = "A2A_CLASSIFICATION", default_value = "confidential")]
    pub a2a_classification: String,
}
