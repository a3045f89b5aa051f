use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_agent::{
    default_compliance_tags, parse_compliance_tags, parse_issued_at, parse_persona_tags,
    seconds_to_duration, AgentConfig, EchoAgent, TaskAgent, TaskIntegrationService,
};
use relay_router::{
    normalize_health_path, parse_persona_map, ChatTransport, ChatTransportMode, RouterConfig,
    StubChatTransport, TelegramBotClient,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::{Cli, CliAgentMode, CliTransportMode};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn build_router_config(cli: &Cli) -> Result<RouterConfig> {
    let persona_map =
        parse_persona_map(&cli.telegram_persona_map).context("invalid TELEGRAM_PERSONA_MAP")?;
    let mut config = RouterConfig::new(
        cli.telegram_bot_token.trim(),
        cli.telegram_chat_id,
        persona_map,
    );
    config.transport_mode = match cli.telegram_transport_mode {
        CliTransportMode::Live => ChatTransportMode::Live,
        CliTransportMode::Stub => ChatTransportMode::Stub,
    };
    config.telegram_api_base = cli.telegram_api_base.clone();
    config.queue_size = cli.telegram_queue_size;
    config.poll_timeout_secs = cli.telegram_poll_timeout;
    config.retry_attempts = cli.telegram_max_attempts;
    config.rate_capacity = cli.telegram_rate_capacity;
    config.rate_refill_per_min = cli.telegram_rate_refill_per_min;
    config.commander_capacity = cli.telegram_commander_capacity;
    config.commander_refill_per_min = cli.telegram_commander_refill_per_min;
    config.health_interval = Duration::from_secs(cli.telegram_health_interval.max(1));
    config.retry_cache_size = cli.telegram_retry_cache_size;
    config.dispatch_concurrency = cli.router_dispatch_concurrency;
    config.health_host = cli.router_health_host.clone();
    config.health_port = cli.router_health_port;
    config.health_path = normalize_health_path(Some(&cli.router_health_path));
    config.env = cli.router_env.clone();
    config.router_version = cli.router_version.clone();
    config.validate().context("invalid router configuration")?;
    Ok(config)
}

pub(crate) fn build_agent_config(cli: &Cli) -> Result<AgentConfig> {
    let base_url = cli.a2a_base_url.as_deref().map(str::trim).unwrap_or_default();
    if base_url.is_empty() {
        bail!("A2A_BASE_URL is required when RELAY_AGENT_MODE=live");
    }
    let mut config = AgentConfig::new(base_url);
    config.api_key = cli
        .a2a_api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    config.api_key_issued_at = parse_issued_at(cli.a2a_api_key_issued_at.as_deref())?;
    config.allow_insecure = cli.a2a_allow_insecure;
    config.poll_interval =
        seconds_to_duration("A2A_POLL_INTERVAL_SECONDS", cli.a2a_poll_interval_seconds)?;
    config.poll_timeout =
        seconds_to_duration("A2A_POLL_TIMEOUT_SECONDS", cli.a2a_poll_timeout_seconds)?;
    config.retry_limit = cli.a2a_retry_limit;
    config.retry_backoff =
        seconds_to_duration("A2A_RETRY_BACKOFF_SECONDS", cli.a2a_retry_backoff_seconds)?;
    config.retry_backoff_multiplier = cli.a2a_retry_backoff_multiplier;
    config.retry_backoff_max = seconds_to_duration(
        "A2A_RETRY_BACKOFF_MAX_SECONDS",
        cli.a2a_retry_backoff_max_seconds,
    )?;
    config.allowed_persona_tags = parse_persona_tags(cli.a2a_allowed_prompt_tags.as_deref());
    config.environment = cli.a2a_environment.clone();
    config.compliance_tags = parse_compliance_tags(cli.a2a_compliance_tags.as_deref())
        .unwrap_or_else(|| default_compliance_tags(&cli.a2a_region, &cli.a2a_classification));
    Ok(config.normalize())
}

pub(crate) fn build_agent(cli: &Cli) -> Result<Arc<dyn TaskAgent>> {
    match cli.agent_mode {
        CliAgentMode::Echo => {
            tracing::info!("agent mode echo; prompts are answered locally");
            Ok(Arc::new(EchoAgent))
        }
        CliAgentMode::Live => {
            let config = build_agent_config(cli)?;
            let service = TaskIntegrationService::from_config(config)
                .context("invalid agent configuration")?;
            tracing::info!(
                base_url = %service.config().base_url,
                environment = %service.config().environment,
                "agent integration configured"
            );
            Ok(Arc::new(service))
        }
    }
}

pub(crate) fn build_chat_transport(config: &RouterConfig) -> Result<Arc<dyn ChatTransport>> {
    match config.transport_mode {
        ChatTransportMode::Stub => Ok(Arc::new(StubChatTransport)),
        ChatTransportMode::Live => {
            let client =
                TelegramBotClient::new(&config.telegram_bot_token, &config.telegram_api_base)
                    .context("failed to build telegram client")?;
            Ok(Arc::new(client))
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
