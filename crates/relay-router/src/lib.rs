//! Chat-side relay router.
//!
//! Long-polls the chat front-end, authenticates and rate limits inbound
//! events, queues work for a single-flight dispatch loop that drives a
//! [`relay_agent::TaskAgent`], and exposes aggregated health over HTTP.

pub mod chat_transport;
pub mod commands;
pub mod dispatch;
pub mod health;
pub mod health_server;
pub mod inbound;
pub mod rate_limiter;
pub mod render_helpers;
pub mod retry_cache;
pub mod router;
pub mod router_config;
pub mod update_processor;
pub mod work_queue;

#[cfg(test)]
mod test_support;

pub use chat_transport::{
    ChatReplier, ChatTransport, ChatTransportError, StubChatTransport, TelegramBotClient,
};
pub use commands::{CommandHandler, CommandReply};
pub use dispatch::{requeue_delay, DispatchContext, DispatchLoop};
pub use health::{ComponentHealth, ComponentHealthPayload, HealthStatus, RouterState};
pub use health_server::{bind_health_listener, build_health_router};
pub use inbound::{parse_update_bytes, AdminCommand, InboundEvent, UpdateCursor, WorkItem};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RateLimiterSnapshot};
pub use retry_cache::{RetryCache, RetryRecord};
pub use router::{RelayRouter, RouterHandle, RouterShared};
pub use router_config::{
    normalize_health_path, parse_persona_map, ChatTransportMode, RouterConfig, RouterConfigError,
};
pub use update_processor::{Admission, SecurityError, UpdateProcessor};
pub use work_queue::{QueueFullError, Reservation, WorkQueue};
