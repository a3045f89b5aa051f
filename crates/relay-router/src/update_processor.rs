//! Admission: authenticate inbound events, rate limit, and enqueue work.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use relay_agent::Persona;
use relay_core::{hash_identifier, new_correlation_id, sanitize_prompt};
use thiserror::Error;

use crate::inbound::{AdminCommand, InboundEvent, WorkItem};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::render_helpers::{render_accept_reply, render_throttle_reply, QUEUE_FULL_REPLY};
use crate::work_queue::{Reservation, WorkQueue};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Reasons an inbound event is dropped without a reply.
pub enum SecurityError {
    #[error("missing update identifier")]
    MissingSequence,
    #[error("missing chat/user/message identifiers")]
    MissingIdentifiers,
    #[error("chat mismatch: {0}")]
    ChatMismatch(i64),
    #[error("user {0} not authorized")]
    UnauthorizedSender(i64),
    #[error("empty payload or unsupported message type")]
    EmptyPayload,
}

#[derive(Debug, PartialEq)]
/// Outcome of admitting one authenticated event.
pub enum Admission {
    Command(AdminCommand),
    /// The work item holds a queue slot and reaches dispatch once `pending` is published.
    Enqueued {
        correlation_id: String,
        queue_position: usize,
        reply: String,
        pending: Reservation<WorkItem>,
    },
    Throttled {
        decision: RateLimitDecision,
        reply: String,
    },
    QueueFull {
        reply: String,
    },
}

impl Admission {
    /// Inline reply owed to the sender; commands are answered by the command handler.
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Command(_) => None,
            Self::Enqueued { reply, .. }
            | Self::Throttled { reply, .. }
            | Self::QueueFull { reply } => Some(reply.as_str()),
        }
    }
}

pub struct UpdateProcessor {
    chat_id: i64,
    persona_map: BTreeMap<i64, Persona>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<WorkQueue<WorkItem>>,
}

impl UpdateProcessor {
    pub fn new(
        chat_id: i64,
        persona_map: BTreeMap<i64, Persona>,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<WorkQueue<WorkItem>>,
    ) -> Self {
        Self {
            chat_id,
            persona_map,
            rate_limiter,
            queue,
        }
    }

    pub fn handle(&self, event: InboundEvent) -> Result<Admission, SecurityError> {
        self.handle_at(event, Instant::now())
    }

    pub fn handle_at(&self, event: InboundEvent, now: Instant) -> Result<Admission, SecurityError> {
        let sequence = event.sequence.ok_or(SecurityError::MissingSequence)?;
        let (Some(chat_id), Some(sender_id), Some(message_id)) =
            (event.chat_id, event.sender_id, event.message_id)
        else {
            return Err(SecurityError::MissingIdentifiers);
        };
        if chat_id != self.chat_id {
            return Err(SecurityError::ChatMismatch(chat_id));
        }
        let persona = self
            .persona_map
            .get(&sender_id)
            .cloned()
            .ok_or(SecurityError::UnauthorizedSender(sender_id))?;
        let text = event
            .text
            .filter(|text| !text.is_empty())
            .ok_or(SecurityError::EmptyPayload)?;
        let chat_hash = hash_identifier(chat_id);
        let user_hash = hash_identifier(sender_id);

        if text.starts_with('/') {
            let mut tokens = text.split_whitespace();
            let name = tokens.next().unwrap_or("/").to_lowercase();
            return Ok(Admission::Command(AdminCommand {
                name,
                args: tokens.map(str::to_string).collect(),
                persona,
                requester_hash: user_hash,
                chat_message_id: message_id,
                sequence,
                received_at: Utc::now(),
            }));
        }

        let payload = sanitize_prompt(&text);
        if payload.is_empty() {
            return Err(SecurityError::EmptyPayload);
        }
        let item = WorkItem {
            persona: persona.clone(),
            payload,
            correlation_id: new_correlation_id(),
            chat_hash,
            user_hash,
            chat_message_id: message_id,
            sequence,
            attempt: 1,
            enqueued_at: Utc::now(),
        };

        let decision = self.rate_limiter.check(&persona, &item.user_hash, now);
        if !decision.allowed {
            tracing::info!(
                persona = %persona,
                correlation_id = %item.correlation_id,
                retry_after_secs = decision.retry_after_secs,
                violations = decision.violation_count,
                "prompt throttled"
            );
            return Ok(Admission::Throttled {
                reply: render_throttle_reply(&decision),
                decision,
            });
        }

        let correlation_id = item.correlation_id.clone();
        match self.queue.try_reserve(item) {
            Ok(pending) => {
                let queue_position = pending.position();
                tracing::info!(
                    persona = %persona,
                    correlation_id = %correlation_id,
                    queue_position,
                    "prompt enqueued"
                );
                Ok(Admission::Enqueued {
                    reply: render_accept_reply(&persona, &correlation_id, queue_position),
                    correlation_id,
                    queue_position,
                    pending,
                })
            }
            Err(error) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    capacity = error.capacity,
                    "work queue full; prompt rejected"
                );
                Ok(Admission::QueueFull {
                    reply: QUEUE_FULL_REPLY.to_string(),
                })
            }
        }
    }
}
