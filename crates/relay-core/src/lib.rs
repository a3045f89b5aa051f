//! Foundational low-level utilities shared across relay crates.
//!
//! Provides a wall-clock helper, correlation/message id generation, jitter
//! sampling, identifier hashing, and prompt sanitization used by the router
//! and the agent integration layer.

pub mod ids;
pub mod text;
pub mod time_utils;

pub use ids::{jitter_unit, new_correlation_id, new_message_id};
pub use text::{hash_identifier, sanitize_prompt, truncate_chars, MAX_PROMPT_CHARS};
pub use time_utils::utc_now_rfc3339;
