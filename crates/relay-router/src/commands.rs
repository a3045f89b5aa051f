//! Operator commands: `/status`, `/retry <task_id>`, `/flush`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::inbound::{AdminCommand, UpdateCursor, WorkItem};
use crate::render_helpers::{
    render_flush_reply, render_requeued_reply, render_status_reply, QUEUE_FULL_REPLY,
    RETRY_NOT_FOUND_REPLY, RETRY_USAGE_REPLY, UNKNOWN_COMMAND_REPLY,
};
use crate::retry_cache::RetryCache;
use crate::work_queue::{Reservation, WorkQueue};

#[derive(Debug)]
/// Reply text plus any requeued work that must be published after the reply is sent.
pub struct CommandReply {
    pub text: String,
    pub pending: Option<Reservation<WorkItem>>,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pending: None,
        }
    }
}

pub struct CommandHandler {
    queue: Arc<WorkQueue<WorkItem>>,
    retry_cache: Arc<RetryCache>,
    cursor: Arc<UpdateCursor>,
}

impl CommandHandler {
    pub fn new(
        queue: Arc<WorkQueue<WorkItem>>,
        retry_cache: Arc<RetryCache>,
        cursor: Arc<UpdateCursor>,
    ) -> Self {
        Self {
            queue,
            retry_cache,
            cursor,
        }
    }

    /// Executes `command` and returns the reply.
    pub fn handle(&self, command: &AdminCommand) -> CommandReply {
        self.handle_at(command, Utc::now())
    }

    pub fn handle_at(&self, command: &AdminCommand, now: DateTime<Utc>) -> CommandReply {
        let reply = match command.name.as_str() {
            "/status" => CommandReply::text(render_status_reply(
                self.queue.len(),
                self.retry_cache.len(),
                self.cursor.last(),
                now,
            )),
            "/retry" => self.retry(command),
            "/flush" => CommandReply::text(self.flush()),
            _ => CommandReply::text(UNKNOWN_COMMAND_REPLY),
        };
        tracing::info!(
            command = %command.name,
            persona = %command.persona,
            requester = %command.requester_hash,
            "admin command handled"
        );
        reply
    }

    fn retry(&self, command: &AdminCommand) -> CommandReply {
        let Some(task_id) = command.args.first() else {
            return CommandReply::text(RETRY_USAGE_REPLY);
        };
        let Some(record) = self.retry_cache.get(task_id) else {
            return CommandReply::text(RETRY_NOT_FOUND_REPLY);
        };
        match self
            .queue
            .try_reserve(WorkItem::from_retry_record(&record, command))
        {
            Ok(reservation) => CommandReply {
                text: render_requeued_reply(task_id),
                pending: Some(reservation),
            },
            Err(_) => CommandReply::text(QUEUE_FULL_REPLY),
        }
    }

    fn flush(&self) -> String {
        let drained = self.queue.drain().len();
        self.retry_cache.clear();
        tracing::warn!(drained, "queue flushed and retry cache cleared");
        render_flush_reply(drained)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use relay_agent::Persona;

    use super::CommandHandler;
    use crate::inbound::{AdminCommand, UpdateCursor, WorkItem};
    use crate::retry_cache::tests::record;
    use crate::retry_cache::RetryCache;
    use crate::work_queue::WorkQueue;

    struct Fixture {
        queue: Arc<WorkQueue<WorkItem>>,
        retry_cache: Arc<RetryCache>,
        cursor: Arc<UpdateCursor>,
        handler: CommandHandler,
    }

    fn fixture(queue_size: usize) -> Fixture {
        let queue = Arc::new(WorkQueue::new(queue_size));
        let retry_cache = Arc::new(RetryCache::new(5));
        let cursor = Arc::new(UpdateCursor::default());
        let handler = CommandHandler::new(
            Arc::clone(&queue),
            Arc::clone(&retry_cache),
            Arc::clone(&cursor),
        );
        Fixture {
            queue,
            retry_cache,
            cursor,
            handler,
        }
    }

    fn command(name: &str, args: &[&str]) -> AdminCommand {
        AdminCommand {
            name: name.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            persona: Persona::Operator,
            requester_hash: "requester".to_string(),
            chat_message_id: 77,
            sequence: 9,
            received_at: Utc::now(),
        }
    }

    fn work_item(payload: &str) -> WorkItem {
        WorkItem {
            persona: Persona::OnCall,
            payload: payload.to_string(),
            correlation_id: format!("corr-{payload}"),
            chat_hash: "chat".to_string(),
            user_hash: "user".to_string(),
            chat_message_id: 1,
            sequence: 1,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn functional_status_reports_depth_cache_and_cursor() {
        let fixture = fixture(5);
        fixture.queue.try_push(work_item("a")).expect("push");
        fixture.retry_cache.add(record("task-1", "a"));
        fixture.cursor.record(42);
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time");
        assert_eq!(
            fixture.handler.handle_at(&command("/status", &[]), now).text,
            "queue_depth: 1\nretry_cache: 1\nlast_update_id: 42\ntimestamp: 2026-01-02T03:04:05.000Z"
        );
    }

    #[test]
    fn functional_retry_requeues_cached_payload_as_first_attempt() {
        let fixture = fixture(5);
        fixture.retry_cache.add(record("task-1", "deploy canary"));
        let reply = fixture.handler.handle(&command("/retry", &["task-1"]));
        assert_eq!(reply.text, "Task task-1 requeued.");
        assert!(fixture.queue.is_empty());

        let pending = reply.pending.expect("reserved slot");
        assert_eq!(pending.publish(), 1);
        let item = fixture.queue.try_pop().expect("requeued item");
        assert_eq!(item.payload, "deploy canary");
        assert_eq!(item.persona, Persona::Operator);
        assert_eq!(item.attempt, 1);
        assert_eq!(item.chat_message_id, 77);
        assert_eq!(item.sequence, 9);
    }

    #[test]
    fn functional_retry_without_argument_or_unknown_id_leaves_queue_unchanged() {
        let fixture = fixture(5);
        fixture.queue.try_push(work_item("a")).expect("push");
        assert_eq!(
            fixture.handler.handle(&command("/retry", &[])).text,
            "Usage: /retry <task_id>"
        );
        assert_eq!(
            fixture.handler.handle(&command("/retry", &["missing"])).text,
            "Task ID not found or expired."
        );
        assert_eq!(fixture.queue.len(), 1);
    }

    #[test]
    fn regression_retry_into_full_queue_reports_backpressure() {
        let fixture = fixture(1);
        fixture.queue.try_push(work_item("a")).expect("push");
        fixture.retry_cache.add(record("task-1", "b"));
        let reply = fixture.handler.handle(&command("/retry", &["task-1"]));
        assert_eq!(reply.text, "Queue is full, please retry shortly.");
        assert!(reply.pending.is_none());
        assert_eq!(fixture.queue.len(), 1);
    }

    #[test]
    fn functional_flush_drains_queue_and_clears_cache() {
        let fixture = fixture(5);
        for payload in ["a", "b", "c"] {
            fixture.queue.try_push(work_item(payload)).expect("push");
        }
        fixture.retry_cache.add(record("task-1", "a"));
        fixture.retry_cache.add(record("task-2", "b"));
        assert_eq!(
            fixture.handler.handle(&command("/flush", &[])).text,
            "Flushed 3 queued prompts and cleared retry cache."
        );
        assert!(fixture.queue.is_empty());
        assert!(fixture.retry_cache.is_empty());
    }

    #[test]
    fn unit_unknown_command_is_reported() {
        let fixture = fixture(5);
        assert_eq!(
            fixture.handler.handle(&command("/deploy", &[])).text,
            "Unknown command."
        );
    }
}
