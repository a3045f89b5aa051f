use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use httpmock::prelude::*;
use relay_agent::{AgentConfig, Persona, TaskAgent, TaskIntegrationService};
use relay_router::{
    ChatTransport, ChatTransportError, RelayRouter, RouterConfig, RouterHandle, TelegramBotClient,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const CHAT_ID: i64 = -100;
const OPERATOR_ID: i64 = 111;
const ON_CALL_ID: i64 = 222;
const BOT_TOKEN: &str = "123456:ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghi";

/// Scripted inbound updates; replies go to a real Telegram client.
struct ScriptedUpdates {
    batches: Mutex<VecDeque<Vec<Value>>>,
    outbound: TelegramBotClient,
}

impl ScriptedUpdates {
    fn new(batches: Vec<Vec<Value>>, telegram: &MockServer) -> Self {
        Self {
            batches: Mutex::new(VecDeque::from(batches)),
            outbound: TelegramBotClient::new(BOT_TOKEN, &telegram.base_url())
                .expect("telegram client"),
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedUpdates {
    async fn poll_updates(
        &self,
        _offset: Option<i64>,
        _timeout_secs: u64,
    ) -> Result<Vec<Value>, ChatTransportError> {
        let next = self.batches.lock().expect("batches lock").pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChatTransportError> {
        self.outbound.send_message(chat_id, text).await
    }
}

fn message_update(update_id: i64, sender_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 10,
            "chat": {"id": CHAT_ID},
            "from": {"id": sender_id},
            "text": text
        }
    })
}

fn agent_for(server: &MockServer) -> Arc<dyn TaskAgent> {
    let mut config = AgentConfig::new(server.base_url());
    config.allow_insecure = true;
    config.poll_interval = Duration::from_millis(100);
    config.poll_timeout = Duration::from_secs(2);
    config.retry_limit = 0;
    config.retry_backoff = Duration::from_millis(500);
    Arc::new(TaskIntegrationService::from_config(config).expect("agent service"))
}

async fn spawn_router(agent: Arc<dyn TaskAgent>, chat: ScriptedUpdates) -> RouterHandle {
    let mut config = RouterConfig::new(
        BOT_TOKEN,
        CHAT_ID,
        BTreeMap::from([
            (OPERATOR_ID, Persona::Operator),
            (ON_CALL_ID, Persona::OnCall),
        ]),
    );
    config.retry_unit = Duration::from_millis(10);
    config.drain_grace = Duration::from_secs(3);
    let router = RelayRouter::new(config, agent, Arc::new(chat)).expect("router");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    router.spawn(listener).expect("spawn router")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn integration_prompt_round_trips_through_http_agent_and_telegram_replies() {
    let agent_server = MockServer::start();
    let submit = agent_server.mock(|when, then| {
        when.method(POST)
            .path("/send_message")
            .body_includes("\"text\":\"ping world\"")
            .body_includes("\"persona_tag\":\"Operator\"");
        then.status(200).json_body(json!({"task_id": "task-77"}));
    });
    let poll = agent_server.mock(|when, then| {
        when.method(GET).path("/tasks/task-77");
        then.status(200)
            .json_body(json!({"state": "completed", "artifacts": ["pong"]}));
    });
    agent_server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let telegram = MockServer::start();
    let accepted = telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/sendMessage"))
            .body_includes("\"chat_id\":-100")
            .body_includes("\"parse_mode\":\"MarkdownV2\"")
            .body_includes("Accepted prompt for persona Operator");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });
    let finished = telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/sendMessage"))
            .body_includes("State: completed");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let chat = ScriptedUpdates::new(
        vec![vec![message_update(7, OPERATOR_ID, "  ping   world  ")]],
        &telegram,
    );
    let handle = spawn_router(agent_for(&agent_server), chat).await;

    wait_until(|| finished.calls() >= 1).await;
    accepted.assert_calls(1);
    finished.assert_calls(1);
    submit.assert_calls(1);
    assert!(poll.calls() >= 1);

    let shared = handle.shared();
    assert_eq!(shared.last_update_id(), Some(7));
    assert!(shared.retry_cache().get("task-77").is_some());

    let url = format!("http://{}/healthz", handle.local_addr());
    let mut payload = Value::Null;
    for _ in 0..200 {
        payload = reqwest::get(&url)
            .await
            .expect("health request")
            .json::<Value>()
            .await
            .expect("health json");
        if payload["status"] == "ready" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(payload["status"], "ready");
    assert_eq!(payload["router"]["last_update_id"], 7);
    assert_eq!(payload["retry_cache"]["usage"], 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn integration_transient_backend_failure_is_retried_once_by_dispatch() {
    let agent_server = MockServer::start();
    let submit = agent_server.mock(|when, then| {
        when.method(POST).path("/send_message");
        then.status(503).body("upstream busy");
    });

    let telegram = MockServer::start();
    let accepted = telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/sendMessage"))
            .body_includes("Accepted prompt for persona OnCall");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });
    let canceled = telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/sendMessage"))
            .body_includes("State: canceled");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let chat = ScriptedUpdates::new(
        vec![vec![message_update(3, ON_CALL_ID, "rotate certs")]],
        &telegram,
    );
    let handle = spawn_router(agent_for(&agent_server), chat).await;

    wait_until(|| canceled.calls() >= 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    accepted.assert_calls(1);
    canceled.assert_calls(2);
    submit.assert_calls(2);
    assert!(handle.shared().queue().is_empty());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn integration_unauthorized_sender_is_ignored_and_status_command_answers() {
    let agent_server = MockServer::start();
    let submit = agent_server.mock(|when, then| {
        when.method(POST).path("/send_message");
        then.status(200).json_body(json!({"task_id": "never"}));
    });

    let telegram = MockServer::start();
    let status = telegram.mock(|when, then| {
        when.method(POST)
            .path(format!("/bot{BOT_TOKEN}/sendMessage"))
            .body_includes(r#"queue\\_depth: 0"#)
            .body_includes(r#"last\\_update\\_id: 2"#);
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let chat = ScriptedUpdates::new(
        vec![vec![
            message_update(1, 999, "let me in"),
            message_update(2, OPERATOR_ID, "/STATUS"),
        ]],
        &telegram,
    );
    let handle = spawn_router(agent_for(&agent_server), chat).await;

    wait_until(|| status.calls() >= 1).await;
    status.assert_calls(1);
    submit.assert_calls(0);
    assert!(handle.shared().queue().is_empty());

    handle.shutdown().await.expect("shutdown");
}
