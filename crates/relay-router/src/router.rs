//! Router wiring: ingestion, admission, dispatch, health probe, and shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use relay_agent::{AgentHealthProbe, TaskAgent};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::chat_transport::{ChatReplier, ChatTransport, ChatTransportError};
use crate::commands::CommandHandler;
use crate::dispatch::{shutdown_signaled, DispatchContext, DispatchLoop};
use crate::health::{ComponentHealth, RouterState};
use crate::health_server::{bind_health_listener, build_health_router};
use crate::inbound::{InboundEvent, UpdateCursor, WorkItem};
use crate::rate_limiter::RateLimiter;
use crate::retry_cache::RetryCache;
use crate::router_config::{RouterConfig, RouterConfigError};
use crate::update_processor::{Admission, UpdateProcessor};
use crate::work_queue::WorkQueue;

pub const RAW_UPDATE_CHANNEL_CAPACITY: usize = 128;
const INGEST_BACKOFF_LADDER_SECS: [u64; 6] = [1, 3, 7, 15, 30, 60];
const REJECTED_POLL_PAUSE: Duration = Duration::from_secs(5);

/// Chat ingestion backoff for the `failures`-th consecutive failure (0-based).
pub fn ingest_backoff(failures: usize) -> Duration {
    let index = failures.min(INGEST_BACKOFF_LADDER_SECS.len() - 1);
    Duration::from_secs(INGEST_BACKOFF_LADDER_SECS[index])
}

/// State shared between the router loops and the health endpoint.
pub struct RouterShared {
    config: RouterConfig,
    queue: Arc<WorkQueue<WorkItem>>,
    retry_cache: Arc<RetryCache>,
    rate_limiter: Arc<RateLimiter>,
    chat_health: Arc<ComponentHealth>,
    agent_health: Arc<ComponentHealth>,
    cursor: Arc<UpdateCursor>,
    started_at: Instant,
    draining: AtomicBool,
}

impl RouterShared {
    fn new(config: RouterConfig) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(config.queue_size)),
            retry_cache: Arc::new(RetryCache::new(config.retry_cache_size)),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_capacity,
                config.rate_refill_per_min,
                config.commander_capacity,
                config.commander_refill_per_min,
            )),
            chat_health: Arc::new(ComponentHealth::default()),
            agent_health: Arc::new(ComponentHealth::default()),
            cursor: Arc::new(UpdateCursor::default()),
            started_at: Instant::now(),
            draining: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue<WorkItem>> {
        &self.queue
    }

    pub fn retry_cache(&self) -> &Arc<RetryCache> {
        &self.retry_cache
    }

    pub fn chat_health(&self) -> &Arc<ComponentHealth> {
        &self.chat_health
    }

    pub fn agent_health(&self) -> &Arc<ComponentHealth> {
        &self.agent_health
    }

    pub fn last_update_id(&self) -> Option<i64> {
        self.cursor.last()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Marks the router as draining; the health endpoint reports it immediately.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn router_state(&self, now: DateTime<Utc>) -> RouterState {
        let stale_after = self.config.health_stale_after();
        RouterState::derive(
            self.is_draining(),
            self.chat_health.resolved_status(now, stale_after),
            self.agent_health.resolved_status(now, stale_after),
        )
    }

    pub fn health_payload(&self, now: DateTime<Utc>) -> Value {
        let stale_after = self.config.health_stale_after();
        let chat = self.chat_health.payload(now, stale_after);
        let agent = self.agent_health.payload(now, stale_after);
        let state = RouterState::derive(self.is_draining(), chat.status, agent.status);
        json!({
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "status": state.probe_status(),
            "router": {
                "state": state,
                "uptime_seconds": self.started_at.elapsed().as_secs(),
                "env": self.config.env,
                "last_update_id": self.cursor.last(),
            },
            "chat": chat,
            "agent": agent,
            "queue": {
                "depth": self.queue.len(),
                "capacity": self.queue.capacity(),
            },
            "retry_cache": {
                "usage": self.retry_cache.len(),
                "capacity": self.retry_cache.capacity(),
            },
            "rate_limiter": self.rate_limiter.snapshot(),
        })
    }
}

/// Chat-to-agent relay: owns the shared state until [`RelayRouter::spawn`].
pub struct RelayRouter {
    shared: Arc<RouterShared>,
    agent: Arc<dyn TaskAgent>,
    chat: Arc<dyn ChatTransport>,
}

impl RelayRouter {
    pub fn new(
        config: RouterConfig,
        agent: Arc<dyn TaskAgent>,
        chat: Arc<dyn ChatTransport>,
    ) -> Result<Self, RouterConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(RouterShared::new(config)),
            agent,
            chat,
        })
    }

    pub fn shared(&self) -> Arc<RouterShared> {
        Arc::clone(&self.shared)
    }

    pub async fn bind_health_listener(&self) -> Result<TcpListener> {
        bind_health_listener(&self.shared.config.health_bind_addr()).await
    }

    /// Starts every loop and the health endpoint on `listener`.
    pub fn spawn(self, listener: TcpListener) -> Result<RouterHandle> {
        let local_addr = listener
            .local_addr()
            .context("failed to resolve health endpoint address")?;
        let shared = self.shared;
        let config = &shared.config;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (raw_tx, raw_rx) = mpsc::channel(RAW_UPDATE_CHANNEL_CAPACITY);
        let replier = ChatReplier::new(
            Arc::clone(&self.chat),
            config.telegram_chat_id,
            Arc::clone(&shared.chat_health),
        );

        let processor = UpdateProcessor::new(
            config.telegram_chat_id,
            config.persona_map.clone(),
            Arc::clone(&shared.rate_limiter),
            Arc::clone(&shared.queue),
        );
        let commands = CommandHandler::new(
            Arc::clone(&shared.queue),
            Arc::clone(&shared.retry_cache),
            Arc::clone(&shared.cursor),
        );
        let dispatch = DispatchLoop::new(
            DispatchContext {
                agent: Arc::clone(&self.agent),
                queue: Arc::clone(&shared.queue),
                retry_cache: Arc::clone(&shared.retry_cache),
                agent_health: Arc::clone(&shared.agent_health),
                replier: replier.clone(),
                retry_attempts: config.retry_attempts,
                retry_unit: config.retry_unit,
                router_version: config.router_version.clone(),
            },
            config.dispatch_concurrency,
        );

        let loops = vec![
            (
                "ingest",
                tokio::spawn(run_ingest_loop(
                    Arc::clone(&self.chat),
                    Arc::clone(&shared),
                    raw_tx,
                    shutdown_rx.clone(),
                )),
            ),
            (
                "process",
                tokio::spawn(run_process_loop(
                    raw_rx,
                    processor,
                    commands,
                    replier,
                    shutdown_rx.clone(),
                )),
            ),
            ("dispatch", tokio::spawn(dispatch.run(shutdown_rx.clone()))),
            (
                "health_probe",
                tokio::spawn(run_health_probe_loop(
                    Arc::clone(&self.agent),
                    Arc::clone(&shared),
                    shutdown_rx,
                )),
            ),
        ];

        let app = build_health_router(&config.health_path, Arc::clone(&shared));
        let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = server_shutdown_rx.await;
                })
                .await
                .context("health endpoint exited unexpectedly")
        });

        tracing::info!(
            addr = %local_addr,
            path = %config.health_path,
            transport_mode = config.transport_mode.as_str(),
            env = %config.env,
            version = %config.router_version,
            "relay router started"
        );

        Ok(RouterHandle {
            shared,
            local_addr,
            shutdown_tx,
            loops,
            server_shutdown: Some(server_shutdown_tx),
            server,
        })
    }

    /// Runs until `signal` resolves, then drains and stops.
    pub async fn run_until<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handle = self.spawn(listener)?;
        signal.await;
        handle.shutdown().await
    }
}

/// Handle for a spawned relay router.
pub struct RouterHandle {
    shared: Arc<RouterShared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
    server_shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<()>>,
}

impl RouterHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shared(&self) -> Arc<RouterShared> {
        Arc::clone(&self.shared)
    }

    /// Drains the loops within the grace period, then stops the health endpoint.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shared.begin_draining();
        tracing::info!(
            queue_depth = self.shared.queue.len(),
            "relay router draining"
        );
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.shared.config.drain_grace;
        for (name, mut handle) in self.loops.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(task = name, error = %error, "router loop ended abnormally")
                }
                Err(_) => {
                    tracing::warn!(task = name, "router loop exceeded drain grace; aborting");
                    handle.abort();
                }
            }
        }

        if let Some(server_shutdown) = self.server_shutdown.take() {
            let _ = server_shutdown.send(());
        }
        self.server
            .await
            .context("health endpoint task panicked")??;
        tracing::info!("relay router stopped");
        Ok(())
    }
}

async fn run_ingest_loop(
    chat: Arc<dyn ChatTransport>,
    shared: Arc<RouterShared>,
    raw_tx: mpsc::Sender<Value>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_timeout_secs = shared.config.poll_timeout_secs;
    let mut consecutive_failures = 0_usize;
    loop {
        let offset = shared.cursor.next_offset();
        let polled = tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => break,
            polled = chat.poll_updates(offset, poll_timeout_secs) => polled,
        };
        let pause = match polled {
            Ok(updates) => {
                shared.chat_health.mark_success();
                consecutive_failures = 0;
                for update in updates {
                    if let Some(sequence) = update.get("update_id").and_then(Value::as_i64) {
                        shared.cursor.record(sequence);
                    }
                    tokio::select! {
                        _ = shutdown_signaled(&mut shutdown) => return,
                        sent = raw_tx.send(update) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                continue;
            }
            Err(ChatTransportError::Rejected(reason)) => {
                shared.chat_health.mark_failure(&reason);
                tracing::warn!(reason = %reason, "chat poll rejected");
                REJECTED_POLL_PAUSE
            }
            Err(error) => {
                shared.chat_health.mark_failure(&error.to_string());
                let delay = ingest_backoff(consecutive_failures);
                consecutive_failures = consecutive_failures.saturating_add(1);
                tracing::warn!(
                    error = %error,
                    failures = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "chat poll failed; backing off"
                );
                delay
            }
        };
        tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

async fn run_process_loop(
    mut raw_rx: mpsc::Receiver<Value>,
    processor: UpdateProcessor,
    commands: CommandHandler,
    replier: ChatReplier,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let update = tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => break,
            update = raw_rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };
        let Some(event) = InboundEvent::from_update(&update) else {
            tracing::debug!("ignoring update without a message");
            continue;
        };
        match processor.handle(event) {
            Ok(Admission::Command(command)) => {
                let reply = commands.handle(&command);
                replier.reply(&reply.text).await;
                if let Some(pending) = reply.pending {
                    pending.publish();
                }
            }
            Ok(Admission::Enqueued { reply, pending, .. }) => {
                // Publish only after the acknowledgement so it precedes the final reply.
                replier.reply(&reply).await;
                pending.publish();
            }
            Ok(admission) => {
                if let Some(reply) = admission.reply() {
                    replier.reply(reply).await;
                }
            }
            Err(error) => tracing::warn!(error = %error, "inbound event dropped"),
        }
    }
}

async fn run_health_probe_loop(
    agent: Arc<dyn TaskAgent>,
    shared: Arc<RouterShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(shared.config.health_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
        let probe = tokio::select! {
            _ = shutdown_signaled(&mut shutdown) => break,
            probe = agent.health_check() => probe,
        };
        match probe {
            AgentHealthProbe::Healthy => shared.agent_health.mark_success(),
            AgentHealthProbe::Unhealthy(reason) => shared.agent_health.mark_failure(&reason),
            AgentHealthProbe::Unsupported => {
                if !shared.agent_health.is_failed() {
                    shared.agent_health.mark_success();
                }
            }
        }
        let state = shared.router_state(Utc::now());
        tracing::info!(
            state = ?state,
            queue_depth = shared.queue.len(),
            retry_cache = shared.retry_cache.len(),
            last_update_id = ?shared.cursor.last(),
            "router health tick"
        );
    }
}
