//! Health probe HTTP endpoint.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;

use crate::router::RouterShared;

/// Binds the probe listener on `host:port`.
pub async fn bind_health_listener(bind_addr: &str) -> Result<TcpListener> {
    TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind health endpoint on {bind_addr}"))
}

/// GET/HEAD on `path` returns the health document; everything else is a JSON error.
pub fn build_health_router(path: &str, shared: Arc<RouterShared>) -> Router {
    Router::new()
        .route(path, get(handle_health).fallback(handle_method_not_allowed))
        .fallback(handle_not_found)
        .with_state(shared)
}

async fn handle_health(State(shared): State<Arc<RouterShared>>) -> impl IntoResponse {
    Json(shared.health_payload(Utc::now()))
}

async fn handle_method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "method not allowed"})),
    )
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}
