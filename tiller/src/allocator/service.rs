//! HTTP surface of a timestamp shard
//!
//! Three endpoints: grant a timestamp, reset the counter, health. Served by
//! the `tiller-timestamp` binary, one process per shard.

use super::{ShardCounter, TimestampGrant};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ShardService {
    pub counter: Arc<ShardCounter>,
    pub server_id: u32,
}

impl ShardService {
    pub fn new(counter: Arc<ShardCounter>, server_id: u32) -> Self {
        Self { counter, server_id }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/timestamp", get(grant_timestamp))
            .route("/reset", post(reset_counter))
            .route("/health", get(health))
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }
}

async fn grant_timestamp(State(service): State<ShardService>) -> Json<TimestampGrant> {
    let timestamp = service.counter.next();
    metrics::counter!("tiller_timestamps_granted_total").increment(1);
    Json(TimestampGrant {
        timestamp,
        server_id: service.server_id,
    })
}

async fn reset_counter(State(service): State<ShardService>) -> Json<serde_json::Value> {
    service.counter.reset();
    tracing::info!(server_id = service.server_id, "shard counter reset to seed");
    Json(json!({
        "status": "reset",
        "server_id": service.server_id,
        "current_counter": service.counter.current(),
    }))
}

async fn health(State(service): State<ShardService>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "server_id": service.server_id,
        "current_counter": service.counter.current(),
    }))
}
