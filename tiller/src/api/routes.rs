use crate::api::{ApiError, AppState};
use crate::coordinator::{Consistency, LevelSummary, QueryOutcome};
use crate::elect::{elect_leader, ElectedLeader};
use crate::quorum::{select_quorum, QuorumSelection};
use crate::sampler::{InstanceMetrics, MetricsSnapshot};
use crate::topology::InstanceDescriptor;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::HashMap;

// ============================================================================
// Query
// ============================================================================

#[derive(Deserialize)]
pub struct QueryRequest {
    pub statement: String,
    #[serde(default)]
    pub consistency: Consistency,
}

#[tracing::instrument(name = "query", skip(state, request), fields(level = %request.consistency.as_str()))]
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, ApiError> {
    let start = std::time::Instant::now();
    let level = request.consistency;

    let result = state.coordinator.execute(&request.statement, level).await;
    let duration = start.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            metrics::histogram!("tiller_query_duration_seconds",
                "level" => level.as_str(),
                "status" => "ok",
            )
            .record(duration);
            metrics::counter!("tiller_query_total",
                "level" => level.as_str(),
                "status" => "ok",
            )
            .increment(1);
            Ok(Json(outcome))
        }
        Err(e) => {
            metrics::counter!("tiller_query_total",
                "level" => level.as_str(),
                "status" => "error",
            )
            .increment(1);
            Err(ApiError(e))
        }
    }
}

// ============================================================================
// Status and topology
// ============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    pub current_master: InstanceDescriptor,
    pub current_replicas: Vec<InstanceDescriptor>,
    pub total_replicas: usize,
    pub replication_mode: &'static str,
    pub failover_state: crate::failover::FailoverState,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.coordinator.topology().snapshot();
    Json(StatusResponse {
        current_master: snapshot.primary,
        total_replicas: snapshot.followers.len(),
        current_replicas: snapshot.followers,
        replication_mode: "binlog",
        failover_state: state.coordinator.failover().state(),
    })
}

#[derive(Serialize)]
pub struct TopologyResponse {
    pub current_master: InstanceDescriptor,
    pub current_replicas: Vec<InstanceDescriptor>,
    pub total_replicas: usize,
    pub needs_reconfigure: Vec<String>,
}

pub async fn topology(State(state): State<AppState>) -> Json<TopologyResponse> {
    let snapshot = state.coordinator.topology().snapshot();
    Json(TopologyResponse {
        current_master: snapshot.primary,
        total_replicas: snapshot.followers.len(),
        current_replicas: snapshot.followers,
        needs_reconfigure: snapshot.needs_reconfigure,
    })
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "coordinator"}))
}

// ============================================================================
// Sampler views
// ============================================================================

#[derive(Serialize)]
pub struct MetricsResponse {
    pub replicas: Vec<InstanceMetrics>,
    pub master_timestamp: u64,
}

pub async fn all_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let snapshot = state.coordinator.sampler().snapshot();
    Json(MetricsResponse {
        replicas: snapshot.replicas.clone(),
        master_timestamp: snapshot.master_timestamp,
    })
}

pub async fn instance_metrics(
    Path(instance_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<InstanceMetrics>, StatusCode> {
    let snapshot = state.coordinator.sampler().snapshot();
    snapshot
        .get(&instance_id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
pub struct PrimaryTableView {
    pub id: String,
    pub global_timestamp: u64,
    pub table_timestamps: HashMap<String, u64>,
}

#[derive(Serialize)]
pub struct InstanceTableView {
    pub id: String,
    pub global_timestamp: u64,
    pub global_lag: u64,
    pub table_timestamps: HashMap<String, u64>,
    pub table_lag: BTreeMap<String, u64>,
}

#[derive(Serialize)]
pub struct TableTimestampsResponse {
    pub master: PrimaryTableView,
    pub instances: Vec<InstanceTableView>,
}

/// Per-table logical watermarks and lag, derived from the latest snapshot.
/// Lag is in units of applied writes, not wall-clock seconds.
pub fn table_lag_view(snapshot: &MetricsSnapshot) -> TableTimestampsResponse {
    let primary_metrics = snapshot.get(&snapshot.primary_id);
    let master_tables: HashMap<String, u64> = primary_metrics
        .map(|m| m.table_timestamps.clone())
        .unwrap_or_default();

    let instances = snapshot
        .replicas
        .iter()
        .map(|m| {
            let table_lag = master_tables
                .iter()
                .map(|(table, master_ts)| {
                    let instance_ts = m.table_timestamps.get(table).copied().unwrap_or(0);
                    (table.clone(), master_ts.saturating_sub(instance_ts))
                })
                .collect();
            InstanceTableView {
                id: m.instance_id.clone(),
                global_timestamp: m.last_applied_timestamp,
                global_lag: snapshot
                    .master_timestamp
                    .saturating_sub(m.last_applied_timestamp),
                table_timestamps: m.table_timestamps.clone(),
                table_lag,
            }
        })
        .collect();

    TableTimestampsResponse {
        master: PrimaryTableView {
            id: snapshot.primary_id.clone(),
            global_timestamp: snapshot.master_timestamp,
            table_timestamps: master_tables,
        },
        instances,
    }
}

pub async fn table_timestamps(State(state): State<AppState>) -> Json<TableTimestampsResponse> {
    let snapshot = state.coordinator.sampler().snapshot();
    Json(table_lag_view(&snapshot))
}

pub async fn consistency_metrics(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, LevelSummary>> {
    Json(state.coordinator.counters().summary())
}

// ============================================================================
// Cabinet and SEER
// ============================================================================

#[derive(Deserialize)]
pub struct QuorumRequest {
    #[serde(default = "default_operation")]
    pub operation: String,
}

fn default_operation() -> String {
    "write".to_string()
}

pub async fn select_quorum_handler(
    State(state): State<AppState>,
    Json(request): Json<QuorumRequest>,
) -> Result<Json<QuorumSelection>, ApiError> {
    let snapshot = state.coordinator.sampler().snapshot();
    let topology = state.coordinator.topology().snapshot();
    let selection = select_quorum(&snapshot, &topology)?;
    tracing::debug!(operation = %request.operation, quorum = ?selection.quorum, "quorum selected");
    Ok(Json(selection))
}

#[derive(Deserialize, Default)]
pub struct ElectRequest {
    #[serde(default)]
    pub exclude_replicas: Vec<String>,
}

pub async fn elect_leader_handler(
    State(state): State<AppState>,
    Json(request): Json<ElectRequest>,
) -> Result<Json<ElectedLeader>, ApiError> {
    let snapshot = state.coordinator.sampler().snapshot();
    let topology = state.coordinator.topology().snapshot();
    let leader = elect_leader(
        &snapshot,
        &topology,
        &request.exclude_replicas,
        &state.coordinator.config().seer,
    )?;
    Ok(Json(leader))
}

// ============================================================================
// Admin
// ============================================================================

pub async fn stop_master(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let failover = state.coordinator.failover();
    let stopped = failover.stop_primary().await?;
    let report = failover.run(&[]).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Failover complete; new master is {}", report.new_primary),
        "stopped_master": stopped,
        "old_master": report.old_primary,
        "new_master": report.new_primary,
        "new_leader_id": report.new_primary,
        "failed_rewires": report.failed_rewires,
    })))
}

pub async fn stop_master_only(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stopped = state.coordinator.failover().stop_primary().await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Master {} stopped", stopped),
        "stopped_master": stopped,
    })))
}

#[derive(Deserialize, Default)]
pub struct PromoteRequest {
    #[serde(default)]
    pub new_leader: Option<String>,
}

pub async fn promote_leader(
    State(state): State<AppState>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .coordinator
        .failover()
        .promote_target(request.new_leader)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Promotion complete; new master is {}", report.new_primary),
        "old_master": report.old_primary,
        "new_master": report.new_primary,
        "new_leader_id": report.new_primary,
        "rewired": report.rewired,
        "failed_rewires": report.failed_rewires,
    })))
}

#[derive(Deserialize)]
pub struct StartInstanceRequest {
    pub instance_id: String,
}

pub async fn start_instance(
    State(state): State<AppState>,
    Json(request): Json<StartInstanceRequest>,
) -> Result<Json<TopologyResponse>, ApiError> {
    let snapshot = state
        .coordinator
        .failover()
        .rejoin(&request.instance_id)
        .await?;
    Ok(Json(TopologyResponse {
        current_master: snapshot.primary,
        total_replicas: snapshot.followers.len(),
        current_replicas: snapshot.followers,
        needs_reconfigure: snapshot.needs_reconfigure,
    }))
}

pub async fn restart_old_master(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let former = state
        .coordinator
        .topology()
        .former_primary()
        .ok_or_else(|| {
            crate::error::Error::InstanceNotFound(
                "no former primary awaiting rejoin".to_string(),
            )
        })?;

    let snapshot = state.coordinator.failover().rejoin(&former.id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Former primary {} restarted and rejoined as follower of {}",
            former.id, snapshot.primary.id
        ),
        "master": snapshot.primary.id,
        "total_replicas": snapshot.followers.len(),
    })))
}

pub async fn clear_data(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let cleared = state.coordinator.clear_data().await?;
    Ok(Json(json!({
        "success": true,
        "message": "All data cleared; counters and timestamps reset",
        "cleared_tables": cleared,
    })))
}

// ============================================================================
// Prometheus render
// ============================================================================

pub async fn prometheus(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}
