use crate::api::routes;
use crate::coordinator::Coordinator;
use crate::error::Result;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub metrics_handle: Option<PrometheusHandle>,
}

pub struct ApiServer {
    coordinator: Arc<Coordinator>,
    metrics_handle: Option<PrometheusHandle>,
}

impl ApiServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics_handle = handle;
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/query", post(routes::query))
            .route("/status", get(routes::status))
            .route("/health", get(routes::health))
            .route("/table-timestamps", get(routes::table_timestamps))
            .route("/consistency-metrics", get(routes::consistency_metrics))
            // Sampler views
            .route("/metrics", get(routes::all_metrics))
            .route("/metrics/:instance_id", get(routes::instance_metrics))
            .route("/prometheus", get(routes::prometheus))
            // Cabinet and SEER
            .route("/select-quorum", post(routes::select_quorum_handler))
            .route("/elect-leader", post(routes::elect_leader_handler))
            // Admin
            .route("/admin/topology", get(routes::topology))
            .route("/admin/stop-master", post(routes::stop_master))
            .route("/admin/stop-master-only", post(routes::stop_master_only))
            .route("/admin/promote-leader", post(routes::promote_leader))
            .route("/admin/start-instance", post(routes::start_instance))
            .route("/admin/restart-old-master", post(routes::restart_old_master))
            .route("/admin/clear-data", post(routes::clear_data))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Coordinator listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
