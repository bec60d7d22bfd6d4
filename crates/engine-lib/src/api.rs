//! HTTP API for health checks, Prometheus metrics and engine control

use crate::engine::Engine;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::policy::Policy;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Actions returned by `/actions/recent` when no limit is given
const DEFAULT_RECENT_ACTIONS: usize = 10;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let health_registry = engine.health().clone();
        Self {
            engine,
            health_registry,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionsQuery {
    pub service: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    pub service: Option<String>,
    pub metric: Option<String>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status().await)
}

/// Anomalous records of the latest detection pass
async fn anomalies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let anomalies = state.engine.board().current_anomalies().await;
    Json(json!({
        "count": anomalies.len(),
        "anomalies": anomalies,
    }))
}

async fn predictions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let predictions = state.engine.board().predictions().await;
    Json(json!({
        "count": predictions.len(),
        "predictions": predictions,
    }))
}

async fn prediction_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let history = state.engine.board().history(query.limit).await;
    Json(json!({
        "count": history.len(),
        "history": history,
    }))
}

async fn service_predictions(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    let predictions = state.engine.board().predictions_for(&service).await;
    if predictions.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No predictions for service {}", service) })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "service": service,
            "predictions": predictions,
        })),
    )
}

async fn services_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = state.engine.board().service_health().await;
    Json(json!({ "services": services }))
}

async fn manual_detection(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DetectQuery>,
) -> impl IntoResponse {
    let report = state
        .engine
        .trigger_detection(query.service.as_deref(), query.metric.as_deref(), Utc::now())
        .await;
    Json(report)
}

async fn policies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.engine.policies();
    let report = state.engine.policy_report();
    let listed: Vec<&Policy> = store.list().iter().map(|p| p.as_ref()).collect();
    let rejected: Vec<String> = report.rejected.iter().map(|e| e.to_string()).collect();

    Json(json!({
        "source": report.source,
        "count": store.len(),
        "enabled": store.enabled_count(),
        "policies": listed,
        "rejected": rejected,
    }))
}

async fn actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActionsQuery>,
) -> impl IntoResponse {
    let actions = state
        .engine
        .history()
        .list(query.service.as_deref(), query.limit)
        .await;
    Json(json!({
        "count": actions.len(),
        "actions": actions,
    }))
}

async fn recent_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_ACTIONS);
    let actions = state.engine.history().list(None, Some(limit)).await;
    Json(json!({
        "count": actions.len(),
        "actions": actions,
    }))
}

async fn evaluate(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.trigger_evaluation(Utc::now()).await)
}

async fn toggle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let enabled = state.engine.toggle_remediation();
    Json(json!({ "auto_remediation_enabled": enabled }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/anomalies", get(anomalies))
        .route("/predictions", get(predictions))
        .route("/predictions/history", get(prediction_history))
        .route("/predictions/:service", get(service_predictions))
        .route("/services/health", get(services_health))
        .route("/detect/manual", post(manual_detection))
        .route("/policies", get(policies))
        .route("/actions", get(actions))
        .route("/actions/recent", get(recent_actions))
        .route("/evaluate", post(evaluate))
        .route("/toggle", post(toggle))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
