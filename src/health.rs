use crate::metrics::ModelMetrics;
use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub upstream: String,
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut db_ok = true;

    if let Err(e) = state.store.ping().await {
        tracing::error!("Readiness check: store error: {}", e.inner);
        db_ok = false;
    }

    let upstream_ok = state.upstream.is_some();
    if !upstream_ok {
        tracing::error!("Readiness check: upstream API key not configured");
    }

    let ready = db_ok && upstream_ok;
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unready" }.to_string(),
            database: if db_ok { "ok" } else { "error" }.to_string(),
            upstream: if upstream_ok { "ok" } else { "unconfigured" }.to_string(),
        }),
    )
}

/// Per-model relay counters.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<HashMap<String, ModelMetrics>> {
    Json(state.metrics.get_all_metrics().await)
}
