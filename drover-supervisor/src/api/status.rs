use super::{ApiError, AppState};
use crate::supervisor::StatusReport;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "drover",
        "version": drover_core::VERSION,
    }))
}

/// Fleet status; reconciles stale rows first
pub async fn worker_status(State(supervisor): State<AppState>) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(supervisor.status().await?))
}
