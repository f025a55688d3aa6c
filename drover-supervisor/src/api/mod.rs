//! HTTP request surfaces for an operator dashboard
//!
//! - `GET /api/workers/status`: read-only fleet status
//! - `POST /api/workers/{spawn,drain,abort}`: structured commands (JSON body)
//! - `POST /workers/{spawn,drain,abort}`: the same commands from a query
//!   string or urlencoded form
//! - `GET /health`: liveness
//!
//! The two command surfaces read flags differently: JSON requires a boolean
//! `true`, query/form requires the exact string `"true"`. Anything else is
//! `false`, never an error.

mod commands;
mod error;
mod params;
mod status;

#[cfg(test)]
mod tests;

pub use error::ApiError;

use crate::supervisor::WorkerSupervisor;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Shared handler state
pub type AppState = Arc<WorkerSupervisor>;

/// Build the dashboard router
pub fn router(supervisor: Arc<WorkerSupervisor>) -> Router {
    Router::new()
        // Read-only
        .route("/health", get(status::health))
        .route("/api/workers/status", get(status::worker_status))
        // Structured commands
        .route("/api/workers/spawn", post(commands::spawn_json))
        .route("/api/workers/drain", post(commands::drain_json))
        .route("/api/workers/abort", post(commands::abort_json))
        // Query/form commands
        .route("/workers/spawn", post(commands::spawn_form))
        .route("/workers/drain", post(commands::drain_form))
        .route("/workers/abort", post(commands::abort_form))
        .with_state(supervisor)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
