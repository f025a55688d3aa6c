//! Spawn, drain and abort handlers

use super::params::{form_count, form_flag, form_str, json_body, json_count, json_flag, json_str};
use super::{ApiError, AppState};
use crate::SupervisorError;
use crate::supervisor::SpawnReport;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;

type Params = HashMap<String, String>;

/// Query string merged with an urlencoded body; body values win
fn merge_params(
    query: Result<Query<Params>, QueryRejection>,
    form: Result<Form<Params>, FormRejection>,
) -> Params {
    let mut params = query.map(|Query(q)| q).unwrap_or_default();
    if let Ok(Form(form)) = form {
        params.extend(form);
    }
    params
}

fn spawn_response(report: SpawnReport) -> Response {
    let status = if report.spawned.is_empty() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

async fn spawn(state: AppState, count: usize, force: bool) -> Result<Response, ApiError> {
    let report = state.spawn_worker(count, force).await?;
    Ok(spawn_response(report))
}

async fn drain(state: AppState, worker_id: Option<&str>) -> Result<Response, ApiError> {
    let worker = state.drain_worker(worker_id).await?;
    Ok(Json(json!({
        "worker_id": worker.worker_id,
        "state": worker.state,
    }))
    .into_response())
}

async fn abort(state: AppState, worker_id: Option<&str>, confirm: bool) -> Result<Response, ApiError> {
    let worker_id = worker_id
        .ok_or_else(|| SupervisorError::InvalidRequest("worker_id is required".to_string()))?;
    let report = state.abort_worker(worker_id, confirm).await?;
    Ok(Json(report).into_response())
}

pub async fn spawn_json(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = json_body(&body);
    spawn(state, json_count(&body)?, json_flag(&body, "force")).await
}

pub async fn drain_json(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = json_body(&body);
    drain(state, json_str(&body, "worker_id")).await
}

pub async fn abort_json(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = json_body(&body);
    abort(state, json_str(&body, "worker_id"), json_flag(&body, "confirm")).await
}

pub async fn spawn_form(
    State(state): State<AppState>,
    query: Result<Query<Params>, QueryRejection>,
    form: Result<Form<Params>, FormRejection>,
) -> Result<Response, ApiError> {
    let params = merge_params(query, form);
    spawn(state, form_count(&params)?, form_flag(&params, "force")).await
}

pub async fn drain_form(
    State(state): State<AppState>,
    query: Result<Query<Params>, QueryRejection>,
    form: Result<Form<Params>, FormRejection>,
) -> Result<Response, ApiError> {
    let params = merge_params(query, form);
    drain(state, form_str(&params, "worker_id")).await
}

pub async fn abort_form(
    State(state): State<AppState>,
    query: Result<Query<Params>, QueryRejection>,
    form: Result<Form<Params>, FormRejection>,
) -> Result<Response, ApiError> {
    let params = merge_params(query, form);
    abort(state, form_str(&params, "worker_id"), form_flag(&params, "confirm")).await
}
