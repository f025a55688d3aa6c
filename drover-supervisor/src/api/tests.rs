//! Request-surface tests

use super::router;
use crate::supervisor::ABORTED_BY_USER;
use crate::testing::Harness;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use drover_core::process::ProcessIdentity;
use drover_core::store::WorkerStore;
use drover_core::worker::WorkerState;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(h.supervisor.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn query_post(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::with_admissible(0).await;
    let (status, body) = send(&h, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_query_force_literals() {
    for (literal, forced) in [("true", true), ("True", false), ("1", false)] {
        let h = Harness::with_admissible(0).await;
        let (status, body) = send(&h, query_post(&format!("/workers/spawn?count=1&force={}", literal))).await;

        if forced {
            assert_eq!(status, StatusCode::OK, "force={}", literal);
            assert_eq!(body["spawned"].as_array().unwrap().len(), 1);
            assert_eq!(body["forced"], true);
        } else {
            assert_eq!(status, StatusCode::CONFLICT, "force={}", literal);
            assert_eq!(body["rejected"], 1);
            assert_eq!(body["forced"], false);
        }
    }

    let h = Harness::with_admissible(0).await;
    let (status, _) = send(&h, query_post("/workers/spawn")).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_form_body_force() {
    let h = Harness::with_admissible(0).await;
    let (status, body) = send(&h, form_post("/workers/spawn", "count=2&force=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spawned"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_structured_force_literals() {
    for (payload, forced) in [
        (r#"{"force": true}"#, true),
        (r#"{"force": false}"#, false),
        (r#"{"force": "true"}"#, false),
        ("{}", false),
        ("{force: true", false),
    ] {
        let h = Harness::with_admissible(0).await;
        let (status, body) = send(&h, json_post("/api/workers/spawn", payload)).await;

        if forced {
            assert_eq!(status, StatusCode::OK, "{}", payload);
            assert_eq!(body["spawned"].as_array().unwrap().len(), 1);
        } else {
            assert_eq!(status, StatusCode::CONFLICT, "{}", payload);
            assert!(body["spawned"].as_array().unwrap().is_empty());
        }
    }
}

#[tokio::test]
async fn test_structured_spawn_respects_capacity() {
    let h = Harness::with_admissible(2).await;
    let (status, body) = send(&h, json_post("/api/workers/spawn", r#"{"count": 3}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spawned"].as_array().unwrap().len(), 2);
    assert_eq!(body["rejected"], 1);
    assert_eq!(body["admissible"], 2);

    let (status, _) = send(&h, json_post("/api/workers/spawn", r#"{"count": 0}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        send(&h, json_post("/api/workers/spawn", r#"{"count": 50000000}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("per-request limit"));
    assert_eq!(h.store.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_abort_requires_confirmation() {
    let h = Harness::with_admissible(2).await;
    let worker = h.running_worker(ProcessIdentity::new(9001, 1_700_000_000)).await;

    let (status, body) = send(
        &h,
        json_post("/api/workers/abort", &json!({"worker_id": worker.worker_id}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("confirmation"));

    let (status, _) = send(
        &h,
        query_post(&format!("/workers/abort?worker_id={}&confirm=True", worker.worker_id)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let row = h.store.get(&worker.worker_id).await.unwrap().unwrap();
    assert_eq!(row.state, WorkerState::Running);

    let (status, body) = send(
        &h,
        json_post(
            "/api/workers/abort",
            &json!({"worker_id": worker.worker_id, "confirm": true}).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous_state"], "RUNNING");

    let row = h.store.get(&worker.worker_id).await.unwrap().unwrap();
    assert_eq!(row.state, WorkerState::Failed);
    assert_eq!(row.last_error_tail.as_deref(), Some(ABORTED_BY_USER));
}

#[tokio::test]
async fn test_drain_surfaces() {
    let h = Harness::with_admissible(2).await;

    let (status, _) = send(&h, json_post("/api/workers/drain", "{}")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let worker = h.running_worker(ProcessIdentity::new(9002, 1_700_000_000)).await;
    let (status, body) = send(&h, query_post(&format!("/workers/drain?worker_id={}", worker.worker_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "DRAINING");

    let (status, _) = send(&h, json_post("/api/workers/drain", r#"{"worker_id": "worker-nope"}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_never_exposes_launch_token() {
    let h = Harness::with_admissible(2).await;
    let worker = h.running_worker(ProcessIdentity::new(9003, 1_700_000_000)).await;

    let (status, body) = send(&h, Request::get("/api/workers/status").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let workers = body["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["worker_id"], worker.worker_id.as_str());
    assert_eq!(workers[0]["state"], "RUNNING");
    assert_eq!(workers[0]["stats"]["pid"], 9003);
    assert!(!body.to_string().contains(&worker.launch_token));

    assert_eq!(body["capacity"]["in_flight"], 1);
    assert_eq!(body["queue_depth"], 0);
}
