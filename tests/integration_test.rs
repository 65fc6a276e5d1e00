mod common;

use axum::http::StatusCode;
use common::{inst, mock_at};
use gvwap::api::{self, AppState};
use gvwap::domain::TimeMs;
use gvwap::engine::EventLog;
use gvwap::gateway::ClientIdGenerator;
use gvwap::orchestration::{ControlLoop, StatusHandle};
use gvwap::signals::ScriptedSignals;
use gvwap::tuning::Tuning;
use std::sync::Arc;
use tower::util::ServiceExt;

fn setup_test_app() -> (axum::Router, StatusHandle, EventLog) {
    let status = StatusHandle::new();
    let events = EventLog::default();
    let state = AppState::new(status.clone(), events.clone());
    (api::create_router(state), status, events)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _status, _events) = setup_test_app();

    let (code, body) = get(app, "/health").await;

    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ready_endpoint_waits_for_first_tick() {
    let (app, status, _events) = setup_test_app();

    let (code, body) = get(app.clone(), "/ready").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not ticked"));

    status.update(|s| s.ready = true);
    let (code, _) = get(app, "/ready").await;
    assert_eq!(code, StatusCode::OK);
}

#[tokio::test]
async fn test_status_reflects_control_loop() {
    let (app, status, events) = setup_test_app();
    let mut cl = ControlLoop::connect(
        mock_at("2000"),
        Arc::new(ScriptedSignals::new()),
        inst(),
        "cross",
        ClientIdGenerator::new("api"),
        Tuning::default(),
        events,
        status,
    )
    .await
    .unwrap();
    cl.startup(TimeMs::new(1_700_000_000_000)).await.unwrap();
    cl.tick(TimeMs::new(1_700_000_003_000)).await.unwrap();

    let (code, body) = get(app.clone(), "/v1/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["inst_id"], "ETH-USDT-SWAP");
    assert_eq!(body["ready"], true);
    assert_eq!(body["ticks"], 1);
    assert_eq!(body["ladder"]["buy_prices"].as_array().unwrap().len(), 10);
    assert_eq!(body["risk"]["paused"], false);

    let (code, body) = get(app, "/v1/events?event=cancel.all.startup").await;
    assert_eq!(code, StatusCode::OK);
    let listed = body["events"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["event"], "cancel.all.startup");
}

#[tokio::test]
async fn test_events_limit_and_validation() {
    let (app, _status, events) = setup_test_app();
    for i in 0..5 {
        events.emit("grid.rebuild", serde_json::json!({ "n": i }));
    }

    let (code, body) = get(app.clone(), "/v1/events?limit=2").await;
    assert_eq!(code, StatusCode::OK);
    let listed = body["events"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1]["payload"]["n"], 4);

    let (code, _) = get(app.clone(), "/v1/events?limit=0").await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = get(app, "/v1/events?limit=9999").await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}
