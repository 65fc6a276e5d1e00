mod common;

use common::{d, inst, mock_at};
use gvwap::domain::{OrderTag, TimeMs};
use gvwap::engine::events;
use gvwap::engine::EventLog;
use gvwap::gateway::{ClientIdGenerator, MockGateway};
use gvwap::orchestration::{ControlLoop, StatusHandle};
use gvwap::signals::ScriptedSignals;
use gvwap::tuning::{Tuning, TuningFile};
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000_000;

async fn control_loop(mock: Arc<MockGateway>, tuning: Tuning) -> (ControlLoop, StatusHandle) {
    let status = StatusHandle::new();
    let cl = ControlLoop::connect(
        mock,
        Arc::new(ScriptedSignals::new()),
        inst(),
        "cross",
        ClientIdGenerator::new("loop"),
        tuning,
        EventLog::default(),
        status.clone(),
    )
    .await
    .unwrap()
    .with_sweep_interval(Duration::from_millis(1));
    (cl, status)
}

fn grid_count(mock: &MockGateway) -> usize {
    mock.open_order_snapshot()
        .iter()
        .filter(|o| o.has_tag(OrderTag::Grid))
        .count()
}

#[tokio::test]
async fn test_startup_places_full_ladder() {
    let mock = mock_at("2000");
    let (mut cl, status) = control_loop(mock.clone(), Tuning::default()).await;

    cl.startup(TimeMs::new(T0)).await.unwrap();

    assert_eq!(grid_count(&mock), 20);
    assert_eq!(cl.events().count(events::CANCEL_ALL_STARTUP), 1);
    assert_eq!(cl.ladder().center(), d("2000"));
    assert!(cl.sizes().grid.long.is_positive());
    assert!(!status.is_ready());
}

#[tokio::test]
async fn test_tick_is_idempotent_and_marks_ready() {
    let mock = mock_at("2000");
    let (mut cl, status) = control_loop(mock.clone(), Tuning::default()).await;
    cl.startup(TimeMs::new(T0)).await.unwrap();
    let placed = mock.submissions().len();

    let report = cl.tick(TimeMs::new(T0 + 3_000)).await.unwrap();
    assert_eq!(report.live, 20);
    assert_eq!(report.reposted, 0);
    let report = cl.tick(TimeMs::new(T0 + 6_000)).await.unwrap();
    assert_eq!(report.live, 20);

    assert_eq!(mock.submissions().len(), placed);
    let snap = status.snapshot();
    assert!(snap.ready);
    assert_eq!(snap.ticks, 2);
    assert_eq!(snap.inst_id, "ETH-USDT-SWAP");
    assert!(snap.ladder.is_some());
}

#[tokio::test]
async fn test_ticker_failure_is_not_fatal() {
    let mock = mock_at("2000");
    let (mut cl, _status) = control_loop(mock.clone(), Tuning::default()).await;
    cl.startup(TimeMs::new(T0)).await.unwrap();

    mock.set_fail_ticker(true);
    let err = cl.tick(TimeMs::new(T0 + 3_000)).await.unwrap_err();
    assert!(!err.is_fatal());

    mock.set_fail_ticker(false);
    assert!(cl.tick(TimeMs::new(T0 + 6_000)).await.is_ok());
}

#[tokio::test]
async fn test_shape_change_rebuilds_ladder() {
    let mock = mock_at("2000");
    let (mut cl, _status) = control_loop(mock.clone(), Tuning::default()).await;
    cl.startup(TimeMs::new(T0)).await.unwrap();

    let next = Tuning {
        grid_step_usd: d("20"),
        grid_levels_per_side: 5,
        ..Tuning::default()
    };
    cl.apply_tuning(next, TimeMs::new(T0 + 1_000)).await.unwrap();

    assert_eq!(grid_count(&mock), 10);
    assert_eq!(cl.ladder().status().step, d("20"));
    let applied = cl.events().last(events::TUNING_APPLIED).unwrap();
    assert_eq!(applied.payload["shape_changed"], true);
}

#[tokio::test]
async fn test_invalid_tuning_is_ignored() {
    let mock = mock_at("2000");
    let (mut cl, _status) = control_loop(mock.clone(), Tuning::default()).await;
    cl.startup(TimeMs::new(T0)).await.unwrap();

    let bad = Tuning {
        grid_levels_per_side: 0,
        ..Tuning::default()
    };
    cl.apply_tuning(bad, TimeMs::new(T0 + 1_000)).await.unwrap();
    assert_eq!(cl.tuning().grid_levels_per_side, 10);
    assert_eq!(grid_count(&mock), 20);
    assert_eq!(cl.events().count(events::TUNING_APPLIED), 0);
}

#[tokio::test]
async fn test_tuning_file_reload_applies_on_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tuning.jsonc");
    std::fs::write(
        &path,
        "{\n  // wider ladder\n  \"grid_step_usd\": 25,\n  \"grid_levels_per_side\": 4\n}\n",
    )
    .unwrap();

    let mock = mock_at("2000");
    let (cl, _status) = control_loop(mock.clone(), Tuning::default()).await;
    let mut cl = cl.with_tuning_file(TuningFile::new(&path));
    cl.startup(TimeMs::new(T0)).await.unwrap();

    cl.tick(TimeMs::new(T0 + 3_000)).await.unwrap();
    assert_eq!(cl.tuning().grid_levels_per_side, 4);
    assert_eq!(grid_count(&mock), 8);
}

#[tokio::test]
async fn test_shutdown_drains_open_orders() {
    let mock = mock_at("2000");
    let (mut cl, _status) = control_loop(mock.clone(), Tuning::default()).await;
    cl.startup(TimeMs::new(T0)).await.unwrap();

    assert!(cl.shutdown().await);
    assert!(mock.open_order_snapshot().is_empty());
    assert_eq!(cl.events().count(events::CANCEL_ALL_EXIT), 1);
}

#[tokio::test]
async fn test_run_stops_and_drains() {
    let mock = mock_at("2000");
    let (mut cl, status) = control_loop(mock.clone(), Tuning::default()).await;

    cl.run(async {}).await.unwrap();

    assert!(status.is_ready());
    assert!(mock.open_order_snapshot().is_empty());
}
