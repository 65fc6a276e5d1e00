mod common;

use common::{d, mock_at, open_side, router};
use gvwap::domain::{OrderTag, PerSide, PositionSnapshot, Side, TimeMs};
use gvwap::engine::{EventLog, LadderConfig, LadderEngine};
use gvwap::gateway::MockGateway;
use gvwap::tuning::Tuning;
use gvwap::OrderRouter;
use std::sync::Arc;

const T0: i64 = 1_700_000_000_000;

fn tuning() -> Tuning {
    Tuning {
        grid_step_usd: d("10"),
        grid_levels_per_side: 3,
        ..Default::default()
    }
}

async fn placed_ladder(t: &Tuning) -> (Arc<MockGateway>, OrderRouter, LadderEngine) {
    let mock = mock_at("2000");
    let router = router(mock.clone());
    let mut ladder = LadderEngine::new(LadderConfig::from_tuning(t), EventLog::default());
    ladder.rebuild(d("2000"), PerSide::new(d("0.2"), d("0.2")));
    assert_eq!(ladder.place_all(&router).await.unwrap(), 6);
    mock.clear_submissions();
    (mock, router, ladder)
}

fn eff(router: &OrderRouter, side: Side, raw: &str) -> gvwap::Decimal {
    router.effective_price(side, d(raw))
}

fn no_pause() -> PerSide<bool> {
    PerSide::default()
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    for i in 0..3 {
        let report = ladder
            .place_missing(&router, d("2000"), &flat, no_pause(), TimeMs::new(T0 + i * 3000))
            .await
            .unwrap();
        assert_eq!(report.live, 6);
        assert_eq!(report.reposted, 0);
    }
    assert!(mock.submissions().is_empty());
    assert_eq!(ladder.place_all(&router).await.unwrap(), 0);
}

#[tokio::test]
async fn test_effective_price_matches_resting_orders() {
    let (mock, router, ladder) = placed_ladder(&tuning()).await;
    let resting: Vec<_> = mock.open_order_snapshot().iter().map(|o| o.price).collect();
    for level in ladder.levels() {
        let px = router.effective_price(level.side, level.raw_price);
        assert!(resting.contains(&px), "{} not resting", px);
    }
    // Post-only buys rest one tick below, sells one tick above.
    assert!(resting.contains(&d("1989.99")));
    assert!(resting.contains(&d("2010.01")));
}

#[tokio::test]
async fn test_single_fill_waits_for_ttl() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    let px = eff(&router, Side::Buy, "1980");
    assert_eq!(mock.fill_at(px), 1);

    let report = ladder
        .place_missing(&router, d("1985"), &flat, no_pause(), TimeMs::new(T0))
        .await
        .unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(ladder.missing_since(px), Some(TimeMs::new(T0)));
    assert!(mock.submissions().is_empty());

    let later = TimeMs::new(T0).plus_secs(1800);
    let report = ladder
        .place_missing(&router, d("1985"), &flat, no_pause(), later)
        .await
        .unwrap();
    assert_eq!(report.reposted, 1);
    assert_eq!(mock.submissions()[0].price(), Some(px));
}

#[tokio::test]
async fn test_missing_neighbor_reposts_immediately() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    mock.fill_at(eff(&router, Side::Buy, "1990"));
    mock.fill_at(eff(&router, Side::Buy, "1980"));

    let report = ladder
        .place_missing(&router, d("1975"), &flat, no_pause(), TimeMs::new(T0))
        .await
        .unwrap();
    assert_eq!(report.reposted, 2);
    assert_eq!(mock.open_order_snapshot().len(), 6);
}

#[tokio::test]
async fn test_repost_frequency_cap() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    let a = eff(&router, Side::Sell, "2010");
    let b = eff(&router, Side::Sell, "2020");

    let mut reposted = Vec::new();
    for i in 0..7 {
        mock.fill_at(a);
        mock.fill_at(b);
        let report = ladder
            .place_missing(&router, d("2015"), &flat, no_pause(), TimeMs::new(T0 + i * 60_000))
            .await
            .unwrap();
        reposted.push(report.reposted);
    }
    assert_eq!(reposted, vec![2, 2, 2, 2, 2, 0, 0]);
    assert_eq!(ladder.repost_count(a), 5);

    // A new window opens after the TTL.
    let report = ladder
        .place_missing(
            &router,
            d("2015"),
            &flat,
            no_pause(),
            TimeMs::new(T0).plus_secs(1800),
        )
        .await
        .unwrap();
    assert_eq!(report.reposted, 2);
}

#[tokio::test]
async fn test_exhausted_window_resets_after_far_move() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    let a = eff(&router, Side::Buy, "1970");
    let b = eff(&router, Side::Buy, "1980");

    let mut now = T0;
    for _ in 0..5 {
        mock.fill_at(a);
        mock.fill_at(b);
        let report = ladder
            .place_missing(&router, d("1995"), &flat, no_pause(), TimeMs::new(now))
            .await
            .unwrap();
        assert_eq!(report.reposted, 2);
        now += 3_000;
    }
    mock.fill_at(a);
    mock.fill_at(b);
    let report = ladder
        .place_missing(&router, d("1995"), &flat, no_pause(), TimeMs::new(now))
        .await
        .unwrap();
    assert_eq!(report.throttled, 2);
    assert_eq!(ladder.repost_count(a), 5);

    // Seven or more steps away from both levels: the windows are dropped
    // and the first tick there reposts them.
    now += 3_000;
    let report = ladder
        .place_missing(&router, d("2050"), &flat, no_pause(), TimeMs::new(now))
        .await
        .unwrap();
    assert_eq!(report.reposted, 2);
    assert_eq!(ladder.repost_count(a), 1);

    // Back near the levels, well inside the original window.
    now += 3_000;
    mock.fill_at(a);
    mock.fill_at(b);
    let report = ladder
        .place_missing(&router, d("1995"), &flat, no_pause(), TimeMs::new(now))
        .await
        .unwrap();
    assert_eq!(report.reposted, 2);
    assert_eq!(report.throttled, 0);
}

#[tokio::test]
async fn test_outer_level_reposts_after_ttl() {
    let t = Tuning::default();
    let mock = mock_at("2000");
    let router = router(mock.clone());
    let mut ladder = LadderEngine::new(LadderConfig::from_tuning(&t), EventLog::default());
    ladder.rebuild(d("2000"), PerSide::new(d("0.2"), d("0.2")));
    assert_eq!(ladder.place_all(&router).await.unwrap(), 20);
    mock.clear_submissions();
    let flat = PositionSnapshot::default();

    // Ten steps below mid, so inside the far-away band on every tick.
    let px = eff(&router, Side::Buy, "1850");
    assert_eq!(mock.fill_at(px), 1);

    let mut now = T0;
    let end = T0 + 1_800_000;
    while now < end {
        let report = ladder
            .place_missing(&router, d("2000"), &flat, no_pause(), TimeMs::new(now))
            .await
            .unwrap();
        assert_eq!(report.reposted, 0);
        now += 3_000;
    }
    assert_eq!(ladder.missing_since(px), Some(TimeMs::new(T0)));

    let report = ladder
        .place_missing(&router, d("2000"), &flat, no_pause(), TimeMs::new(end))
        .await
        .unwrap();
    assert_eq!(report.reposted, 1);
    let subs = mock.submissions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].price(), Some(px));
}

#[tokio::test]
async fn test_flat_edge_reposts_whole_side() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let px = eff(&router, Side::Buy, "1980");
    mock.fill_at(px);

    let mut snap = PositionSnapshot::default();
    snap.long = open_side("0.2", "1980", "0");
    let report = ladder
        .place_missing(&router, d("1985"), &snap, no_pause(), TimeMs::new(T0))
        .await
        .unwrap();
    assert_eq!(report.deferred, 1);

    snap.long = Default::default();
    let report = ladder
        .place_missing(&router, d("1985"), &snap, no_pause(), TimeMs::new(T0 + 3000))
        .await
        .unwrap();
    assert_eq!(report.flat_edge_placed, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(ladder.missing_since(px), None);
}

#[tokio::test]
async fn test_paused_side_is_not_reposted() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    mock.fill_at(eff(&router, Side::Buy, "1990"));
    mock.fill_at(eff(&router, Side::Buy, "1980"));

    let paused = PerSide::new(true, false);
    let report = ladder
        .place_missing(&router, d("1975"), &flat, paused, TimeMs::new(T0))
        .await
        .unwrap();
    assert_eq!(report.paused, 2);
    assert!(mock.submissions().is_empty());
}

#[tokio::test]
async fn test_open_order_failure_changes_nothing() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    let flat = PositionSnapshot::default();
    let px = eff(&router, Side::Buy, "1980");
    mock.fill_at(px);
    mock.set_fail_open_orders(true);

    let result = ladder
        .place_missing(&router, d("1985"), &flat, no_pause(), TimeMs::new(T0))
        .await;
    assert!(result.unwrap_err().is_transient());
    assert_eq!(ladder.missing_since(px), None);
    assert!(mock.submissions().is_empty());
}

#[tokio::test]
async fn test_one_side_consumed_after_full_live() {
    let (mock, router, mut ladder) = placed_ladder(&tuning()).await;
    assert_eq!(ladder.side_live_counts(&router).await.unwrap(), (3, 3));
    assert!(ladder.had_full_live());
    assert!(!ladder.one_side_consumed());

    for raw in ["2010", "2020", "2030"] {
        mock.fill_at(eff(&router, Side::Sell, raw));
    }
    assert_eq!(ladder.side_live_counts(&router).await.unwrap(), (3, 0));
    assert!(ladder.one_side_consumed());

    let cancelled = ladder.cancel_grid(&router).await.unwrap();
    assert_eq!(cancelled, 3);
    assert!(mock
        .open_order_snapshot()
        .iter()
        .all(|o| !o.has_tag(OrderTag::Grid)));
}
