//! Trend-add throttle: market adds in the direction of a confirmed trend,
//! limited by cooldown, spacing, a daily cap and a notional cap.

use super::events::{self, EventLog};
use super::{skip_rejected, EngineError, PolicyContext};
use crate::domain::{Decimal, OrderTag, PerSide, PosSide, SidePosition, TimeMs};
use crate::gateway::MarketIntent;
use crate::signals::Resonance;
use crate::tuning::Tuning;
use chrono::{Local, NaiveDate, TimeZone};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendConfig {
    /// Per add, already scaled by the risk profile.
    pub notional_usd: Decimal,
    /// Zero means unlimited.
    pub daily_cap: u32,
    pub cooldown_sec: i64,
    /// Zero means unlimited.
    pub max_notional_usd: Decimal,
    pub min_distance_pct: Decimal,
    pub require_profit: bool,
}

impl TrendConfig {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            notional_usd: t.trend_notional_usd * t.trend_scale(),
            daily_cap: t.trend_daily_cap,
            cooldown_sec: t.trend_cooldown_sec,
            max_notional_usd: t.trend_max_notional_usd,
            min_distance_pct: t.trend_min_distance_pct,
            require_profit: t.trend_require_profit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrendSideState {
    pub daily_count: u32,
    pub last_add_at: Option<TimeMs>,
    pub last_add_price: Option<Decimal>,
    /// Adds not yet taken off by a take-profit exit.
    pub open_adds: u32,
}

/// First gate that refused an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBlock {
    NotProfitable,
    NoTrend,
    DcaActive,
    Cooldown,
    TooClose,
    DailyCap,
    NotionalCap,
}

#[derive(Debug)]
pub struct TrendThrottle {
    cfg: TrendConfig,
    state: PerSide<TrendSideState>,
    day: Option<NaiveDate>,
    events: EventLog,
}

fn local_day(now: TimeMs) -> Option<NaiveDate> {
    Local
        .timestamp_millis_opt(now.as_i64())
        .single()
        .map(|t| t.date_naive())
}

impl TrendThrottle {
    pub fn new(cfg: TrendConfig, events: EventLog) -> Self {
        Self {
            cfg,
            state: PerSide::default(),
            day: None,
            events,
        }
    }

    pub fn set_config(&mut self, cfg: TrendConfig) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> PerSide<TrendSideState> {
        self.state
    }

    /// Reset daily counts when the local calendar day changes.
    pub fn roll_day(&mut self, now: TimeMs) {
        let today = local_day(now);
        if today.is_some() && today != self.day {
            if self.day.is_some() {
                debug!(day = ?today, "New trading day, trend counts reset");
            }
            self.day = today;
            for side in PosSide::BOTH {
                self.state[side].daily_count = 0;
            }
        }
    }

    /// Every local gate, in order. The signal filter is checked by the
    /// caller after these pass.
    pub fn gate(
        &self,
        side: PosSide,
        pos: &SidePosition,
        resonance: &Resonance,
        dca_active: bool,
        mid: Decimal,
        now: TimeMs,
    ) -> Result<(), TrendBlock> {
        let st = &self.state[side];
        if self.cfg.require_profit && !pos.is_profitable() {
            return Err(TrendBlock::NotProfitable);
        }
        if !resonance.with_volume(side) {
            return Err(TrendBlock::NoTrend);
        }
        if dca_active {
            return Err(TrendBlock::DcaActive);
        }
        if self.cfg.cooldown_sec > 0 {
            if let Some(last) = st.last_add_at {
                if now.since(last) < self.cfg.cooldown_sec * 1000 {
                    return Err(TrendBlock::Cooldown);
                }
            }
        }
        if self.cfg.min_distance_pct.is_positive() && mid.is_positive() {
            if let Some(last_px) = st.last_add_price {
                let moved = (mid - last_px).abs().checked_div(mid).unwrap_or_default();
                if moved < self.cfg.min_distance_pct {
                    return Err(TrendBlock::TooClose);
                }
            }
        }
        if self.cfg.daily_cap > 0 && st.daily_count >= self.cfg.daily_cap {
            return Err(TrendBlock::DailyCap);
        }
        if self.cfg.max_notional_usd.is_positive() {
            let next = Decimal::from(st.open_adds + 1) * self.cfg.notional_usd;
            if next > self.cfg.max_notional_usd {
                return Err(TrendBlock::NotionalCap);
            }
        }
        Ok(())
    }

    pub fn record_add(&mut self, side: PosSide, price: Decimal, now: TimeMs) {
        let st = &mut self.state[side];
        st.open_adds += 1;
        st.daily_count += 1;
        st.last_add_at = Some(now);
        st.last_add_price = Some(price);
    }

    /// Take-profit closed the side outright before any trailing.
    pub fn reset_open_adds(&mut self, side: PosSide) {
        self.state[side].open_adds = 0;
    }

    /// Trailing exit closed the rest of the side.
    pub fn reset_after_exit(&mut self, side: PosSide) {
        self.state[side].open_adds = 0;
        self.state[side].last_add_price = None;
    }

    /// One signal-cadence pass. `sizes` are per-add contracts.
    pub async fn run(
        &mut self,
        ctx: &PolicyContext<'_>,
        resonance: &Resonance,
        dca_active: PerSide<bool>,
        sizes: PerSide<Decimal>,
    ) -> Result<(), EngineError> {
        if ctx.guard_paused {
            return Ok(());
        }
        self.roll_day(ctx.now);

        for side in PosSide::BOTH {
            if let Err(block) = self.gate(
                side,
                &ctx.positions[side],
                resonance,
                dca_active[side],
                ctx.mid,
                ctx.now,
            ) {
                debug!(side = %side, ?block, "Trend add gated");
                continue;
            }
            let filters = ctx
                .signals
                .trend_filters_ok(ctx.router.inst(), side, &ctx.params)
                .await;
            match filters {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(side = %side, error = %e, "Trend filters unavailable");
                    continue;
                }
            }

            let size = sizes[side];
            let result = ctx
                .router
                .place_market(MarketIntent::open(side, size, OrderTag::TrendAdd))
                .await;
            if !skip_rejected(result, "trend.add")?.is_some_and(|s| s.is_placed()) {
                continue;
            }
            self.record_add(side, ctx.mid, ctx.now);
            let st = self.state[side];
            info!(side = %side, size = %size, open_adds = st.open_adds, "Trend add");
            self.events.emit(
                events::TREND_ADD,
                json!({
                    "side": side,
                    "size": size,
                    "price": ctx.mid,
                    "open_adds": st.open_adds,
                    "daily_count": st.daily_count,
                }),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit;
    use crate::gateway::MockGateway;
    use crate::signals::{ScriptedSignals, SignalParams};
    use std::sync::Arc;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn throttle(t: Tuning) -> TrendThrottle {
        TrendThrottle::new(TrendConfig::from_tuning(&t), EventLog::default())
    }

    fn bull() -> Resonance {
        Resonance {
            bull: true,
            vol_bull: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_gates_in_order() {
        let tt = throttle(Tuning::default());
        let now = TimeMs::new(1_700_000_000_000);
        let flat = SidePosition::default();
        let winning = testkit::open_side("1", "2000", "3");
        let px = d("2100");

        assert_eq!(
            tt.gate(PosSide::Long, &flat, &bull(), false, px, now),
            Err(TrendBlock::NotProfitable)
        );
        assert_eq!(
            tt.gate(PosSide::Short, &winning, &bull(), false, px, now),
            Err(TrendBlock::NoTrend)
        );
        assert_eq!(
            tt.gate(PosSide::Long, &winning, &bull(), true, px, now),
            Err(TrendBlock::DcaActive)
        );
        assert_eq!(tt.gate(PosSide::Long, &winning, &bull(), false, px, now), Ok(()));
    }

    #[test]
    fn test_cooldown_and_spacing() {
        let mut tt = throttle(Tuning::default());
        let t0 = TimeMs::new(1_700_000_000_000);
        let pos = testkit::open_side("1", "2000", "3");
        tt.record_add(PosSide::Long, d("2000"), t0);

        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2100"), t0.plus_secs(60)),
            Err(TrendBlock::Cooldown)
        );
        // Past the cooldown but only 0.5% away.
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2010"), t0.plus_secs(200)),
            Err(TrendBlock::TooClose)
        );
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2100"), t0.plus_secs(200)),
            Ok(())
        );
    }

    #[test]
    fn test_daily_cap_resets_on_new_day() {
        let mut tt = throttle(Tuning {
            trend_daily_cap: 2,
            trend_cooldown_sec: 0,
            trend_min_distance_pct: Decimal::zero(),
            ..Default::default()
        });
        let t0 = TimeMs::new(1_700_000_000_000);
        let pos = testkit::open_side("1", "2000", "3");
        tt.roll_day(t0);
        tt.record_add(PosSide::Long, d("2000"), t0);
        tt.record_add(PosSide::Long, d("2000"), t0);
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2000"), t0),
            Err(TrendBlock::DailyCap)
        );

        let tomorrow = t0.plus_secs(24 * 3600);
        tt.roll_day(tomorrow);
        assert_eq!(tt.state().long.daily_count, 0);
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2000"), tomorrow),
            Ok(())
        );
    }

    #[test]
    fn test_notional_cap() {
        let mut tt = throttle(Tuning {
            trend_max_notional_usd: d("20"),
            trend_cooldown_sec: 0,
            trend_min_distance_pct: Decimal::zero(),
            ..Default::default()
        });
        let now = TimeMs::new(1_700_000_000_000);
        let pos = testkit::open_side("1", "2000", "3");
        tt.record_add(PosSide::Long, d("2000"), now);
        tt.record_add(PosSide::Long, d("2000"), now);
        // A third 8 USD add would make 24 > 20.
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2000"), now),
            Err(TrendBlock::NotionalCap)
        );
        tt.reset_after_exit(PosSide::Long);
        assert_eq!(tt.state().long.last_add_price, None);
        assert_eq!(
            tt.gate(PosSide::Long, &pos, &bull(), false, d("2000"), now),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_run_places_add_and_records() {
        let mock = Arc::new(MockGateway::new(testkit::spec()));
        let router = testkit::router(mock.clone());
        let signals = ScriptedSignals::new();
        signals.set_trend_ok(PosSide::Long, true);
        let mut snap = crate::domain::PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "3");
        let ctx = PolicyContext {
            router: &router,
            signals: &signals,
            params: SignalParams::default(),
            positions: &snap,
            mid: d("2050"),
            guard_paused: false,
            now: TimeMs::new(1_700_000_000_000),
        };
        let mut tt = throttle(Tuning::default());
        let sizes = PerSide::new(d("0.02"), d("0.02"));

        tt.run(&ctx, &bull(), PerSide::default(), sizes).await.unwrap();
        let subs = mock.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].tag, OrderTag::TrendAdd);
        assert_eq!(subs[0].pos_side, PosSide::Long);
        assert_eq!(tt.state().long.open_adds, 1);
        assert_eq!(tt.state().long.last_add_price, Some(d("2050")));

        // Cooldown holds the second pass.
        tt.run(&ctx, &bull(), PerSide::default(), sizes).await.unwrap();
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_filter_rejection_skips_add() {
        let mock = Arc::new(MockGateway::new(testkit::spec()));
        let router = testkit::router(mock.clone());
        let signals = ScriptedSignals::new();
        signals.set_trend_ok(PosSide::Long, false);
        let mut snap = crate::domain::PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "3");
        let ctx = PolicyContext {
            router: &router,
            signals: &signals,
            params: SignalParams::default(),
            positions: &snap,
            mid: d("2050"),
            guard_paused: false,
            now: TimeMs::new(1_700_000_000_000),
        };
        let mut tt = throttle(Tuning::default());
        tt.run(&ctx, &bull(), PerSide::default(), PerSide::new(d("0.02"), d("0.02")))
            .await
            .unwrap();
        assert!(mock.submissions().is_empty());
    }
}
