//! DCA window: while a side sits inside its loss band, grid reposting on
//! that side is paused and capped market adds are allowed on reverse
//! momentum. The window closes once price returns to the average entry.

use super::events::{self, EventLog};
use super::sizing::contracts_for_notional;
use super::{skip_rejected, EngineError, PolicyContext};
use crate::domain::{Decimal, OrderTag, PerSide, PosSide, PositionSnapshot, SidePosition};
use crate::gateway::MarketIntent;
use crate::tuning::Tuning;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcaConfig {
    pub enabled: bool,
    /// Loss band as fractions of the reference price.
    pub min_pct: Decimal,
    pub max_pct: Decimal,
    /// Per add, not scaled by the risk profile.
    pub notional_usd: Decimal,
    pub total_cap: u32,
}

impl DcaConfig {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            enabled: t.dca_enable,
            min_pct: t.dca_min_pct,
            max_pct: t.dca_max_pct,
            notional_usd: t.dca_fixed_notional_usd,
            total_cap: t.dca_total_cap,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DcaSideState {
    pub active: bool,
    pub used_slots: u32,
    pub first_entry: Option<Decimal>,
}

#[derive(Debug)]
pub struct DcaWindow {
    cfg: DcaConfig,
    state: PerSide<DcaSideState>,
    events: EventLog,
}

impl DcaWindow {
    pub fn new(cfg: DcaConfig, events: EventLog) -> Self {
        Self {
            cfg,
            state: PerSide::default(),
            events,
        }
    }

    pub fn set_config(&mut self, cfg: DcaConfig) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> PerSide<DcaSideState> {
        self.state
    }

    pub fn is_active(&self, side: PosSide) -> bool {
        self.state[side].active
    }

    /// Ladder sides whose grid reposting is suspended.
    pub fn paused_sides(&self) -> PerSide<bool> {
        self.state.map(|_, s| s.active)
    }

    /// Adopt positions that existed before startup as first entries.
    pub fn takeover(&mut self, positions: &PositionSnapshot, mid: Decimal) {
        for (side, pos) in positions.iter() {
            if pos.is_open() {
                let entry = reference_or(pos.avg_price, mid);
                self.state[side].first_entry = Some(entry);
                info!(side = %side, qty = %pos.quantity, entry = %entry, "Took over existing position");
            }
        }
    }

    /// Record the first entry on a side that just opened and forget it on a
    /// side that went flat.
    pub fn update_first_entry(&mut self, positions: &PositionSnapshot, mid: Decimal) {
        for (side, pos) in positions.iter() {
            let slot = &mut self.state[side].first_entry;
            if !pos.is_open() {
                *slot = None;
            } else if slot.is_none() {
                *slot = Some(reference_or(pos.avg_price, mid));
            }
        }
    }

    /// Adverse move from the reference price as a fraction. The reference is
    /// the first entry, else the exchange average, else `price` itself.
    pub fn loss_pct(&self, side: PosSide, pos: &SidePosition, price: Decimal) -> Decimal {
        let reference = self.state[side]
            .first_entry
            .unwrap_or_else(|| reference_or(pos.avg_price, price));
        if !reference.is_positive() {
            return Decimal::zero();
        }
        let diff = match side {
            PosSide::Long => reference - price,
            PosSide::Short => price - reference,
        };
        diff.checked_div(reference).unwrap_or_default()
    }

    fn in_band(&self, loss: Decimal) -> bool {
        loss >= self.cfg.min_pct && loss <= self.cfg.max_pct
    }

    /// Price is back at or through the average entry.
    fn recovered(side: PosSide, pos: &SidePosition, price: Decimal) -> bool {
        let avg = if pos.is_open() {
            reference_or(pos.avg_price, price)
        } else {
            price
        };
        match side {
            PosSide::Long => price >= avg,
            PosSide::Short => price <= avg,
        }
    }

    /// One signal-cadence pass over both sides. While the risk guard is
    /// paused nothing runs, so window exits wait for the resume as well.
    pub async fn run(&mut self, ctx: &PolicyContext<'_>) -> Result<(), EngineError> {
        if !self.cfg.enabled {
            return Ok(());
        }
        if ctx.guard_paused {
            self.events
                .emit(events::DCA_BLOCKED, json!({ "reason": "risk_guard" }));
            return Ok(());
        }

        let mut positions = *ctx.positions;
        for side in PosSide::BOTH {
            let loss = self.loss_pct(side, &positions[side], ctx.mid);

            if !self.state[side].active {
                if self.in_band(loss) {
                    self.enter(ctx, side, loss).await?;
                }
                continue;
            }

            let mut added = false;
            if self.state[side].used_slots < self.cfg.total_cap
                && reverse_signal(ctx, side).await
            {
                added = self.add(ctx, side, loss).await?;
            }
            if added {
                positions = ctx.router.gateway().positions(ctx.router.inst()).await?;
            }
            if Self::recovered(side, &positions[side], ctx.mid) {
                let used = self.state[side].used_slots;
                self.state[side].active = false;
                self.state[side].used_slots = 0;
                info!(side = %side, used, "DCA window closed");
                self.events.emit(
                    events::DCA_WINDOW_EXIT,
                    json!({ "side": side, "price": ctx.mid, "used": used }),
                );
            }
        }
        Ok(())
    }

    async fn enter(
        &mut self,
        ctx: &PolicyContext<'_>,
        side: PosSide,
        loss: Decimal,
    ) -> Result<(), EngineError> {
        self.state[side].active = true;
        let cancelled = ctx
            .router
            .cancel_by_tag_and_side(OrderTag::Grid, side)
            .await?;
        info!(side = %side, loss = %loss, cancelled, "DCA window opened, grid side paused");
        self.events.emit(
            events::DCA_WINDOW_ENTER,
            json!({ "side": side, "loss_pct": loss, "cancelled": cancelled }),
        );
        Ok(())
    }

    async fn add(
        &mut self,
        ctx: &PolicyContext<'_>,
        side: PosSide,
        loss: Decimal,
    ) -> Result<bool, EngineError> {
        let size = contracts_for_notional(self.cfg.notional_usd, ctx.mid, ctx.router.spec());
        let result = ctx
            .router
            .place_market(MarketIntent::open(side, size, OrderTag::Dca))
            .await;
        let placed = skip_rejected(result, "dca.add")?.is_some_and(|s| s.is_placed());
        if placed {
            let slot = &mut self.state[side];
            slot.used_slots += 1;
            info!(side = %side, size = %size, used = slot.used_slots, "DCA add");
            self.events.emit(
                events::DCA_ADD,
                json!({
                    "side": side,
                    "size": size,
                    "loss_pct": loss,
                    "used": slot.used_slots,
                    "cap": self.cfg.total_cap,
                }),
            );
        }
        Ok(placed)
    }
}

fn reference_or(avg: Decimal, fallback: Decimal) -> Decimal {
    if avg.is_positive() {
        avg
    } else {
        fallback
    }
}

/// Signal failures count as "no signal".
async fn reverse_signal(ctx: &PolicyContext<'_>, side: PosSide) -> bool {
    match ctx
        .signals
        .dca_reverse_signal(ctx.router.inst(), side, &ctx.params)
        .await
    {
        Ok(on) => on,
        Err(e) => {
            warn!(side = %side, error = %e, "DCA reverse signal unavailable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeMs;
    use crate::engine::testkit;
    use crate::gateway::MockGateway;
    use crate::signals::{ScriptedSignals, SignalParams};
    use std::sync::Arc;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn window() -> DcaWindow {
        DcaWindow::new(DcaConfig::from_tuning(&Tuning::default()), EventLog::default())
    }

    #[test]
    fn test_loss_pct_reference_fallbacks() {
        let mut dca = window();
        let pos = testkit::open_side("1", "2000", "0");
        // Exchange average when no first entry.
        assert_eq!(
            dca.loss_pct(PosSide::Long, &pos, d(1800)),
            Decimal::from_str_canonical("0.1").unwrap()
        );
        dca.state.long.first_entry = Some(d(2500));
        assert_eq!(
            dca.loss_pct(PosSide::Long, &pos, d(2000)),
            Decimal::from_str_canonical("0.2").unwrap()
        );
        // Short loses when price rises.
        assert_eq!(
            dca.loss_pct(PosSide::Short, &pos, d(2200)),
            Decimal::from_str_canonical("0.1").unwrap()
        );
    }

    #[test]
    fn test_first_entry_follows_position() {
        let mut dca = window();
        let mut snap = PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "0");
        dca.update_first_entry(&snap, d(1990));
        assert_eq!(dca.state().long.first_entry, Some(d(2000)));

        // Later averaging does not move the first entry.
        snap.long = testkit::open_side("2", "1950", "0");
        dca.update_first_entry(&snap, d(1900));
        assert_eq!(dca.state().long.first_entry, Some(d(2000)));

        snap.long = SidePosition::default();
        dca.update_first_entry(&snap, d(1900));
        assert_eq!(dca.state().long.first_entry, None);
    }

    #[tokio::test]
    async fn test_window_enter_add_cap_and_exit() {
        let mock = Arc::new(
            MockGateway::new(testkit::spec())
                .with_position(PosSide::Long, testkit::open_side("1", "2000", "-180")),
        );
        let router = testkit::router(mock.clone());
        let signals = ScriptedSignals::new();
        signals.set_dca_reverse(PosSide::Long, true);
        let mut dca = window();
        let mut snap = PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "-180");
        let ctx = |mid: i64| PolicyContext {
            router: &router,
            signals: &signals,
            params: SignalParams::default(),
            positions: &snap,
            mid: d(mid),
            guard_paused: false,
            now: TimeMs::new(0),
        };

        // 9% down: enter without adding.
        dca.run(&ctx(1820)).await.unwrap();
        assert!(dca.is_active(PosSide::Long));
        assert!(dca.paused_sides().long);
        assert!(mock.submissions().is_empty());

        for _ in 0..6 {
            dca.run(&ctx(1820)).await.unwrap();
        }
        let adds = mock
            .submissions()
            .iter()
            .filter(|r| r.tag == OrderTag::Dca)
            .count();
        assert_eq!(adds, 4);
        assert_eq!(dca.state().long.used_slots, 4);

        // Back at the average: window closes and slots reset.
        dca.run(&ctx(2000)).await.unwrap();
        assert!(!dca.is_active(PosSide::Long));
        assert_eq!(dca.state().long.used_slots, 0);
        assert_eq!(dca.events.count(events::DCA_WINDOW_EXIT), 1);
    }

    #[tokio::test]
    async fn test_blocked_while_guard_paused() {
        let mock = Arc::new(MockGateway::new(testkit::spec()));
        let router = testkit::router(mock.clone());
        let signals = ScriptedSignals::new();
        let mut dca = window();
        let mut snap = PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "-180");
        let ctx = PolicyContext {
            router: &router,
            signals: &signals,
            params: SignalParams::default(),
            positions: &snap,
            mid: d(1820),
            guard_paused: true,
            now: TimeMs::new(0),
        };
        dca.run(&ctx).await.unwrap();
        assert!(!dca.is_active(PosSide::Long));
        assert_eq!(dca.events.count(events::DCA_BLOCKED), 1);
    }

    #[tokio::test]
    async fn test_window_exit_waits_for_resume() {
        let mock = Arc::new(MockGateway::new(testkit::spec()));
        let router = testkit::router(mock.clone());
        let signals = ScriptedSignals::new();
        let mut dca = window();
        let mut snap = PositionSnapshot::default();
        snap.long = testkit::open_side("1", "2000", "-180");
        let ctx = |mid: i64, guard_paused: bool| PolicyContext {
            router: &router,
            signals: &signals,
            params: SignalParams::default(),
            positions: &snap,
            mid: d(mid),
            guard_paused,
            now: TimeMs::new(0),
        };

        dca.run(&ctx(1820, false)).await.unwrap();
        assert!(dca.is_active(PosSide::Long));

        // Recovered price, but the guard is paused: the window stays open.
        dca.run(&ctx(2000, true)).await.unwrap();
        assert!(dca.is_active(PosSide::Long));
        assert_eq!(dca.events.count(events::DCA_WINDOW_EXIT), 0);

        dca.run(&ctx(2000, false)).await.unwrap();
        assert!(!dca.is_active(PosSide::Long));
        assert_eq!(dca.events.count(events::DCA_WINDOW_EXIT), 1);
    }
}
