//! Take-profit with trailing: a full close at the base target when no trend
//! backs the side, otherwise a partial close followed by a drawdown trail on
//! the peak unrealized PnL.

use super::events::{self, EventLog};
use super::trend::TrendThrottle;
use super::{skip_rejected, EngineError, PolicyContext};
use crate::domain::{floor_size, Decimal, InstrumentSpec, OrderTag, PerSide, PosSide, SidePosition};
use crate::gateway::MarketIntent;
use crate::signals::Resonance;
use crate::tuning::Tuning;
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeProfitConfig {
    pub base_usd: Decimal,
    pub partial_ratio: Decimal,
    pub trail_usd: Decimal,
    pub trail_pct: Decimal,
}

impl TakeProfitConfig {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            base_usd: t.tp_base_usd,
            partial_ratio: t.tp_partial_ratio,
            trail_usd: t.tp_trail_usd,
            trail_pct: t.tp_trail_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TpSideState {
    pub partial_done: bool,
    pub trailing_active: bool,
    pub peak_upnl: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Base target reached with no trend behind the side.
    Base,
    /// Drawdown from the peak exceeded the trail.
    Trail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpDecision {
    Hold,
    /// Reduce by this many contracts and start trailing.
    Partial(Decimal),
    Close(ExitReason),
}

#[derive(Debug)]
pub struct TakeProfitTrailer {
    cfg: TakeProfitConfig,
    state: PerSide<TpSideState>,
    events: EventLog,
}

impl TakeProfitTrailer {
    pub fn new(cfg: TakeProfitConfig, events: EventLog) -> Self {
        Self {
            cfg,
            state: PerSide::default(),
            events,
        }
    }

    pub fn set_config(&mut self, cfg: TakeProfitConfig) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> PerSide<TpSideState> {
        self.state
    }

    /// Update the peak for `side` and decide. A flat side resets.
    ///
    /// A partial that rounds below the exchange minimum is skipped for the
    /// pass rather than turned into a full close.
    pub fn evaluate(
        &mut self,
        side: PosSide,
        pos: &SidePosition,
        trending: bool,
        spec: &InstrumentSpec,
    ) -> TpDecision {
        if !pos.is_open() {
            self.state[side] = TpSideState::default();
            return TpDecision::Hold;
        }
        let upl = pos.unrealized_pnl;
        let st = &mut self.state[side];
        st.peak_upnl = st.peak_upnl.max(upl);

        if !st.partial_done && upl >= self.cfg.base_usd {
            if !trending {
                return TpDecision::Close(ExitReason::Base);
            }
            let part = floor_size(pos.quantity * self.cfg.partial_ratio, spec.lot_size);
            if part.is_positive() && part >= spec.min_size {
                return TpDecision::Partial(part);
            }
            return TpDecision::Hold;
        }

        if st.trailing_active {
            let drawdown = st.peak_upnl - upl;
            let drawdown_pct = if st.peak_upnl.is_positive() {
                drawdown.checked_div(st.peak_upnl).unwrap_or_default()
            } else {
                Decimal::zero()
            };
            if drawdown >= self.cfg.trail_usd || drawdown_pct >= self.cfg.trail_pct {
                return TpDecision::Close(ExitReason::Trail);
            }
        }
        TpDecision::Hold
    }

    fn on_partial(&mut self, side: PosSide, upl: Decimal) {
        let st = &mut self.state[side];
        st.partial_done = true;
        st.trailing_active = true;
        st.peak_upnl = upl;
    }

    /// One signal-cadence pass. Runs regardless of the risk guard.
    pub async fn run(
        &mut self,
        ctx: &PolicyContext<'_>,
        resonance: &Resonance,
        trend: &mut TrendThrottle,
    ) -> Result<(), EngineError> {
        let spec = *ctx.router.spec();
        for side in PosSide::BOTH {
            let pos = ctx.positions[side];
            match self.evaluate(side, &pos, resonance.direction(side), &spec) {
                TpDecision::Hold => {}
                TpDecision::Partial(size) => {
                    let result = ctx
                        .router
                        .place_market(MarketIntent::reduce(side, size, OrderTag::TakeProfit))
                        .await;
                    if skip_rejected(result, "tp.partial")?.is_some_and(|s| s.is_placed()) {
                        self.on_partial(side, pos.unrealized_pnl);
                        info!(side = %side, size = %size, upl = %pos.unrealized_pnl, "Partial take-profit, trailing");
                        self.events.emit(
                            events::TP_PARTIAL,
                            json!({ "side": side, "size": size, "upl": pos.unrealized_pnl }),
                        );
                    }
                }
                TpDecision::Close(reason) => {
                    let peak = self.state[side].peak_upnl;
                    if !close_side(ctx, side, &pos, &spec).await? {
                        continue;
                    }
                    self.state[side] = TpSideState::default();
                    match reason {
                        ExitReason::Base => trend.reset_open_adds(side),
                        ExitReason::Trail => trend.reset_after_exit(side),
                    }
                    info!(side = %side, ?reason, upl = %pos.unrealized_pnl, "Take-profit close");
                    self.events.emit(
                        events::TP_CLOSE,
                        json!({
                            "side": side,
                            "reason": reason,
                            "qty": pos.quantity,
                            "upl": pos.unrealized_pnl,
                            "peak": peak,
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Reduce-only market close of the whole side, falling back to the venue's
/// close-position call when the lot-floored size is below the minimum.
async fn close_side(
    ctx: &PolicyContext<'_>,
    side: PosSide,
    pos: &SidePosition,
    spec: &InstrumentSpec,
) -> Result<bool, EngineError> {
    let size = floor_size(pos.quantity, spec.lot_size);
    if size.is_positive() && size >= spec.min_size {
        let result = ctx
            .router
            .place_market(MarketIntent::reduce(side, size, OrderTag::TakeProfit))
            .await;
        return Ok(skip_rejected(result, "tp.close")?.is_some_and(|s| s.is_placed()));
    }
    ctx.router.close_position(side).await?;
    Ok(true)
}
