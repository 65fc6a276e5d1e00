//! Ladder engine: target price levels around a center and the repair pass
//! that keeps them resting on the exchange without runaway reposting.
//!
//! Liveness, missing timers and repost windows are all keyed by the
//! effective price, computed through the router so that generation and
//! reconciliation can never disagree.

use super::events::{self, EventLog};
use crate::domain::{Decimal, OrderTag, PerSide, PosSide, PositionSnapshot, Side, TimeMs};
use crate::gateway::{GatewayError, LimitIntent, OrderRouter, Submission};
use crate::tuning::Tuning;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderConfig {
    pub step: Decimal,
    pub levels: u32,
    pub repost_ttl_sec: i64,
    pub max_reposts_per_window: u32,
    pub far_steps: u32,
    pub flat_edge_window_sec: i64,
    pub flat_edge_resets_repost_window: bool,
}

impl LadderConfig {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            step: t.grid_step_usd,
            levels: t.grid_levels_per_side,
            repost_ttl_sec: t.repost_ttl_sec,
            max_reposts_per_window: t.max_reposts_per_window,
            far_steps: t.far_steps,
            flat_edge_window_sec: t.flat_edge_window_sec,
            flat_edge_resets_repost_window: t.flat_edge_resets_repost_window,
        }
    }
}

/// One rung of the ladder. Immutable within a rebuild epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    pub side: Side,
    pub raw_price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    /// Hedge-mode position side this level opens.
    pub fn pos_side(&self) -> PosSide {
        self.side.opening_pos_side()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RepostWindow {
    start: TimeMs,
    count: u32,
}

/// What one repair pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Ladder levels found live at the start of the pass.
    pub live: usize,
    pub flat_edge_placed: usize,
    pub reposted: usize,
    /// Missing but waiting for a missing neighbor or the TTL.
    pub deferred: usize,
    /// Missing but the repost window is exhausted.
    pub throttled: usize,
    /// Missing on a side paused by a DCA window.
    pub paused: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LadderStatus {
    pub center: Decimal,
    pub step: Decimal,
    pub levels_per_side: u32,
    pub buy_prices: Vec<Decimal>,
    pub sell_prices: Vec<Decimal>,
    pub live_buy: usize,
    pub live_sell: usize,
    pub missing_tracked: usize,
    pub repost_tracked: usize,
    pub had_full_live: bool,
}

#[derive(Debug)]
pub struct LadderEngine {
    cfg: LadderConfig,
    center: Decimal,
    levels: Vec<PriceLevel>,
    missing_since: HashMap<Decimal, TimeMs>,
    repost: HashMap<Decimal, RepostWindow>,
    last_qty: PerSide<Decimal>,
    flat_at: PerSide<Option<TimeMs>>,
    live_counts: (usize, usize),
    had_full_live: bool,
    events: EventLog,
}

impl LadderEngine {
    pub fn new(cfg: LadderConfig, events: EventLog) -> Self {
        Self {
            cfg,
            center: Decimal::zero(),
            levels: Vec::new(),
            missing_since: HashMap::new(),
            repost: HashMap::new(),
            last_qty: PerSide::default(),
            flat_at: PerSide::default(),
            live_counts: (0, 0),
            had_full_live: false,
            events,
        }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.cfg
    }

    /// Takes effect for repair immediately; the shape only on the next
    /// rebuild.
    pub fn set_config(&mut self, cfg: LadderConfig) {
        self.cfg = cfg;
    }

    pub fn center(&self) -> Decimal {
        self.center
    }

    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    /// Discard the ladder and generate `levels` buys below and `levels`
    /// sells above `center`. Orders are not touched.
    pub fn rebuild(&mut self, center: Decimal, sizes: PerSide<Decimal>) {
        self.center = center;
        self.levels.clear();
        let step = self.cfg.step;
        for i in 1..=self.cfg.levels {
            let offset = step * Decimal::from(i);
            let buy = center - offset;
            if buy.is_positive() {
                self.levels.push(PriceLevel {
                    side: Side::Buy,
                    raw_price: buy,
                    size: sizes.long,
                });
            } else {
                debug!(price = %buy, "Skipping non-positive buy level");
            }
            self.levels.push(PriceLevel {
                side: Side::Sell,
                raw_price: center + offset,
                size: sizes.short,
            });
        }
        self.levels.sort_by(|a, b| {
            (a.side, a.raw_price).cmp(&(b.side, b.raw_price))
        });

        info!(center = %center, step = %step, levels = self.cfg.levels, "Ladder rebuilt");
        self.events.emit(
            events::GRID_REBUILD,
            json!({
                "center": center,
                "step": step,
                "levels": self.cfg.levels,
            }),
        );
    }

    /// Submit every level whose effective price is not live.
    pub async fn place_all(&self, router: &OrderRouter) -> Result<usize, GatewayError> {
        let live = router.live_prices(OrderTag::Grid).await?;
        let mut placed = 0;
        for level in self.levels.clone() {
            if live.contains(&router.effective_price(level.side, level.raw_price)) {
                continue;
            }
            if self.post(router, level).await {
                placed += 1;
            }
        }
        if placed > 0 {
            info!(placed, "Placed ladder");
            self.events
                .emit(events::GRID_PLACE_ALL, json!({ "placed": placed }));
        }
        Ok(placed)
    }

    /// Cancel every grid-tagged order.
    pub async fn cancel_grid(&self, router: &OrderRouter) -> Result<usize, GatewayError> {
        let count = router.cancel_by_tag(OrderTag::Grid).await?;
        if count > 0 {
            info!(count, "Cancelled grid orders");
            self.events
                .emit(events::GRID_CANCEL_ALL, json!({ "count": count }));
        }
        Ok(count)
    }

    /// The repair pass, run every tick.
    ///
    /// A failed open-order query returns before any state is touched. A
    /// failed submission for one level is logged and left to the next
    /// qualifying repost.
    pub async fn place_missing(
        &mut self,
        router: &OrderRouter,
        mid: Decimal,
        positions: &PositionSnapshot,
        paused: PerSide<bool>,
        now: TimeMs,
    ) -> Result<RepairReport, GatewayError> {
        let live = router.live_prices(OrderTag::Grid).await?;
        let mut report = RepairReport::default();
        self.observe_positions(positions, now);

        // Flat edge: a side that just went flat gets every missing level
        // back without any gating.
        let mut flat_placed: HashSet<Decimal> = HashSet::new();
        let window_ms = self.cfg.flat_edge_window_sec * 1000;
        for side in PosSide::BOTH {
            let Some(flat_at) = self.flat_at[side] else {
                continue;
            };
            if now.since(flat_at) > window_ms {
                continue;
            }
            for level in self.side_levels(side) {
                let px = router.effective_price(level.side, level.raw_price);
                if live.contains(&px) {
                    continue;
                }
                if self.post(router, level).await {
                    self.missing_since.remove(&px);
                    if self.cfg.flat_edge_resets_repost_window {
                        self.repost.remove(&px);
                    }
                    flat_placed.insert(px);
                }
            }
        }
        report.flat_edge_placed = flat_placed.len();
        if !flat_placed.is_empty() {
            info!(placed = flat_placed.len(), "Reposted flattened side");
            self.events.emit(
                events::REARM_SIDE_FLAT,
                json!({ "placed": flat_placed.len() }),
            );
        }

        self.reset_far_away(mid);

        let ladder: Vec<Decimal> = self
            .levels
            .iter()
            .map(|l| router.effective_price(l.side, l.raw_price))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let ttl_ms = self.cfg.repost_ttl_sec * 1000;

        for level in self.levels.clone() {
            let px = router.effective_price(level.side, level.raw_price);
            if live.contains(&px) {
                report.live += 1;
                self.missing_since.remove(&px);
                continue;
            }
            if flat_placed.contains(&px) {
                continue;
            }
            let first_missing = *self.missing_since.entry(px).or_insert(now);
            if paused[level.pos_side()] {
                report.paused += 1;
                continue;
            }

            let by_neighbor = neighbor_missing(&ladder, &live, px);
            let by_ttl = now.since(first_missing) >= ttl_ms;
            if !(by_neighbor || by_ttl) {
                report.deferred += 1;
                continue;
            }
            if !self.take_repost_slot(px, now) {
                debug!(price = %px, "Repost window exhausted");
                report.throttled += 1;
                continue;
            }
            if self.post(router, level).await {
                report.reposted += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.reposted > 0 {
            info!(placed = report.reposted, "Reposted missing levels");
            self.events
                .emit(events::REARM_DONE, json!({ "placed": report.reposted }));
        }
        Ok(report)
    }

    /// Live buy and sell level counts, fresh from the exchange. Latches
    /// `had_full_live` once both sides have been fully live.
    pub async fn side_live_counts(
        &mut self,
        router: &OrderRouter,
    ) -> Result<(usize, usize), GatewayError> {
        let live = router.live_prices(OrderTag::Grid).await?;
        let (mut total_buy, mut total_sell) = (0, 0);
        let (mut live_buy, mut live_sell) = (0, 0);
        for level in &self.levels {
            let is_live = live.contains(&router.effective_price(level.side, level.raw_price));
            match level.side {
                Side::Buy => {
                    total_buy += 1;
                    live_buy += usize::from(is_live);
                }
                Side::Sell => {
                    total_sell += 1;
                    live_sell += usize::from(is_live);
                }
            }
        }
        if total_buy > 0 && total_sell > 0 && live_buy >= total_buy && live_sell >= total_sell {
            self.had_full_live = true;
        }
        self.live_counts = (live_buy, live_sell);
        Ok(self.live_counts)
    }

    /// Counts from the last [`side_live_counts`](Self::side_live_counts).
    pub fn live_counts(&self) -> (usize, usize) {
        self.live_counts
    }

    /// The ladder was fully live at some point and one side has now been
    /// consumed while the other still rests.
    pub fn one_side_consumed(&self) -> bool {
        let (b, s) = self.live_counts;
        self.had_full_live && b + s > 0 && (b == 0 || s == 0)
    }

    /// The ladder side whose levels are all gone, when
    /// [`one_side_consumed`](Self::one_side_consumed) holds.
    pub fn consumed_side(&self) -> Option<PosSide> {
        if !self.one_side_consumed() {
            return None;
        }
        Some(if self.live_counts.0 == 0 {
            PosSide::Long
        } else {
            PosSide::Short
        })
    }

    pub fn had_full_live(&self) -> bool {
        self.had_full_live
    }

    pub fn missing_since(&self, price: Decimal) -> Option<TimeMs> {
        self.missing_since.get(&price).copied()
    }

    /// Reposts used in the current window for `price`.
    pub fn repost_count(&self, price: Decimal) -> u32 {
        self.repost.get(&price).map(|w| w.count).unwrap_or(0)
    }

    pub fn status(&self) -> LadderStatus {
        let prices = |side: Side| {
            self.levels
                .iter()
                .filter(|l| l.side == side)
                .map(|l| l.raw_price)
                .collect()
        };
        LadderStatus {
            center: self.center,
            step: self.cfg.step,
            levels_per_side: self.cfg.levels,
            buy_prices: prices(Side::Buy),
            sell_prices: prices(Side::Sell),
            live_buy: self.live_counts.0,
            live_sell: self.live_counts.1,
            missing_tracked: self.missing_since.len(),
            repost_tracked: self.repost.len(),
            had_full_live: self.had_full_live,
        }
    }

    fn side_levels(&self, side: PosSide) -> Vec<PriceLevel> {
        self.levels
            .iter()
            .filter(|l| l.pos_side() == side)
            .copied()
            .collect()
    }

    fn observe_positions(&mut self, positions: &PositionSnapshot, now: TimeMs) {
        for side in PosSide::BOTH {
            let current = positions[side].quantity;
            if self.last_qty[side].is_positive() && !current.is_positive() {
                info!(side = %side, "Position flattened");
                self.flat_at[side] = Some(now);
            }
            self.last_qty[side] = current;
        }
    }

    /// Forget the repost window and missing timer of every reposted price at
    /// least `far_steps` steps from `mid`. A level that was never reposted
    /// keeps its timer so the TTL can still expire.
    fn reset_far_away(&mut self, mid: Decimal) {
        if !mid.is_positive() {
            return;
        }
        let far = Decimal::from(self.cfg.far_steps);
        let step = self.cfg.step;
        let stale: Vec<Decimal> = self
            .repost
            .keys()
            .filter(|px| {
                (mid - **px)
                    .abs()
                    .checked_div(step)
                    .is_some_and(|steps| steps >= far)
            })
            .copied()
            .collect();
        for px in stale {
            self.missing_since.remove(&px);
            self.repost.remove(&px);
        }
    }

    fn take_repost_slot(&mut self, px: Decimal, now: TimeMs) -> bool {
        let ttl_ms = self.cfg.repost_ttl_sec * 1000;
        let mut window = self.repost.get(&px).copied().unwrap_or(RepostWindow {
            start: now,
            count: 0,
        });
        if now.since(window.start) >= ttl_ms {
            window = RepostWindow {
                start: now,
                count: 0,
            };
        }
        if window.count >= self.cfg.max_reposts_per_window {
            return false;
        }
        window.count += 1;
        self.repost.insert(px, window);
        true
    }

    async fn post(&self, router: &OrderRouter, level: PriceLevel) -> bool {
        let intent = LimitIntent {
            side: level.side,
            pos_side: level.pos_side(),
            raw_price: level.raw_price,
            size: level.size,
            tag: OrderTag::Grid,
        };
        match router.place_limit(intent).await {
            Ok(Submission::Placed { .. }) => true,
            Ok(Submission::Dropped { .. }) => false,
            Err(e) => {
                warn!(
                    side = %level.side,
                    price = %level.raw_price,
                    error = %e,
                    "Grid order failed"
                );
                false
            }
        }
    }
}

/// An adjacent rung of the unified, price-sorted ladder is also missing.
fn neighbor_missing(ladder: &[Decimal], live: &BTreeSet<Decimal>, px: Decimal) -> bool {
    let Ok(i) = ladder.binary_search(&px) else {
        return false;
    };
    let below = i.checked_sub(1).and_then(|j| ladder.get(j));
    let above = ladder.get(i + 1);
    [below, above]
        .into_iter()
        .flatten()
        .any(|neighbor| !live.contains(neighbor))
}
