//! Risk guard: margin-ratio and liquidation-distance hysteresis, OR-combined
//! into one pause flag for DCA and trend adds.
//!
//! Each guard clears only its own flag, so neither can resume a pause the
//! other still holds.

use super::events::{self, EventLog};
use crate::domain::{Decimal, OrderTag, PerSide, PosSide, PositionSnapshot, TimeMs};
use crate::gateway::{GatewayError, OrderRouter};
use crate::tuning::Tuning;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConfig {
    /// Basis points.
    pub margin_stop: Decimal,
    pub margin_resume: Decimal,
    pub margin_check_sec: i64,
    pub liq_stop_usd: Decimal,
    pub liq_resume_usd: Decimal,
}

impl RiskConfig {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            margin_stop: t.margin_stop_pct,
            margin_resume: t.margin_resume_pct,
            margin_check_sec: t.margin_check_sec,
            liq_stop_usd: t.liqpx_stop_usd,
            liq_resume_usd: t.liqpx_resume_usd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardTransition {
    Paused,
    Resumed,
}

/// Result of one margin sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginOutcome {
    pub transition: Option<GuardTransition>,
    /// Risk-tagged orders must be cancelled. True on every sample at or
    /// below the stop threshold.
    pub cancel: bool,
}

/// Result of one liquidation-distance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub transition: Option<GuardTransition>,
    /// Sides at a loss when the pause was entered.
    pub losing_sides: Vec<PosSide>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskStatus {
    pub paused: bool,
    pub margin_paused: bool,
    pub liq_paused: bool,
    pub last_margin_ratio_bp: Option<Decimal>,
    pub liq_distance: PerSide<Option<Decimal>>,
}

#[derive(Debug)]
pub struct RiskGuard {
    cfg: RiskConfig,
    margin_paused: bool,
    liq_paused: bool,
    last_margin_ratio: Option<Decimal>,
    last_margin_check: Option<TimeMs>,
    liq_distance: PerSide<Option<Decimal>>,
    events: EventLog,
}

impl RiskGuard {
    pub fn new(cfg: RiskConfig, events: EventLog) -> Self {
        Self {
            cfg,
            margin_paused: false,
            liq_paused: false,
            last_margin_ratio: None,
            last_margin_check: None,
            liq_distance: PerSide::default(),
            events,
        }
    }

    pub fn set_config(&mut self, cfg: RiskConfig) {
        self.cfg = cfg;
    }

    /// Non-grid order flow is blocked.
    pub fn paused(&self) -> bool {
        self.margin_paused || self.liq_paused
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            paused: self.paused(),
            margin_paused: self.margin_paused,
            liq_paused: self.liq_paused,
            last_margin_ratio_bp: self.last_margin_ratio,
            liq_distance: self.liq_distance,
        }
    }

    /// Feed one margin-ratio sample in basis points. `None` (no side reports
    /// a ratio) counts as healthy.
    pub fn observe_margin(&mut self, ratio_bp: Option<Decimal>) -> MarginOutcome {
        self.last_margin_ratio = ratio_bp;
        let Some(ratio) = ratio_bp else {
            return self.margin_healthy();
        };
        if ratio <= self.cfg.margin_stop {
            let transition = (!self.margin_paused).then_some(GuardTransition::Paused);
            self.margin_paused = true;
            return MarginOutcome {
                transition,
                cancel: true,
            };
        }
        if self.margin_paused && ratio >= self.cfg.margin_resume {
            return self.margin_healthy();
        }
        MarginOutcome {
            transition: None,
            cancel: false,
        }
    }

    fn margin_healthy(&mut self) -> MarginOutcome {
        let transition = self.margin_paused.then_some(GuardTransition::Resumed);
        self.margin_paused = false;
        MarginOutcome {
            transition,
            cancel: false,
        }
    }

    /// Check liquidation distances at `price`. Pause when any open side is
    /// within the stop distance; resume only when every open side is at
    /// least the resume distance away.
    pub fn observe_liquidation(
        &mut self,
        positions: &PositionSnapshot,
        price: Decimal,
    ) -> LiquidationOutcome {
        self.liq_distance = positions.map(|_, p| p.liquidation_distance(price));
        let distances: Vec<Option<Decimal>> = PosSide::BOTH
            .iter()
            .map(|s| self.liq_distance[*s])
            .collect();
        let too_close = distances
            .iter()
            .flatten()
            .any(|d| *d <= self.cfg.liq_stop_usd);
        let safe = distances
            .iter()
            .flatten()
            .all(|d| *d >= self.cfg.liq_resume_usd);

        if too_close {
            if !self.liq_paused {
                self.liq_paused = true;
                return LiquidationOutcome {
                    transition: Some(GuardTransition::Paused),
                    losing_sides: positions.losing_sides(),
                };
            }
        } else if self.liq_paused && safe {
            self.liq_paused = false;
            return LiquidationOutcome {
                transition: Some(GuardTransition::Resumed),
                losing_sides: Vec::new(),
            };
        }
        LiquidationOutcome {
            transition: None,
            losing_sides: Vec::new(),
        }
    }

    fn margin_check_due(&self, now: TimeMs) -> bool {
        let interval_ms = self.cfg.margin_check_sec.max(1) * 1000;
        self.last_margin_check
            .map_or(true, |last| now.since(last) >= interval_ms)
    }

    /// Run both guards against a fresh position snapshot and cancel as
    /// required. Cancel failures are logged; the flags still change, and
    /// the margin guard cancels again on its next sample.
    pub async fn refresh(
        &mut self,
        router: &OrderRouter,
        positions: &PositionSnapshot,
        mid: Decimal,
        now: TimeMs,
    ) -> Result<(), GatewayError> {
        if self.margin_check_due(now) {
            self.last_margin_check = Some(now);
            let ratio = positions.min_margin_ratio_bp();
            let outcome = self.observe_margin(ratio);
            match outcome.transition {
                Some(GuardTransition::Paused) => {
                    error!(
                        ratio_bp = ?ratio,
                        stop = %self.cfg.margin_stop,
                        "Margin ratio at or below stop, pausing adds"
                    );
                    self.events.emit(
                        events::RISK_MARGIN_PAUSE,
                        json!({ "ratio_bp": ratio, "stop": self.cfg.margin_stop }),
                    );
                }
                Some(GuardTransition::Resumed) => {
                    warn!(ratio_bp = ?ratio, "Margin ratio recovered, resuming adds");
                    self.events.emit(
                        events::RISK_MARGIN_RESUME,
                        json!({ "ratio_bp": ratio, "resume": self.cfg.margin_resume }),
                    );
                }
                None => {}
            }
            if outcome.cancel {
                cancel_logged(router.cancel_by_tags(&OrderTag::RISK_SENSITIVE).await);
            }
        }

        if !mid.is_positive() {
            return Ok(());
        }
        let outcome = self.observe_liquidation(positions, mid);
        match outcome.transition {
            Some(GuardTransition::Paused) => {
                error!(
                    stop_usd = %self.cfg.liq_stop_usd,
                    "Price within liquidation stop distance, pausing adds"
                );
                self.events.emit(
                    events::RISK_LIQ_PAUSE,
                    json!({
                        "distance": self.liq_distance,
                        "stop": self.cfg.liq_stop_usd,
                        "losing_sides": outcome.losing_sides,
                    }),
                );
                cancel_logged(router.cancel_by_tags(&OrderTag::RISK_SENSITIVE).await);
                for side in &outcome.losing_sides {
                    cancel_logged(
                        router
                            .cancel_by_tags_and_side(&OrderTag::RISK_SENSITIVE, *side)
                            .await,
                    );
                }
            }
            Some(GuardTransition::Resumed) => {
                warn!("Liquidation distance recovered, resuming adds");
                self.events.emit(
                    events::RISK_LIQ_RESUME,
                    json!({ "distance": self.liq_distance, "resume": self.cfg.liq_resume_usd }),
                );
            }
            None => {}
        }
        Ok(())
    }
}

fn cancel_logged(result: Result<usize, GatewayError>) {
    if let Err(e) = result {
        warn!(error = %e, "Risk cancel sweep failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SidePosition;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn guard() -> RiskGuard {
        RiskGuard::new(RiskConfig::from_tuning(&Tuning::default()), EventLog::default())
    }

    fn open(liq: i64, upl: i64) -> SidePosition {
        SidePosition {
            quantity: d(1),
            avg_price: d(2000),
            liquidation_price: d(liq),
            unrealized_pnl: d(upl),
            margin_ratio: None,
        }
    }

    #[test]
    fn test_margin_hysteresis_sequence() {
        let mut g = guard();
        let states: Vec<bool> = [1300, 900, 950, 1250]
            .into_iter()
            .map(|r| {
                g.observe_margin(Some(d(r)));
                g.paused()
            })
            .collect();
        assert_eq!(states, vec![false, true, true, false]);
    }

    #[test]
    fn test_margin_cancels_on_every_breach_sample() {
        let mut g = guard();
        let first = g.observe_margin(Some(d(900)));
        assert_eq!(first.transition, Some(GuardTransition::Paused));
        assert!(first.cancel);
        let again = g.observe_margin(Some(d(800)));
        assert_eq!(again.transition, None);
        assert!(again.cancel);
        let between = g.observe_margin(Some(d(1100)));
        assert!(!between.cancel);
        assert!(g.paused());
    }

    #[test]
    fn test_missing_margin_ratio_is_healthy() {
        let mut g = guard();
        g.observe_margin(Some(d(900)));
        let outcome = g.observe_margin(None);
        assert_eq!(outcome.transition, Some(GuardTransition::Resumed));
        assert!(!g.paused());
    }

    #[test]
    fn test_liquidation_pause_and_resume() {
        let mut g = guard();
        let mut snap = PositionSnapshot::default();
        snap.long = open(1950, -5);

        // 50 away: inside the 80 stop.
        let outcome = g.observe_liquidation(&snap, d(2000));
        assert_eq!(outcome.transition, Some(GuardTransition::Paused));
        assert_eq!(outcome.losing_sides, vec![PosSide::Long]);

        // 100 away: outside stop, inside resume.
        assert_eq!(g.observe_liquidation(&snap, d(2050)).transition, None);
        assert!(g.paused());

        // 150 away.
        let outcome = g.observe_liquidation(&snap, d(2100));
        assert_eq!(outcome.transition, Some(GuardTransition::Resumed));
        assert!(!g.paused());
    }

    #[test]
    fn test_resume_requires_all_sides_safe() {
        let mut g = guard();
        let mut snap = PositionSnapshot::default();
        snap.long = open(1950, 0);
        snap.short = open(2100, 0);
        g.observe_liquidation(&snap, d(2000));
        assert!(g.paused());

        // Long far away, short still 100 away.
        snap.long = open(1500, 0);
        assert_eq!(g.observe_liquidation(&snap, d(2000)).transition, None);
        assert!(g.paused());
    }

    #[test]
    fn test_guards_do_not_clear_each_other() {
        let mut g = guard();
        g.observe_margin(Some(d(900)));
        let mut snap = PositionSnapshot::default();
        snap.long = open(1950, 0);
        g.observe_liquidation(&snap, d(2000));
        snap.long = open(1000, 0);
        g.observe_liquidation(&snap, d(2000));
        assert!(!g.status().liq_paused);
        assert!(g.paused());
    }
}
