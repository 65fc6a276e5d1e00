//! The single control task: startup, the tick pipeline, hot tuning and the
//! shutdown drain.
//!
//! Phases run strictly in order and every exchange call is awaited before
//! the next. A transient failure aborts the rest of the tick; the next tick
//! starts over from fresh exchange state.

use super::status::StatusHandle;
use crate::domain::{Decimal, InstId, PosSide, PositionSnapshot, PriceRef, TimeMs};
use crate::engine::dca::DcaConfig;
use crate::engine::events::{self, EventLog};
use crate::engine::risk::RiskConfig;
use crate::engine::take_profit::TakeProfitConfig;
use crate::engine::trend::TrendConfig;
use crate::engine::{
    sizing, DcaWindow, EngineError, LadderConfig, LadderEngine, PolicyContext, RepairReport,
    RiskGuard, Sizes, TakeProfitTrailer, TrendThrottle,
};
use crate::gateway::{ClientIdGenerator, ExchangeGateway, OrderRouter};
use crate::signals::{Resonance, SignalSource};
use crate::tuning::{Tuning, TuningFile};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct ControlLoop {
    router: OrderRouter,
    signals: Arc<dyn SignalSource>,
    tuning: Tuning,
    tuning_file: Option<TuningFile>,
    price: PriceRef,
    ladder: LadderEngine,
    guard: RiskGuard,
    dca: DcaWindow,
    trend: TrendThrottle,
    take_profit: TakeProfitTrailer,
    sizes: Sizes,
    last_rebuild: Option<TimeMs>,
    last_signal_pass: Option<TimeMs>,
    last_summary: Option<TimeMs>,
    sweep_interval: Duration,
    ticks: u64,
    events: EventLog,
    status: StatusHandle,
}

impl ControlLoop {
    /// Load the instrument and wire the engines. Fails on an unusable
    /// instrument or tuning snapshot.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        gateway: Arc<dyn ExchangeGateway>,
        signals: Arc<dyn SignalSource>,
        inst: InstId,
        td_mode: &str,
        ids: ClientIdGenerator,
        tuning: Tuning,
        events: EventLog,
        status: StatusHandle,
    ) -> Result<Self, EngineError> {
        tuning.validate()?;
        let spec = gateway.instrument(&inst).await?;
        spec.validate().map_err(EngineError::Instrument)?;
        info!(
            inst = %inst,
            tick = %spec.tick_size,
            lot = %spec.lot_size,
            min = %spec.min_size,
            ct_val = %spec.contract_value,
            "Instrument loaded"
        );

        let mut router = OrderRouter::new(gateway, inst.clone(), td_mode, spec, ids);
        router.set_maker(tuning.maker());
        status.update(|s| s.inst_id = inst.to_string());

        Ok(Self {
            router,
            signals,
            price: PriceRef::new(spec),
            ladder: LadderEngine::new(LadderConfig::from_tuning(&tuning), events.clone()),
            guard: RiskGuard::new(RiskConfig::from_tuning(&tuning), events.clone()),
            dca: DcaWindow::new(DcaConfig::from_tuning(&tuning), events.clone()),
            trend: TrendThrottle::new(TrendConfig::from_tuning(&tuning), events.clone()),
            take_profit: TakeProfitTrailer::new(
                TakeProfitConfig::from_tuning(&tuning),
                events.clone(),
            ),
            tuning,
            tuning_file: None,
            sizes: Sizes::default(),
            last_rebuild: None,
            last_signal_pass: None,
            last_summary: None,
            sweep_interval: Duration::from_secs(1),
            ticks: 0,
            events,
            status,
        })
    }

    /// Poll this file for changes at the start of every tick.
    pub fn with_tuning_file(mut self, file: TuningFile) -> Self {
        self.tuning_file = Some(file);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn router(&self) -> &OrderRouter {
        &self.router
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn ladder(&self) -> &LadderEngine {
        &self.ladder
    }

    pub fn guard(&self) -> &RiskGuard {
        &self.guard
    }

    pub fn dca(&self) -> &DcaWindow {
        &self.dca
    }

    pub fn trend(&self) -> &TrendThrottle {
        &self.trend
    }

    pub fn take_profit(&self) -> &TakeProfitTrailer {
        &self.take_profit
    }

    pub fn sizes(&self) -> Sizes {
        self.sizes
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    async fn refresh_mid(&mut self) -> Result<Decimal, EngineError> {
        let ticker = self.router.gateway().ticker(self.router.inst()).await?;
        let mid = self.price.update(&ticker);
        if !mid.is_positive() {
            return Err(EngineError::NoPrice(self.router.inst().to_string()));
        }
        Ok(mid)
    }

    async fn fetch_positions(&self) -> Result<PositionSnapshot, EngineError> {
        Ok(self
            .router
            .gateway()
            .positions(self.router.inst())
            .await?)
    }

    /// Cancel everything, build and place the ladder at the current mid, and
    /// adopt any existing position.
    pub async fn startup(&mut self, now: TimeMs) -> Result<(), EngineError> {
        let cancelled = self.router.cancel_all().await?;
        info!(cancelled, "Startup cancel-all");
        self.events
            .emit(events::CANCEL_ALL_STARTUP, json!({ "cancelled": cancelled }));

        let mid = self.refresh_mid().await?;
        self.sizes = sizing::compute(&self.tuning, self.router.spec(), mid);
        self.ladder.rebuild(mid, self.sizes.grid);
        self.last_rebuild = Some(now);
        self.ladder.place_all(&self.router).await?;

        let positions = self.fetch_positions().await?;
        self.dca.takeover(&positions, mid);
        self.status.update(|s| {
            s.started_at = Some(now);
            s.mid = mid;
            s.positions = positions;
        });
        Ok(())
    }

    /// One pass of the pipeline.
    pub async fn tick(&mut self, now: TimeMs) -> Result<RepairReport, EngineError> {
        self.poll_tuning(now).await?;

        let mid = self.refresh_mid().await?;
        let positions = self.fetch_positions().await?;
        self.guard
            .refresh(&self.router, &positions, mid, now)
            .await?;

        let report = self
            .ladder
            .place_missing(&self.router, mid, &positions, self.dca.paused_sides(), now)
            .await?;
        self.ladder.side_live_counts(&self.router).await?;
        self.rebuild_if_one_sided(mid, now).await?;

        let signal_due = self.last_signal_pass.map_or(true, |last| {
            now.since(last) >= self.tuning.signal_refresh_sec * 1000
        });
        let mut resonance = None;
        if signal_due {
            resonance = Some(self.signal_pass(&positions, mid, now).await?);
            self.last_signal_pass = Some(now);
        }

        self.ticks += 1;
        self.log_summary_if_due(now, &positions);
        self.publish(now, mid, positions, report, resonance);
        Ok(report)
    }

    /// Periodic grid health line. Returns whether it was written.
    fn log_summary_if_due(&mut self, now: TimeMs, positions: &PositionSnapshot) -> bool {
        let every = self.tuning.log_summary_every_sec;
        if every <= 0 {
            return false;
        }
        if self
            .last_summary
            .is_some_and(|last| now.since(last) < every * 1000)
        {
            return false;
        }
        let (live_buy, live_sell) = self.ladder.live_counts();
        info!(
            center = %self.ladder.center(),
            live_buy,
            live_sell,
            long_qty = %positions.long.quantity,
            short_qty = %positions.short.quantity,
            paused = self.guard.paused(),
            dca_long = self.dca.is_active(PosSide::Long),
            dca_short = self.dca.is_active(PosSide::Short),
            ticks = self.ticks,
            "Grid health summary"
        );
        self.last_summary = Some(now);
        true
    }

    async fn rebuild_if_one_sided(&mut self, mid: Decimal, now: TimeMs) -> Result<(), EngineError> {
        let Some(side) = self.ladder.consumed_side() else {
            return Ok(());
        };
        // A DCA window pulled that side on purpose.
        if self.dca.is_active(side) {
            return Ok(());
        }
        let cooled = self.last_rebuild.map_or(true, |last| {
            now.since(last) >= self.tuning.rebuild_cooldown_sec * 1000
        });
        if !cooled {
            return Ok(());
        }
        info!(mid = %mid, side = %side, "One side consumed, recentering ladder");
        self.ladder.cancel_grid(&self.router).await?;
        self.ladder.rebuild(mid, self.sizes.grid);
        self.last_rebuild = Some(now);
        self.ladder.place_all(&self.router).await?;
        Ok(())
    }

    async fn signal_pass(
        &mut self,
        positions: &PositionSnapshot,
        mid: Decimal,
        now: TimeMs,
    ) -> Result<Resonance, EngineError> {
        let params = self.tuning.signal_params();
        let resonance = match self.signals.resonance(self.router.inst(), &params).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Resonance unavailable, treating as no trend");
                Resonance::default()
            }
        };
        self.dca.update_first_entry(positions, mid);

        let ctx = PolicyContext {
            router: &self.router,
            signals: self.signals.as_ref(),
            params,
            positions,
            mid,
            guard_paused: self.guard.paused(),
            now,
        };
        self.dca.run(&ctx).await?;
        self.trend
            .run(&ctx, &resonance, self.dca.paused_sides(), self.sizes.trend)
            .await?;
        self.take_profit
            .run(&ctx, &resonance, &mut self.trend)
            .await?;
        Ok(resonance)
    }

    async fn poll_tuning(&mut self, now: TimeMs) -> Result<(), EngineError> {
        let Some(file) = self.tuning_file.as_mut() else {
            return Ok(());
        };
        match file.poll() {
            None => Ok(()),
            Some(Ok(next)) if next == self.tuning => Ok(()),
            Some(Ok(next)) => self.apply_tuning(next, now).await,
            Some(Err(e)) => {
                warn!(error = %e, "Tuning reload rejected, keeping current snapshot");
                Ok(())
            }
        }
    }

    /// Swap in a new tuning snapshot. A changed ladder shape cancels and
    /// rebuilds the grid at the current mid; placement waits while the
    /// guard is paused. Sizes are recomputed on every apply.
    pub async fn apply_tuning(&mut self, next: Tuning, now: TimeMs) -> Result<(), EngineError> {
        if let Err(e) = next.validate() {
            warn!(error = %e, "Tuning rejected, keeping current snapshot");
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.tuning, next);
        let shape_changed = self.tuning.ladder_shape_changed(&previous);

        self.ladder.set_config(LadderConfig::from_tuning(&self.tuning));
        self.guard.set_config(RiskConfig::from_tuning(&self.tuning));
        self.dca.set_config(DcaConfig::from_tuning(&self.tuning));
        self.trend.set_config(TrendConfig::from_tuning(&self.tuning));
        self.take_profit
            .set_config(TakeProfitConfig::from_tuning(&self.tuning));
        self.router.set_maker(self.tuning.maker());
        let mid = self.price.mid;
        self.sizes = sizing::compute(&self.tuning, self.router.spec(), mid);

        if shape_changed {
            self.ladder.cancel_grid(&self.router).await?;
            if mid.is_positive() {
                self.ladder.rebuild(mid, self.sizes.grid);
                self.last_rebuild = Some(now);
                if !self.guard.paused() {
                    self.ladder.place_all(&self.router).await?;
                }
            }
        }

        info!(shape_changed, "Tuning applied");
        self.events.emit(
            events::TUNING_APPLIED,
            json!({
                "shape_changed": shape_changed,
                "grid_step_usd": self.tuning.grid_step_usd,
                "grid_levels_per_side": self.tuning.grid_levels_per_side,
                "risk_profile": self.tuning.risk_profile,
            }),
        );
        Ok(())
    }

    /// Bounded cancel-all drain. Returns true when no orders remain.
    pub async fn shutdown(&mut self) -> bool {
        self.events.emit(events::CANCEL_ALL_EXIT, json!({}));
        for sweep in 1..=self.tuning.shutdown_cancel_sweeps.max(1) {
            if let Err(e) = self.router.cancel_all().await {
                warn!(sweep, error = %e, "Shutdown cancel sweep failed");
            }
            tokio::time::sleep(self.sweep_interval).await;
            match self.router.open_orders().await {
                Ok(orders) if orders.is_empty() => {
                    info!(sweep, "All orders cancelled");
                    return true;
                }
                Ok(orders) => warn!(sweep, remaining = orders.len(), "Orders still open"),
                Err(e) => warn!(sweep, error = %e, "Open order check failed"),
            }
        }
        error!("Shutdown drain exhausted with orders possibly still open");
        false
    }

    /// Startup, then ticks until `stop` resolves or a fatal error occurs,
    /// then the drain. `stop` is only observed between ticks.
    pub async fn run<F>(&mut self, stop: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        if let Err(e) = self.startup(TimeMs::now()).await {
            self.shutdown().await;
            return Err(e);
        }
        let tick_every = Duration::from_secs(self.tuning.tick_refresh_sec.max(1));
        loop {
            match self.tick(TimeMs::now()).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error, stopping");
                    self.status.update(|s| s.last_error = Some(e.to_string()));
                    self.shutdown().await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Tick aborted, retrying next tick");
                    self.status.update(|s| s.last_error = Some(e.to_string()));
                }
            }
            tokio::select! {
                _ = &mut stop => {
                    info!("Stop requested");
                    break;
                }
                _ = tokio::time::sleep(tick_every) => {}
            }
        }
        self.shutdown().await;
        Ok(())
    }

    fn publish(
        &self,
        now: TimeMs,
        mid: Decimal,
        positions: PositionSnapshot,
        report: RepairReport,
        resonance: Option<Resonance>,
    ) {
        let ladder = self.ladder.status();
        let risk = self.guard.status();
        let dca = self.dca.state();
        let trend = self.trend.state();
        let take_profit = self.take_profit.state();
        let sizes = self.sizes;
        let ticks = self.ticks;
        self.status.update(|s| {
            s.ready = true;
            s.last_tick_at = Some(now);
            s.ticks = ticks;
            s.mid = mid;
            s.sizes = sizes;
            s.positions = positions;
            s.ladder = Some(ladder);
            s.last_repair = report;
            s.risk = Some(risk);
            s.dca = dca;
            s.trend = trend;
            s.take_profit = take_profit;
            if resonance.is_some() {
                s.resonance = resonance;
            }
            s.last_error = None;
        });
    }
}
