//! Signal source computed from exchange candles on three timeframes.

use super::indicators::{
    last_or_zero, macd_hist_default, momentum_ok, two_bars_same_sign, volume_resonance, vwap,
    zero_cross_at, Cross,
};
use super::{MomentumGate, Resonance, SignalError, SignalParams, SignalSource};
use crate::domain::{Bar, Candle, InstId, PosSide};
use crate::gateway::ExchangeGateway;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Histograms and VWAP for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Frames {
    pub hist_1m: Vec<f64>,
    pub hist_5m: Vec<f64>,
    pub hist_15m: Vec<f64>,
    pub vwap: f64,
    pub last: f64,
    pub volumes_1m: Vec<f64>,
}

impl Frames {
    pub fn from_candles(c1: &[Candle], c5: &[Candle], c15: &[Candle]) -> Self {
        let closes = |c: &[Candle]| c.iter().map(|k| k.close).collect::<Vec<_>>();
        let vwap_px = vwap(c1);
        Self {
            hist_1m: macd_hist_default(&closes(c1)),
            hist_5m: macd_hist_default(&closes(c5)),
            hist_15m: macd_hist_default(&closes(c15)),
            vwap: vwap_px,
            last: c1.last().map(|c| c.close).unwrap_or(vwap_px),
            volumes_1m: c1.iter().map(|c| c.volume).collect(),
        }
    }

    pub fn resonance(&self) -> Resonance {
        let (h1, h5, h15) = (
            last_or_zero(&self.hist_1m),
            last_or_zero(&self.hist_5m),
            last_or_zero(&self.hist_15m),
        );
        let (vol_bull, vol_bear) = volume_resonance(&self.volumes_1m);
        Resonance {
            bull: h1 > 0.0 && h5 > 0.0 && h15 > 0.0 && self.last >= self.vwap,
            bear: h1 < 0.0 && h5 < 0.0 && h15 < 0.0 && self.last <= self.vwap,
            vol_bull,
            vol_bear,
            vwap: self.vwap,
            last: self.last,
        }
    }

    /// 1m zero-line cross toward `side`, price on the matching side of VWAP,
    /// 5m and 15m not both opposing, and the momentum gate.
    ///
    /// With two-bar persistence the cross must sit one bar back and the last
    /// bar must hold the new sign.
    pub fn dca_reverse(&self, side: PosSide, gate: &MomentumGate) -> bool {
        let hist = &self.hist_1m;
        let (want, vwap_ok, opposed) = match side {
            PosSide::Long => (
                Cross::Golden,
                self.last >= self.vwap,
                last_or_zero(&self.hist_5m) < 0.0 && last_or_zero(&self.hist_15m) < 0.0,
            ),
            PosSide::Short => (
                Cross::Death,
                self.last <= self.vwap,
                last_or_zero(&self.hist_5m) > 0.0 && last_or_zero(&self.hist_15m) > 0.0,
            ),
        };
        let crossed = if gate.require_two_bars {
            zero_cross_at(hist, hist.len().saturating_sub(1)) == Some(want)
                && two_bars_same_sign(hist, side == PosSide::Long)
        } else {
            zero_cross_at(hist, hist.len()) == Some(want)
        };
        crossed && vwap_ok && !opposed && momentum_ok(hist, gate.alpha, gate.window)
    }

    /// 1m histogram on `side`'s sign, the momentum gate, and optionally two
    /// consecutive bars on that sign.
    pub fn trend_filters(&self, side: PosSide, gate: &MomentumGate) -> bool {
        let positive = side == PosSide::Long;
        let h = last_or_zero(&self.hist_1m);
        let signed = if positive { h > 0.0 } else { h < 0.0 };
        signed
            && momentum_ok(&self.hist_1m, gate.alpha, gate.window)
            && (!gate.require_two_bars || two_bars_same_sign(&self.hist_1m, positive))
    }
}

/// Candle-backed signal source with a short per-bar cache, so one signal
/// pass reads each timeframe once.
#[derive(Debug)]
pub struct CandleSignalSource {
    gateway: Arc<dyn ExchangeGateway>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<Bar, (Instant, Vec<Candle>)>>,
}

impl CandleSignalSource {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, cache_ttl: Duration) -> Self {
        Self {
            gateway,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn series(
        &self,
        inst: &InstId,
        bar: Bar,
        limit: usize,
    ) -> Result<Vec<Candle>, SignalError> {
        let mut cache = self.cache.lock().await;
        if let Some((at, candles)) = cache.get(&bar) {
            if at.elapsed() < self.cache_ttl && candles.len() >= limit.min(candles.len()) {
                return Ok(candles.clone());
            }
        }
        let candles = self.gateway.candles(inst, bar, limit).await?;
        debug!(bar = %bar, count = candles.len(), "Fetched candles");
        cache.insert(bar, (Instant::now(), candles.clone()));
        Ok(candles)
    }

    async fn frames(&self, inst: &InstId, params: &SignalParams) -> Result<Frames, SignalError> {
        let limit = params.candle_limit.max(1);
        let c1 = self.series(inst, Bar::M1, limit).await?;
        if c1.len() < 2 {
            return Err(SignalError::InsufficientData {
                bar: Bar::M1,
                have: c1.len(),
                need: 2,
            });
        }
        let c5 = self.series(inst, Bar::M5, limit).await?;
        let c15 = self.series(inst, Bar::M15, limit).await?;
        Ok(Frames::from_candles(&c1, &c5, &c15))
    }
}

#[async_trait]
impl SignalSource for CandleSignalSource {
    async fn resonance(
        &self,
        inst: &InstId,
        params: &SignalParams,
    ) -> Result<Resonance, SignalError> {
        Ok(self.frames(inst, params).await?.resonance())
    }

    async fn dca_reverse_signal(
        &self,
        inst: &InstId,
        side: PosSide,
        params: &SignalParams,
    ) -> Result<bool, SignalError> {
        Ok(self.frames(inst, params).await?.dca_reverse(side, &params.dca))
    }

    async fn trend_filters_ok(
        &self,
        inst: &InstId,
        side: PosSide,
        params: &SignalParams,
    ) -> Result<bool, SignalError> {
        Ok(self
            .frames(inst, params)
            .await?
            .trend_filters(side, &params.trend))
    }
}
