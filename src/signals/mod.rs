//! Directional signals consumed by the policy state machines.
//!
//! Every call may be stale by up to the candle cache lifetime; the control
//! loop only asks on its signal cadence.

use crate::domain::{Bar, InstId, PosSide};
use crate::gateway::GatewayError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod candles;
pub mod indicators;
pub mod mock;

pub use candles::CandleSignalSource;
pub use mock::ScriptedSignals;

/// Multi-timeframe momentum plus volume agreement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Resonance {
    /// MACD histogram positive on 1m/5m/15m and last price at or above VWAP.
    pub bull: bool,
    pub bear: bool,
    pub vol_bull: bool,
    pub vol_bear: bool,
    pub vwap: f64,
    pub last: f64,
}

impl Resonance {
    /// Directional bias for `side` (bull for long, bear for short).
    pub fn direction(&self, side: PosSide) -> bool {
        match side {
            PosSide::Long => self.bull,
            PosSide::Short => self.bear,
        }
    }

    /// Direction confirmed by volume.
    pub fn with_volume(&self, side: PosSide) -> bool {
        match side {
            PosSide::Long => self.bull && self.vol_bull,
            PosSide::Short => self.bear && self.vol_bear,
        }
    }
}

/// Momentum gate settings for one consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumGate {
    pub alpha: f64,
    pub window: usize,
    pub require_two_bars: bool,
}

impl Default for MomentumGate {
    fn default() -> Self {
        Self {
            alpha: 1.2,
            window: 20,
            require_two_bars: true,
        }
    }
}

/// Signal parameters taken from the current tuning snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParams {
    pub candle_limit: usize,
    pub trend: MomentumGate,
    pub dca: MomentumGate,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            candle_limit: 300,
            trend: MomentumGate::default(),
            dca: MomentumGate::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Not enough {bar} candles: have {have}, need {need}")]
    InsufficientData { bar: Bar, have: usize, need: usize },
}

#[async_trait]
pub trait SignalSource: Send + Sync + fmt::Debug {
    async fn resonance(
        &self,
        inst: &InstId,
        params: &SignalParams,
    ) -> Result<Resonance, SignalError>;

    /// Reverse-momentum confirmation for a DCA add on a losing `side`.
    async fn dca_reverse_signal(
        &self,
        inst: &InstId,
        side: PosSide,
        params: &SignalParams,
    ) -> Result<bool, SignalError>;

    /// Momentum gate and two-bar confirmation for a trend add on `side`.
    async fn trend_filters_ok(
        &self,
        inst: &InstId,
        side: PosSide,
        params: &SignalParams,
    ) -> Result<bool, SignalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resonance_direction() {
        let r = Resonance {
            bull: true,
            vol_bull: false,
            ..Default::default()
        };
        assert!(r.direction(PosSide::Long));
        assert!(!r.with_volume(PosSide::Long));
        assert!(!r.direction(PosSide::Short));
    }

    #[test]
    fn test_signal_error_display() {
        let err = SignalError::InsufficientData {
            bar: Bar::M5,
            have: 3,
            need: 27,
        };
        assert_eq!(err.to_string(), "Not enough 5m candles: have 3, need 27");
    }
}
