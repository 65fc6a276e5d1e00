//! Scripted signal source for tests.

use super::{Resonance, SignalError, SignalParams, SignalSource};
use crate::domain::{InstId, PerSide, PosSide};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Script {
    resonance: Resonance,
    dca_reverse: PerSide<bool>,
    trend_ok: PerSide<bool>,
    fail: bool,
}

/// Signal source whose answers are set directly by the test.
#[derive(Debug, Default)]
pub struct ScriptedSignals {
    script: Mutex<Script>,
}

impl ScriptedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_resonance(&self, resonance: Resonance) {
        self.lock().resonance = resonance;
    }

    /// Bullish (or bearish) resonance with volume confirmation.
    pub fn set_trend(&self, side: PosSide) {
        let bull = side == PosSide::Long;
        self.set_resonance(Resonance {
            bull,
            bear: !bull,
            vol_bull: bull,
            vol_bear: !bull,
            ..Default::default()
        });
    }

    pub fn set_dca_reverse(&self, side: PosSide, on: bool) {
        self.lock().dca_reverse[side] = on;
    }

    pub fn set_trend_ok(&self, side: PosSide, on: bool) {
        self.lock().trend_ok[side] = on;
    }

    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    fn check(&self) -> Result<(), SignalError> {
        if self.lock().fail {
            return Err(SignalError::InsufficientData {
                bar: crate::domain::Bar::M1,
                have: 0,
                need: 2,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SignalSource for ScriptedSignals {
    async fn resonance(
        &self,
        _inst: &InstId,
        _params: &SignalParams,
    ) -> Result<Resonance, SignalError> {
        self.check()?;
        Ok(self.lock().resonance)
    }

    async fn dca_reverse_signal(
        &self,
        _inst: &InstId,
        side: PosSide,
        _params: &SignalParams,
    ) -> Result<bool, SignalError> {
        self.check()?;
        Ok(self.lock().dca_reverse[side])
    }

    async fn trend_filters_ok(
        &self,
        _inst: &InstId,
        side: PosSide,
        _params: &SignalParams,
    ) -> Result<bool, SignalError> {
        self.check()?;
        Ok(self.lock().trend_ok[side])
    }
}
