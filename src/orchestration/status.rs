//! Read-only view of the control loop for the status API.

use crate::domain::{Decimal, PerSide, PositionSnapshot, TimeMs};
use crate::engine::dca::DcaSideState;
use crate::engine::ladder::LadderStatus;
use crate::engine::risk::RiskStatus;
use crate::engine::take_profit::TpSideState;
use crate::engine::trend::TrendSideState;
use crate::engine::{RepairReport, Sizes};
use crate::signals::Resonance;
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub inst_id: String,
    /// Set once the first tick has completed.
    pub ready: bool,
    pub started_at: Option<TimeMs>,
    pub last_tick_at: Option<TimeMs>,
    pub ticks: u64,
    pub mid: Decimal,
    pub sizes: Sizes,
    pub positions: PositionSnapshot,
    pub ladder: Option<LadderStatus>,
    pub last_repair: RepairReport,
    pub risk: Option<RiskStatus>,
    pub dca: PerSide<DcaSideState>,
    pub trend: PerSide<TrendSideState>,
    pub take_profit: PerSide<TpSideState>,
    pub resonance: Option<Resonance>,
    pub last_error: Option<String>,
}

/// Shared handle; the control loop writes, HTTP handlers read clones.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().map(|s| s.ready).unwrap_or(false)
    }
}
