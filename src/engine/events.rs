//! Operator-facing action events.
//!
//! Each event is logged under the `gvwap::action` target and kept in a
//! bounded in-memory journal served by the status API.

use crate::domain::TimeMs;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub const GRID_REBUILD: &str = "grid.rebuild";
pub const GRID_PLACE_ALL: &str = "grid.place_all";
pub const GRID_CANCEL_ALL: &str = "grid.cancel_all";
pub const REARM_SIDE_FLAT: &str = "rearm.side_flat";
pub const REARM_DONE: &str = "rearm.done";
pub const DCA_WINDOW_ENTER: &str = "dca.window.enter";
pub const DCA_WINDOW_EXIT: &str = "dca.window.exit";
pub const DCA_ADD: &str = "dca.add";
pub const DCA_BLOCKED: &str = "dca.blocked";
pub const TREND_ADD: &str = "trend.add";
pub const TP_PARTIAL: &str = "tp.partial";
pub const TP_CLOSE: &str = "tp.close";
pub const RISK_MARGIN_PAUSE: &str = "risk.margin.pause";
pub const RISK_MARGIN_RESUME: &str = "risk.margin.resume";
pub const RISK_LIQ_PAUSE: &str = "risk.liq.pause";
pub const RISK_LIQ_RESUME: &str = "risk.liq.resume";
pub const CANCEL_ALL_STARTUP: &str = "cancel.all.startup";
pub const CANCEL_ALL_EXIT: &str = "cancel.all.exit";
pub const TUNING_APPLIED: &str = "tuning.applied";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEvent {
    pub at: TimeMs,
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// Shared, bounded event journal. Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<Mutex<VecDeque<ActionEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(512)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ActionEvent>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn emit(&self, event: &'static str, payload: serde_json::Value) {
        info!(target: "gvwap::action", event, payload = %payload, "action");
        let mut buf = self.lock();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(ActionEvent {
            at: TimeMs::now(),
            event,
            payload,
        });
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ActionEvent> {
        let buf = self.lock();
        let skip = buf.len().saturating_sub(limit);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.lock().iter().filter(|e| e.event == event).count()
    }

    pub fn last(&self, event: &str) -> Option<ActionEvent> {
        self.lock().iter().rev().find(|e| e.event == event).cloned()
    }
}
