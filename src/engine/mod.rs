//! Grid engine: ladder repair plus the policy state machines that gate
//! non-grid order flow.
//!
//! All state here is owned by the control loop. Exchange state is read fresh
//! each pass and never cached as truth.

use crate::domain::{Decimal, PositionSnapshot, TimeMs};
use crate::gateway::{ErrorKind, GatewayError, OrderRouter, Submission};
use crate::signals::{SignalError, SignalParams, SignalSource};
use crate::tuning::TuningError;
use thiserror::Error;
use tracing::warn;

pub mod dca;
pub mod events;
pub mod ladder;
pub mod risk;
pub mod sizing;
pub mod take_profit;
pub mod trend;

pub use dca::DcaWindow;
pub use events::{ActionEvent, EventLog};
pub use ladder::{LadderConfig, LadderEngine, PriceLevel, RepairReport};
pub use risk::{RiskConfig, RiskGuard};
pub use sizing::Sizes;
pub use take_profit::TakeProfitTrailer;
pub use trend::TrendThrottle;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("Tuning error: {0}")]
    Tuning(#[from] TuningError),
    #[error("Invalid instrument: {0}")]
    Instrument(String),
    #[error("No market price for {0}")]
    NoPrice(String),
}

impl EngineError {
    /// Errors that end the run instead of deferring to the next tick.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Gateway(e) => e.kind() == ErrorKind::Fatal,
            EngineError::Tuning(_) | EngineError::Instrument(_) => true,
            EngineError::Signal(_) | EngineError::NoPrice(_) => false,
        }
    }
}

/// Inputs shared by the signal-cadence policies for one pass.
pub struct PolicyContext<'a> {
    pub router: &'a OrderRouter,
    pub signals: &'a dyn SignalSource,
    pub params: SignalParams,
    pub positions: &'a PositionSnapshot,
    pub mid: Decimal,
    pub guard_paused: bool,
    pub now: TimeMs,
}

/// Exchange business rejections skip the one intent; everything else
/// propagates and aborts the phase.
pub(crate) fn skip_rejected(
    result: Result<Submission, GatewayError>,
    what: &str,
) -> Result<Option<Submission>, GatewayError> {
    match result {
        Ok(submission) => Ok(Some(submission)),
        Err(e) if e.kind() == ErrorKind::Policy => {
            warn!(intent = what, error = %e, "Order rejected by exchange, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
