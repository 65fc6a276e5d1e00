//! Notional-to-contract sizing.

use crate::domain::{align_size, Decimal, InstrumentSpec, PerSide};
use crate::tuning::Tuning;
use serde::Serialize;

/// Order sizes in contracts for the current price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Sizes {
    /// Per grid level; long = buy levels, short = sell levels.
    pub grid: PerSide<Decimal>,
    pub trend: PerSide<Decimal>,
}

/// Contracts for `usd` of notional at `price`, aligned to the lot and lifted
/// to the minimum. Without a usable price or target, one lot.
pub fn contracts_for_notional(usd: Decimal, price: Decimal, spec: &InstrumentSpec) -> Decimal {
    let raw = if price.is_positive() && usd.is_positive() {
        usd.checked_div(spec.contract_value * price)
            .unwrap_or(spec.lot_size)
    } else {
        spec.lot_size
    };
    align_size(raw, spec.lot_size, spec.min_size).unwrap_or(spec.min_size)
}

pub fn compute(tuning: &Tuning, spec: &InstrumentSpec, mid: Decimal) -> Sizes {
    let grid_scale = tuning.grid_scale();
    let trend_usd = tuning.trend_notional_usd * tuning.trend_scale();
    Sizes {
        grid: PerSide::new(
            contracts_for_notional(tuning.target_notional_usd_long * grid_scale, mid, spec),
            contracts_for_notional(tuning.target_notional_usd_short * grid_scale, mid, spec),
        ),
        trend: PerSide::new(
            contracts_for_notional(trend_usd, mid, spec),
            contracts_for_notional(trend_usd, mid, spec),
        ),
    }
}
