//! Exchange-reported position state. Read-only input, fetched fresh per pass.

use crate::domain::{Decimal, PerSide, PosSide};
use serde::{Deserialize, Serialize};

/// One side of a hedge-mode position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePosition {
    /// Open quantity in contracts; zero when flat.
    pub quantity: Decimal,
    pub avg_price: Decimal,
    /// Zero when the exchange reports none.
    pub liquidation_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Raw exchange margin ratio, if reported.
    pub margin_ratio: Option<Decimal>,
}

impl SidePosition {
    pub fn is_open(&self) -> bool {
        self.quantity.is_positive()
    }

    pub fn is_losing(&self) -> bool {
        self.is_open() && self.unrealized_pnl.is_negative()
    }

    pub fn is_profitable(&self) -> bool {
        self.is_open() && self.unrealized_pnl.is_positive()
    }

    /// Distance from `price` to the liquidation price, for open sides that
    /// report one.
    pub fn liquidation_distance(&self, price: Decimal) -> Option<Decimal> {
        if !self.is_open() || !self.liquidation_price.is_positive() {
            return None;
        }
        Some((price - self.liquidation_price).abs())
    }
}

/// Both sides of the account's position in one instrument.
pub type PositionSnapshot = PerSide<SidePosition>;

impl PerSide<SidePosition> {
    /// Minimum margin ratio across sides, normalised to basis points.
    ///
    /// Exchanges report either a fraction (0.1234) or a percentage (12.34);
    /// both map to 1234.
    pub fn min_margin_ratio_bp(&self) -> Option<Decimal> {
        self.iter()
            .filter_map(|(_, p)| p.margin_ratio)
            .map(normalize_margin_ratio)
            .min()
    }

    pub fn losing_sides(&self) -> Vec<PosSide> {
        self.iter()
            .filter(|(_, p)| p.is_losing())
            .map(|(side, _)| side)
            .collect()
    }
}

fn normalize_margin_ratio(raw: Decimal) -> Decimal {
    let scale = if raw <= Decimal::one() {
        Decimal::from(10_000i64)
    } else {
        Decimal::from(100i64)
    };
    Decimal::new((raw * scale).inner().round())
}
