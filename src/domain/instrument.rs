//! Instrument step sizes, price reference, and the alignment rules shared by
//! order generation and liveness checks.

use crate::domain::{Decimal, Side};
use serde::{Deserialize, Serialize};

/// Exchange step sizes for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_size: Decimal,
    /// Base-currency amount represented by one contract.
    pub contract_value: Decimal,
}

impl InstrumentSpec {
    /// All four steps must be strictly positive for sizing and rounding to
    /// make sense; an instrument that fails this is unusable.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("tickSz", self.tick_size),
            ("lotSz", self.lot_size),
            ("minSz", self.min_size),
            ("ctVal", self.contract_value),
        ] {
            if !v.is_positive() {
                return Err(format!("{} must be positive, got {}", name, v));
            }
        }
        Ok(())
    }
}

/// Maker placement rule: post-only limit orders are pushed `offset_ticks`
/// away from the level so they rest instead of crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerOffset {
    pub post_only: bool,
    pub offset_ticks: u32,
}

impl Default for MakerOffset {
    fn default() -> Self {
        Self {
            post_only: true,
            offset_ticks: 1,
        }
    }
}

/// Round a price to the tick: down for buys, up for sells.
pub fn round_price(price: Decimal, tick: Decimal, side: Side) -> Decimal {
    match side {
        Side::Buy => price.floor_to_step(tick),
        Side::Sell => price.ceil_to_step(tick),
    }
}

/// The price an order for `raw` actually rests at.
///
/// Used both when submitting and when testing liveness; the two must agree
/// exactly or a resting order is never recognised as live.
pub fn effective_price(side: Side, raw: Decimal, spec: &InstrumentSpec, maker: MakerOffset) -> Decimal {
    let tick = spec.tick_size;
    let mut px = raw;
    if maker.post_only && maker.offset_ticks > 0 {
        let delta = tick * Decimal::from(maker.offset_ticks);
        px = match side {
            Side::Buy => px - delta,
            Side::Sell => px + delta,
        };
        if !px.is_positive() {
            px = tick;
        }
    }
    round_price(px, tick, side)
}

/// Lift a size to the exchange minimum and round it up to the lot.
///
/// Returns `None` for a non-positive request; those intents are dropped
/// rather than inflated to the minimum.
pub fn align_size(size: Decimal, lot: Decimal, min: Decimal) -> Option<Decimal> {
    if !size.is_positive() || !lot.is_positive() {
        return None;
    }
    let lifted = if size < min { min } else { size };
    let aligned = lifted.ceil_to_step(lot);
    aligned.is_positive().then_some(aligned)
}

/// Round a size down to the lot; used for reduce-only closes that must not
/// exceed the open quantity.
pub fn floor_size(size: Decimal, lot: Decimal) -> Decimal {
    if !size.is_positive() {
        return Decimal::zero();
    }
    size.floor_to_step(lot)
}

/// Latest quote plus the instrument it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRef {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub mid: Decimal,
    pub spec: InstrumentSpec,
}

impl PriceRef {
    pub fn new(spec: InstrumentSpec) -> Self {
        Self {
            bid: Decimal::zero(),
            ask: Decimal::zero(),
            last: Decimal::zero(),
            mid: Decimal::zero(),
            spec,
        }
    }

    /// Update from a ticker. Mid is the bid/ask midpoint when both are
    /// present, otherwise the last trade.
    pub fn update(&mut self, ticker: &Ticker) -> Decimal {
        self.bid = ticker.bid;
        self.ask = ticker.ask;
        self.last = ticker.last;
        self.mid = if ticker.bid.is_positive() && ticker.ask.is_positive() {
            (ticker.bid + ticker.ask) / Decimal::from(2i64)
        } else {
            ticker.last
        };
        self.mid
    }

    pub fn has_price(&self) -> bool {
        self.mid.is_positive()
    }
}

/// Top-of-book snapshot returned by the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn spec() -> InstrumentSpec {
        InstrumentSpec {
            tick_size: d("0.01"),
            lot_size: d("0.01"),
            min_size: d("0.01"),
            contract_value: d("0.1"),
        }
    }

    #[test]
    fn test_effective_price_moves_away_from_level() {
        let maker = MakerOffset::default();
        assert_eq!(effective_price(Side::Buy, d("2400"), &spec(), maker), d("2399.99"));
        assert_eq!(effective_price(Side::Sell, d("2400"), &spec(), maker), d("2400.01"));
    }

    #[test]
    fn test_effective_price_rounds_maker_favourable() {
        let maker = MakerOffset {
            post_only: false,
            offset_ticks: 0,
        };
        assert_eq!(effective_price(Side::Buy, d("2400.005"), &spec(), maker), d("2400.00"));
        assert_eq!(effective_price(Side::Sell, d("2400.005"), &spec(), maker), d("2400.01"));
    }

    #[test]
    fn test_effective_price_never_non_positive() {
        let maker = MakerOffset {
            post_only: true,
            offset_ticks: 5,
        };
        assert_eq!(effective_price(Side::Buy, d("0.02"), &spec(), maker), d("0.01"));
    }

    #[test]
    fn test_offset_ignored_without_post_only() {
        let maker = MakerOffset {
            post_only: false,
            offset_ticks: 3,
        };
        assert_eq!(effective_price(Side::Buy, d("2400"), &spec(), maker), d("2400"));
    }

    #[test]
    fn test_align_size() {
        assert_eq!(align_size(d("0.004"), d("0.01"), d("0.01")), Some(d("0.01")));
        assert_eq!(align_size(d("0.123"), d("0.01"), d("0.01")), Some(d("0.13")));
        assert_eq!(align_size(Decimal::zero(), d("0.01"), d("0.01")), None);
        assert_eq!(align_size(d("-1"), d("0.01"), d("0.01")), None);
    }

    #[test]
    fn test_floor_size() {
        assert_eq!(floor_size(d("0.379"), d("0.01")), d("0.37"));
        assert_eq!(floor_size(d("-1"), d("0.01")), Decimal::zero());
    }

    #[test]
    fn test_price_ref_mid() {
        let mut px = PriceRef::new(spec());
        let mid = px.update(&Ticker {
            bid: d("100"),
            ask: d("101"),
            last: d("99"),
        });
        assert_eq!(mid, d("100.5"));
        let mid = px.update(&Ticker {
            bid: Decimal::zero(),
            ask: d("101"),
            last: d("99"),
        });
        assert_eq!(mid, d("99"));
    }

    #[test]
    fn test_spec_validation() {
        assert!(spec().validate().is_ok());
        let mut bad = spec();
        bad.tick_size = Decimal::zero();
        assert!(bad.validate().unwrap_err().contains("tickSz"));
    }
}
