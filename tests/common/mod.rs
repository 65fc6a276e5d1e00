#![allow(dead_code)]

use gvwap::domain::{Decimal, InstId, InstrumentSpec, SidePosition};
use gvwap::gateway::{ClientIdGenerator, MockGateway, OrderRouter};
use std::sync::Arc;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

pub fn inst() -> InstId {
    InstId::new("ETH-USDT-SWAP")
}

pub fn spec() -> InstrumentSpec {
    InstrumentSpec {
        tick_size: d("0.01"),
        lot_size: d("0.01"),
        min_size: d("0.01"),
        contract_value: d("0.1"),
    }
}

pub fn mock_at(mid: &str) -> Arc<MockGateway> {
    Arc::new(MockGateway::new(spec()).with_mid(d(mid)))
}

pub fn router(mock: Arc<MockGateway>) -> OrderRouter {
    OrderRouter::new(mock, inst(), "cross", spec(), ClientIdGenerator::new("itest"))
}

pub fn open_side(qty: &str, avg: &str, upl: &str) -> SidePosition {
    SidePosition {
        quantity: d(qty),
        avg_price: d(avg),
        unrealized_pnl: d(upl),
        ..Default::default()
    }
}
