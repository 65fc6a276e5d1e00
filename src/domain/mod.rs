//! Domain types for the grid engine.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Primitives: TimeMs, InstId, Side, PosSide, PerSide
//! - Instrument step sizes and the shared price/size alignment rules
//! - Orders, order tags and exchange-reported positions

pub mod candle;
pub mod decimal;
pub mod instrument;
pub mod order;
pub mod position;
pub mod primitives;

pub use candle::{Bar, Candle};
pub use decimal::Decimal;
pub use instrument::{
    align_size, effective_price, floor_size, round_price, InstrumentSpec, MakerOffset, PriceRef,
    Ticker,
};
pub use order::{OpenOrder, OrderKind, OrderRequest, OrderState, OrderStatus, OrderTag};
pub use position::{PositionSnapshot, SidePosition};
pub use primitives::{InstId, PerSide, PosSide, Side, TimeMs};
