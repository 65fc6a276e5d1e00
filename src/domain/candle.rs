//! OHLCV bars used by the signal source.

use serde::{Deserialize, Serialize};

/// Candle interval. Only the three timeframes the signals read are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bar {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
}

impl Bar {
    pub const ALL: [Bar; 3] = [Bar::M1, Bar::M5, Bar::M15];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bar::M1 => "1m",
            Bar::M5 => "5m",
            Bar::M15 => "15m",
        }
    }
}

impl std::fmt::Display for Bar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bar. Indicator math runs in f64, so candles are stored that way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}
