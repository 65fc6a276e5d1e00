//! Domain primitives: TimeMs, InstId, Side, PosSide, PerSide.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier` (negative if `earlier` is in the future).
    pub fn since(&self, earlier: TimeMs) -> i64 {
        self.0 - earlier.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        TimeMs(self.0 + secs * 1000)
    }
}

/// Exchange instrument identifier (e.g. "ETH-USDT-SWAP").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstId(pub String);

impl InstId {
    pub fn new(inst: impl Into<String>) -> Self {
        InstId(inst.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side: Buy or Sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the signed multiplier for this side (+1 for Buy, -1 for Sell).
    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// The position side a grid order on this side builds (hedge mode).
    pub fn opening_pos_side(&self) -> PosSide {
        match self {
            Side::Buy => PosSide::Long,
            Side::Sell => PosSide::Short,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position side in hedge mode: each side is an independent position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
}

impl PosSide {
    pub const BOTH: [PosSide; 2] = [PosSide::Long, PosSide::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            PosSide::Long => "long",
            PosSide::Short => "short",
        }
    }

    /// Order side that increases this position.
    pub fn open_side(&self) -> Side {
        match self {
            PosSide::Long => Side::Buy,
            PosSide::Short => Side::Sell,
        }
    }

    /// Order side that reduces this position.
    pub fn close_side(&self) -> Side {
        match self {
            PosSide::Long => Side::Sell,
            PosSide::Short => Side::Buy,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Some(PosSide::Long),
            "short" => Some(PosSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PosSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value per position side, indexed by [`PosSide`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub long: T,
    pub short: T,
}

impl<T> PerSide<T> {
    pub fn new(long: T, short: T) -> Self {
        Self { long, short }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PosSide, &T)> {
        [(PosSide::Long, &self.long), (PosSide::Short, &self.short)].into_iter()
    }

    pub fn map<U>(&self, mut f: impl FnMut(PosSide, &T) -> U) -> PerSide<U> {
        PerSide {
            long: f(PosSide::Long, &self.long),
            short: f(PosSide::Short, &self.short),
        }
    }
}

impl<T> Index<PosSide> for PerSide<T> {
    type Output = T;

    fn index(&self, side: PosSide) -> &T {
        match side {
            PosSide::Long => &self.long,
            PosSide::Short => &self.short,
        }
    }
}

impl<T> IndexMut<PosSide> for PerSide<T> {
    fn index_mut(&mut self, side: PosSide) -> &mut T {
        match side {
            PosSide::Long => &mut self.long,
            PosSide::Short => &mut self.short,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
    }

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&PosSide::Short).unwrap(), "\"short\"");
    }

    #[test]
    fn test_pos_side_order_sides() {
        assert_eq!(PosSide::Long.open_side(), Side::Buy);
        assert_eq!(PosSide::Long.close_side(), Side::Sell);
        assert_eq!(PosSide::Short.open_side(), Side::Sell);
        assert_eq!(PosSide::Short.close_side(), Side::Buy);
        assert_eq!(Side::Sell.opening_pos_side(), PosSide::Short);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(PosSide::parse(" Short "), Some(PosSide::Short));
        assert_eq!(PosSide::parse("net"), None);
    }

    #[test]
    fn test_per_side_index() {
        let mut flags = PerSide::new(false, false);
        flags[PosSide::Short] = true;
        assert!(!flags[PosSide::Long]);
        assert!(flags.short);
        let counts = flags.map(|_, f| if *f { 1 } else { 0 });
        assert_eq!(counts, PerSide::new(0, 1));
    }

    #[test]
    fn test_timems_since() {
        let t1 = TimeMs::new(1_000);
        let t2 = t1.plus_secs(30);
        assert_eq!(t2.since(t1), 30_000);
        assert!(t1 < t2);
    }
}
