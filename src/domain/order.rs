//! Order tags, open orders as reported by the exchange, and order requests.

use crate::domain::{Decimal, InstId, PosSide, Side};
use serde::{Deserialize, Serialize};

/// Purpose marker carried on every order.
///
/// Tag matching substitutes for an order-ownership index, so the wire strings
/// are fixed: `GRID`, `ADD`, `DCA`, `TP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderTag {
    #[serde(rename = "GRID")]
    Grid,
    #[serde(rename = "ADD")]
    TrendAdd,
    #[serde(rename = "DCA")]
    Dca,
    #[serde(rename = "TP")]
    TakeProfit,
}

impl OrderTag {
    /// Tags whose resting orders are cancelled when the risk guard pauses.
    pub const RISK_SENSITIVE: [OrderTag; 3] = [OrderTag::Grid, OrderTag::Dca, OrderTag::TrendAdd];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderTag::Grid => "GRID",
            OrderTag::TrendAdd => "ADD",
            OrderTag::Dca => "DCA",
            OrderTag::TakeProfit => "TP",
        }
    }

    pub const ALL: [OrderTag; 4] = [
        OrderTag::Grid,
        OrderTag::TrendAdd,
        OrderTag::Dca,
        OrderTag::TakeProfit,
    ];

    /// Substring match, case-insensitive, the way tags are recognised on the
    /// exchange side.
    pub fn matches(&self, label: &str) -> bool {
        label.to_ascii_uppercase().contains(self.as_str())
    }

    /// Tag encoded as the leading characters of a generated client id. No
    /// wire name is a prefix of another, so at most one tag matches.
    pub fn from_client_id(client_id: &str) -> Option<OrderTag> {
        let upper = client_id.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|tag| upper.starts_with(tag.as_str()))
    }
}

impl std::fmt::Display for OrderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An order resting on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub client_id: String,
    pub tag: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub pos_side: Option<PosSide>,
}

impl OpenOrder {
    /// Label used for tag matching: the tag field, or the client id when the
    /// exchange dropped the tag.
    pub fn label(&self) -> &str {
        if self.tag.is_empty() {
            &self.client_id
        } else {
            &self.tag
        }
    }

    /// Matches the tag field; an order whose tag was dropped is recognised
    /// only by its client id prefix.
    pub fn has_tag(&self, tag: OrderTag) -> bool {
        if self.tag.is_empty() {
            return OrderTag::from_client_id(&self.client_id) == Some(tag);
        }
        tag.matches(&self.tag)
    }
}

/// Lifecycle state as reported by an order lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Live,
    PartiallyFilled,
    Filled,
    Canceled,
    Unknown,
}

impl OrderState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => OrderState::Live,
            "partially_filled" => OrderState::PartiallyFilled,
            "filled" => OrderState::Filled,
            "canceled" | "cancelled" | "mmp_canceled" => OrderState::Canceled,
            _ => OrderState::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled)
    }
}

/// Result of looking an order up by client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Limit order at an already aligned price.
    Limit { price: Decimal, post_only: bool },
    Market,
}

/// A fully aligned order ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub inst: InstId,
    pub td_mode: String,
    pub side: Side,
    pub pos_side: PosSide,
    pub kind: OrderKind,
    pub size: Decimal,
    pub reduce_only: bool,
    pub tag: OrderTag,
    pub client_id: String,
}

impl OrderRequest {
    pub fn price(&self) -> Option<Decimal> {
        match self.kind {
            OrderKind::Limit { price, .. } => Some(price),
            OrderKind::Market => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(tag: &str, client_id: &str) -> OpenOrder {
        OpenOrder {
            order_id: "1".to_string(),
            client_id: client_id.to_string(),
            tag: tag.to_string(),
            price: Decimal::from(100i64),
            size: Decimal::one(),
            side: Side::Buy,
            pos_side: Some(PosSide::Long),
        }
    }

    #[test]
    fn test_tag_matching_prefers_tag_field() {
        assert!(order("grid", "GABC").has_tag(OrderTag::Grid));
        assert!(!order("DCA", "GRIDLIKE").has_tag(OrderTag::Grid));
    }

    #[test]
    fn test_tag_matching_falls_back_to_client_id_prefix() {
        assert!(order("", "GRID3F0A9C1B77E2D4050000A1").has_tag(OrderTag::Grid));
        assert!(order("", "tp00aa11bb22cc33dd000001").has_tag(OrderTag::TakeProfit));
        assert!(!order("", "xGRIDx").has_tag(OrderTag::Grid));
    }

    #[test]
    fn test_hex_digits_in_client_id_are_not_tags() {
        // "DCA" and "ADD" inside the hash part must not count.
        let grid = order("", "GRID9dca0add11ff2e3c000007");
        assert!(grid.has_tag(OrderTag::Grid));
        assert!(!grid.has_tag(OrderTag::Dca));
        assert!(!grid.has_tag(OrderTag::TrendAdd));
        assert!(!order("", "G0DCA11").has_tag(OrderTag::Dca));
        assert_eq!(OrderTag::from_client_id("ADDCAFE"), Some(OrderTag::TrendAdd));
    }

    #[test]
    fn test_tag_wire_names() {
        assert_eq!(OrderTag::TrendAdd.as_str(), "ADD");
        assert_eq!(serde_json::to_string(&OrderTag::TakeProfit).unwrap(), "\"TP\"");
    }

    #[test]
    fn test_order_state_terminal() {
        assert!(OrderState::parse("filled").is_terminal());
        assert!(OrderState::parse("canceled").is_terminal());
        assert!(!OrderState::parse("live").is_terminal());
        assert!(!OrderState::parse("partially_filled").is_terminal());
    }
}
