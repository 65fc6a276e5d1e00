//! Exchange gateway abstraction: market data, positions, open orders and
//! order lifecycle calls against one venue.

use crate::domain::{
    Bar, Candle, InstId, InstrumentSpec, OpenOrder, OrderRequest, OrderStatus, PosSide,
    PositionSnapshot, Ticker,
};
use async_trait::async_trait;
use std::fmt;

pub mod client_id;
pub mod mock;
pub mod okx;
pub mod router;

pub use client_id::ClientIdGenerator;
pub use mock::MockGateway;
pub use okx::{OkxCredentials, OkxGateway};
pub use router::{LimitIntent, MarketIntent, OrderRouter, Submission};

/// Raw venue operations.
///
/// Implementations own transport concerns (signing, timeouts, retry with
/// backoff). They do not interpret tags or apply price alignment; that is
/// the router's job.
#[async_trait]
pub trait ExchangeGateway: Send + Sync + fmt::Debug {
    /// Step sizes for the instrument.
    async fn instrument(&self, inst: &InstId) -> Result<InstrumentSpec, GatewayError>;

    async fn ticker(&self, inst: &InstId) -> Result<Ticker, GatewayError>;

    /// Candles in chronological order (oldest first).
    async fn candles(
        &self,
        inst: &InstId,
        bar: Bar,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn positions(&self, inst: &InstId) -> Result<PositionSnapshot, GatewayError>;

    async fn open_orders(&self, inst: &InstId) -> Result<Vec<OpenOrder>, GatewayError>;

    /// Submit one order.
    ///
    /// # Returns
    /// The exchange order id. An empty string means the exchange acknowledged
    /// without an id and the caller must confirm by client id.
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError>;

    /// Look an order up by its client id. `None` when the exchange has no
    /// record of it.
    async fn order_by_client_id(
        &self,
        inst: &InstId,
        client_id: &str,
    ) -> Result<Option<OrderStatus>, GatewayError>;

    async fn cancel_order(&self, inst: &InstId, order_id: &str) -> Result<(), GatewayError>;

    /// Close one side of the position at market through the venue's
    /// dedicated endpoint.
    async fn close_position(
        &self,
        inst: &InstId,
        pos_side: PosSide,
        td_mode: &str,
    ) -> Result<(), GatewayError>;
}

/// How the control loop reacts to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, 5xx, 429, timeout: abort the phase, retry next tick.
    Transient,
    /// Duplicate client id: resolved by lookup.
    Duplicate,
    /// Exchange business rejection: skip this level or add.
    Policy,
    /// Unusable configuration.
    Fatal,
}

/// Error type for gateway operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network error (connection failure, timeout, DNS).
    NetworkError(String),
    /// Non-success HTTP status.
    HttpError { status: u16, message: String },
    /// Rate limit exceeded.
    RateLimited,
    /// Business rejection carried in the response body.
    Exchange { code: String, message: String },
    /// The client id was already used.
    DuplicateClientId(String),
    /// Malformed or unexpected response.
    ParseError(String),
    /// Private endpoint called without credentials.
    MissingCredentials,
    /// Submission could be neither acknowledged nor confirmed by lookup.
    Unconfirmed { client_id: String },
}

/// OKX codes that signal a busy or throttled venue rather than a rejection.
const TRANSIENT_EXCHANGE_CODES: [&str; 4] = ["50001", "50004", "50011", "50013"];

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NetworkError(_)
            | GatewayError::RateLimited
            | GatewayError::ParseError(_)
            | GatewayError::Unconfirmed { .. } => ErrorKind::Transient,
            GatewayError::HttpError { status, .. } => {
                if *status >= 500 || *status == 429 || *status == 408 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Policy
                }
            }
            GatewayError::Exchange { code, .. } => {
                if TRANSIENT_EXCHANGE_CODES.contains(&code.as_str()) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Policy
                }
            }
            GatewayError::DuplicateClientId(_) => ErrorKind::Duplicate,
            GatewayError::MissingCredentials => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            GatewayError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            GatewayError::RateLimited => write!(f, "Rate limited"),
            GatewayError::Exchange { code, message } => {
                write!(f, "Exchange rejected ({}): {}", code, message)
            }
            GatewayError::DuplicateClientId(id) => write!(f, "Duplicate client id: {}", id),
            GatewayError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            GatewayError::MissingCredentials => write!(f, "Missing API credentials"),
            GatewayError::Unconfirmed { client_id } => {
                write!(f, "Order {} could not be confirmed", client_id)
            }
        }
    }
}

impl std::error::Error for GatewayError {}
