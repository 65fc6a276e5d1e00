//! OKX v5 REST client implementation.

use super::{ExchangeGateway, GatewayError};
use crate::domain::{
    Bar, Candle, Decimal, InstId, InstrumentSpec, OpenOrder, OrderKind, OrderRequest,
    OrderState, OrderStatus, PosSide, PositionSnapshot, Side, SidePosition, Ticker,
};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Code OKX returns when a client order id is reused.
const DUPLICATE_CLIENT_ID: &str = "51016";
const RATE_LIMITED: &str = "50011";

/// API key triple for private endpoints.
#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &"***")
            .finish_non_exhaustive()
    }
}

impl OkxCredentials {
    fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty() && !self.passphrase.is_empty()
    }
}

/// OKX gateway using the v5 REST API.
#[derive(Debug, Clone)]
pub struct OkxGateway {
    client: Client,
    base_url: String,
    credentials: OkxCredentials,
    simulated: bool,
}

impl OkxGateway {
    pub fn new(
        base_url: String,
        credentials: OkxCredentials,
        simulated: bool,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            simulated,
        })
    }

    /// Base64 HMAC-SHA256 over `timestamp + method + path + body`.
    fn sign(
        &self,
        timestamp: &str,
        method: &Method,
        path: &str,
        body: &str,
    ) -> Result<String, GatewayError> {
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), path, body);
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|_| GatewayError::MissingCredentials)?;
        mac.update(prehash.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Send one request and return the `data` array.
    ///
    /// GETs and cancels are retried with backoff on transient failures.
    /// Order placement is sent once; the router resolves ambiguity by client
    /// id instead.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        private: bool,
        retry_transient: bool,
    ) -> Result<Vec<Value>, GatewayError> {
        if private && !self.credentials.is_complete() {
            return Err(GatewayError::MissingCredentials);
        }
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            let qs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}?{}", path, qs.join("&"))
        };
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();

        let attempt = || async {
            self.send_once(&method, &request_path, &body_str, private)
                .await
                .map_err(|e| {
                    if retry_transient && e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        };
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        retry(backoff, attempt).await
    }

    async fn send_once(
        &self,
        method: &Method,
        request_path: &str,
        body: &str,
        private: bool,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = format!("{}{}", self.base_url, request_path);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");
        if self.simulated {
            builder = builder.header("x-simulated-trading", "1");
        }
        if private {
            let timestamp = chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string();
            let signature = self.sign(&timestamp, method, request_path, body)?;
            builder = builder
                .header("OK-ACCESS-KEY", &self.credentials.api_key)
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", timestamp)
                .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase);
        }
        if !body.is_empty() {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        let status = response.status();
        if status == 429 {
            return Err(GatewayError::RateLimited);
        }
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::HttpError {
                status: status.as_u16(),
                message: text,
            });
        }
        let json: Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::ParseError(e.to_string()))?;
        parse_envelope(json)
    }
}

/// Unwrap `{"code":"0","msg":"","data":[...]}`, mapping business codes.
fn parse_envelope(json: Value) -> Result<Vec<Value>, GatewayError> {
    let code = json.get("code").map(json_str).unwrap_or_default();
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();
    if code.is_empty() || code == "0" {
        return Ok(data);
    }

    // Per-order codes carry the specific reason; the envelope code is generic.
    let (code, message) = data
        .first()
        .and_then(|d| {
            let s_code = d.get("sCode").map(json_str).unwrap_or_default();
            (!s_code.is_empty() && s_code != "0")
                .then(|| (s_code, d.get("sMsg").map(json_str).unwrap_or_default()))
        })
        .unwrap_or_else(|| (code, json.get("msg").map(json_str).unwrap_or_default()));

    match code.as_str() {
        DUPLICATE_CLIENT_ID => {
            let client_id = data
                .first()
                .and_then(|d| d.get("clOrdId"))
                .map(json_str)
                .unwrap_or_default();
            Err(GatewayError::DuplicateClientId(client_id))
        }
        RATE_LIMITED => Err(GatewayError::RateLimited),
        _ => Err(GatewayError::Exchange { code, message }),
    }
}

fn json_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn field(v: &Value, key: &str) -> String {
    v.get(key).map(json_str).unwrap_or_default()
}

fn decimal_field(v: &Value, key: &str) -> Decimal {
    Decimal::parse_or_zero(&field(v, key))
}

fn first(data: Vec<Value>, what: &str) -> Result<Value, GatewayError> {
    data.into_iter()
        .next()
        .ok_or_else(|| GatewayError::ParseError(format!("Empty {} response", what)))
}

fn parse_instrument(v: &Value) -> InstrumentSpec {
    InstrumentSpec {
        tick_size: decimal_field(v, "tickSz"),
        lot_size: decimal_field(v, "lotSz"),
        min_size: decimal_field(v, "minSz"),
        contract_value: decimal_field(v, "ctVal"),
    }
}

fn parse_candle(v: &Value) -> Result<Candle, GatewayError> {
    let row = v
        .as_array()
        .ok_or_else(|| GatewayError::ParseError("Expected candle array".to_string()))?;
    let num = |i: usize| -> f64 {
        row.get(i)
            .map(json_str)
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let ts_ms = row
        .first()
        .map(json_str)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| GatewayError::ParseError("Missing candle timestamp".to_string()))?;
    Ok(Candle {
        ts_ms,
        open: num(1),
        high: num(2),
        low: num(3),
        close: num(4),
        volume: num(5),
    })
}

fn parse_positions(data: &[Value]) -> PositionSnapshot {
    let mut snapshot = PositionSnapshot::default();
    for d in data {
        let Some(side) = PosSide::parse(&field(d, "posSide")) else {
            continue;
        };
        let margin_raw = field(d, "mgnRatio");
        let upl = if d.get("upl").is_some() {
            decimal_field(d, "upl")
        } else {
            decimal_field(d, "uPnl")
        };
        snapshot[side] = SidePosition {
            quantity: decimal_field(d, "pos").abs(),
            avg_price: decimal_field(d, "avgPx"),
            liquidation_price: decimal_field(d, "liqPx"),
            unrealized_pnl: upl,
            margin_ratio: Decimal::from_str_canonical(&margin_raw).ok(),
        };
    }
    snapshot
}

fn parse_open_order(v: &Value) -> Option<OpenOrder> {
    let side = Side::parse(&field(v, "side"))?;
    Some(OpenOrder {
        order_id: field(v, "ordId"),
        client_id: field(v, "clOrdId"),
        tag: field(v, "tag"),
        price: decimal_field(v, "px"),
        size: decimal_field(v, "sz"),
        side,
        pos_side: PosSide::parse(&field(v, "posSide")),
    })
}

fn order_body(request: &OrderRequest) -> Value {
    let mut body = serde_json::json!({
        "instId": request.inst.as_str(),
        "tdMode": request.td_mode,
        "side": request.side.as_str(),
        "posSide": request.pos_side.as_str(),
        "sz": request.size.to_canonical_string(),
        "tag": request.tag.as_str(),
        "clOrdId": request.client_id,
        "reduceOnly": request.reduce_only.to_string(),
    });
    match request.kind {
        OrderKind::Limit { price, post_only } => {
            body["ordType"] = Value::from(if post_only { "post_only" } else { "limit" });
            body["px"] = Value::from(price.to_canonical_string());
        }
        OrderKind::Market => {
            body["ordType"] = Value::from("market");
        }
    }
    body
}

#[async_trait]
impl ExchangeGateway for OkxGateway {
    async fn instrument(&self, inst: &InstId) -> Result<InstrumentSpec, GatewayError> {
        debug!("Fetching instrument spec for {}", inst);
        let data = self
            .request(
                Method::GET,
                "/api/v5/public/instruments",
                &[("instType", "SWAP".to_string()), ("instId", inst.to_string())],
                None,
                false,
                true,
            )
            .await?;
        Ok(parse_instrument(&first(data, "instrument")?))
    }

    async fn ticker(&self, inst: &InstId) -> Result<Ticker, GatewayError> {
        let data = self
            .request(
                Method::GET,
                "/api/v5/market/ticker",
                &[("instId", inst.to_string())],
                None,
                false,
                true,
            )
            .await?;
        let t = first(data, "ticker")?;
        Ok(Ticker {
            bid: decimal_field(&t, "bidPx"),
            ask: decimal_field(&t, "askPx"),
            last: decimal_field(&t, "last"),
        })
    }

    async fn candles(
        &self,
        inst: &InstId,
        bar: Bar,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let data = self
            .request(
                Method::GET,
                "/api/v5/market/candles",
                &[
                    ("instId", inst.to_string()),
                    ("bar", bar.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
                None,
                false,
                true,
            )
            .await?;
        // Newest first on the wire.
        let mut candles = Vec::with_capacity(data.len());
        for row in data.iter().rev() {
            match parse_candle(row) {
                Ok(c) => candles.push(c),
                Err(e) => warn!("Failed to parse candle: {}", e),
            }
        }
        Ok(candles)
    }

    async fn positions(&self, inst: &InstId) -> Result<PositionSnapshot, GatewayError> {
        let data = self
            .request(
                Method::GET,
                "/api/v5/account/positions",
                &[("instType", "SWAP".to_string()), ("instId", inst.to_string())],
                None,
                true,
                true,
            )
            .await?;
        Ok(parse_positions(&data))
    }

    async fn open_orders(&self, inst: &InstId) -> Result<Vec<OpenOrder>, GatewayError> {
        let data = self
            .request(
                Method::GET,
                "/api/v5/trade/orders-pending",
                &[("instType", "SWAP".to_string()), ("instId", inst.to_string())],
                None,
                true,
                true,
            )
            .await?;
        let mut orders = Vec::with_capacity(data.len());
        for v in &data {
            match parse_open_order(v) {
                Some(o) => orders.push(o),
                None => warn!("Skipping open order with unknown side: {}", v),
            }
        }
        Ok(orders)
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let data = self
            .request(
                Method::POST,
                "/api/v5/trade/order",
                &[],
                Some(order_body(request)),
                true,
                false,
            )
            .await?;
        Ok(data.first().map(|d| field(d, "ordId")).unwrap_or_default())
    }

    async fn order_by_client_id(
        &self,
        inst: &InstId,
        client_id: &str,
    ) -> Result<Option<OrderStatus>, GatewayError> {
        let result = self
            .request(
                Method::GET,
                "/api/v5/trade/order",
                &[("instId", inst.to_string()), ("clOrdId", client_id.to_string())],
                None,
                true,
                true,
            )
            .await;
        let data = match result {
            Ok(data) => data,
            // "Order does not exist"
            Err(GatewayError::Exchange { code, .. }) if code == "51603" => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(data.first().map(|d| OrderStatus {
            order_id: field(d, "ordId"),
            state: OrderState::parse(&field(d, "state")),
        }))
    }

    async fn cancel_order(&self, inst: &InstId, order_id: &str) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            "/api/v5/trade/cancel-order",
            &[],
            Some(serde_json::json!({ "instId": inst.as_str(), "ordId": order_id })),
            true,
            true,
        )
        .await
        .map(|_| ())
    }

    async fn close_position(
        &self,
        inst: &InstId,
        pos_side: PosSide,
        td_mode: &str,
    ) -> Result<(), GatewayError> {
        let mgn_mode = if td_mode == "isolated" { "isolated" } else { "cross" };
        self.request(
            Method::POST,
            "/api/v5/trade/close-position",
            &[],
            Some(serde_json::json!({
                "instId": inst.as_str(),
                "posSide": pos_side.as_str(),
                "mgnMode": mgn_mode,
            })),
            true,
            false,
        )
        .await
        .map(|_| ())
    }
}
