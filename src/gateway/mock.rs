//! In-memory gateway for tests: a scriptable order book and position store.

use super::{ExchangeGateway, GatewayError};
use crate::domain::{
    Bar, Candle, Decimal, InstId, InstrumentSpec, OpenOrder, OrderKind, OrderRequest,
    OrderState, OrderStatus, PosSide, PositionSnapshot, SidePosition, Ticker,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Scripted response for the next `submit_order` call.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Accept and assign an order id; limit orders start resting.
    Accept,
    /// Report a duplicate client id. A lookup then finds the order in the
    /// given state, or nothing.
    Duplicate(Option<OrderState>),
    /// Acknowledge without an order id; lookup as for `Duplicate`.
    AckWithoutId(Option<OrderState>),
    Reject(GatewayError),
}

#[derive(Debug)]
struct MockState {
    spec: InstrumentSpec,
    ticker: Ticker,
    candles: HashMap<Bar, Vec<Candle>>,
    positions: PositionSnapshot,
    open_orders: Vec<OpenOrder>,
    lookups: HashMap<String, OrderStatus>,
    script: VecDeque<SubmitBehavior>,
    submissions: Vec<OrderRequest>,
    cancelled: Vec<String>,
    closed: Vec<PosSide>,
    lookup_calls: usize,
    next_id: u64,
    fail_open_orders: bool,
    fail_positions: bool,
    fail_ticker: bool,
}

/// Mock exchange gateway that keeps open orders and positions in memory.
#[derive(Debug)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(spec: InstrumentSpec) -> Self {
        Self {
            state: Mutex::new(MockState {
                spec,
                ticker: Ticker::default(),
                candles: HashMap::new(),
                positions: PositionSnapshot::default(),
                open_orders: Vec::new(),
                lookups: HashMap::new(),
                script: VecDeque::new(),
                submissions: Vec::new(),
                cancelled: Vec::new(),
                closed: Vec::new(),
                lookup_calls: 0,
                next_id: 1,
                fail_open_orders: false,
                fail_positions: false,
                fail_ticker: false,
            }),
        }
    }

    /// Set the mid by quoting a zero-width book at `mid`.
    pub fn with_mid(self, mid: Decimal) -> Self {
        self.set_mid(mid);
        self
    }

    pub fn with_position(self, side: PosSide, position: SidePosition) -> Self {
        self.set_position(side, position);
        self
    }

    pub fn with_candles(self, bar: Bar, candles: Vec<Candle>) -> Self {
        self.lock().candles.insert(bar, candles);
        self
    }

    pub fn with_open_order(self, order: OpenOrder) -> Self {
        self.lock().open_orders.push(order);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_mid(&self, mid: Decimal) {
        self.lock().ticker = Ticker {
            bid: mid,
            ask: mid,
            last: mid,
        };
    }

    pub fn set_position(&self, side: PosSide, position: SidePosition) {
        self.lock().positions[side] = position;
    }

    pub fn set_fail_open_orders(&self, fail: bool) {
        self.lock().fail_open_orders = fail;
    }

    pub fn set_fail_positions(&self, fail: bool) {
        self.lock().fail_positions = fail;
    }

    pub fn set_fail_ticker(&self, fail: bool) {
        self.lock().fail_ticker = fail;
    }

    /// Queue the response for an upcoming submission.
    pub fn script_submit(&self, behavior: SubmitBehavior) {
        self.lock().script.push_back(behavior);
    }

    /// Remove resting orders at `price`, as if filled. Returns how many.
    pub fn fill_at(&self, price: Decimal) -> usize {
        let mut state = self.lock();
        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.price != price);
        before - state.open_orders.len()
    }

    pub fn open_order_snapshot(&self) -> Vec<OpenOrder> {
        self.lock().open_orders.clone()
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.lock().submissions.clone()
    }

    pub fn clear_submissions(&self) {
        self.lock().submissions.clear();
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn closed_positions(&self) -> Vec<PosSide> {
        self.lock().closed.clone()
    }

    pub fn lookup_calls(&self) -> usize {
        self.lock().lookup_calls
    }
}

impl MockState {
    fn assign_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    fn rest(&mut self, request: &OrderRequest, order_id: &str) {
        if let OrderKind::Limit { price, .. } = request.kind {
            self.open_orders.push(OpenOrder {
                order_id: order_id.to_string(),
                client_id: request.client_id.clone(),
                tag: request.tag.as_str().to_string(),
                price,
                size: request.size,
                side: request.side,
                pos_side: Some(request.pos_side),
            });
        }
    }

    fn register_lookup(&mut self, request: &OrderRequest, found: Option<OrderState>) {
        if let Some(state) = found {
            let order_id = self.assign_id();
            if !state.is_terminal() {
                self.rest(request, &order_id);
            }
            self.lookups
                .insert(request.client_id.clone(), OrderStatus { order_id, state });
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn instrument(&self, _inst: &InstId) -> Result<InstrumentSpec, GatewayError> {
        Ok(self.lock().spec)
    }

    async fn ticker(&self, _inst: &InstId) -> Result<Ticker, GatewayError> {
        let state = self.lock();
        if state.fail_ticker {
            return Err(GatewayError::NetworkError("mock ticker failure".to_string()));
        }
        Ok(state.ticker)
    }

    async fn candles(
        &self,
        _inst: &InstId,
        bar: Bar,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let state = self.lock();
        let all = state.candles.get(&bar).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn positions(&self, _inst: &InstId) -> Result<PositionSnapshot, GatewayError> {
        let state = self.lock();
        if state.fail_positions {
            return Err(GatewayError::HttpError {
                status: 503,
                message: "mock positions failure".to_string(),
            });
        }
        Ok(state.positions)
    }

    async fn open_orders(&self, _inst: &InstId) -> Result<Vec<OpenOrder>, GatewayError> {
        let state = self.lock();
        if state.fail_open_orders {
            return Err(GatewayError::NetworkError("mock open orders failure".to_string()));
        }
        Ok(state.open_orders.clone())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let mut state = self.lock();
        state.submissions.push(request.clone());
        let behavior = state.script.pop_front().unwrap_or(SubmitBehavior::Accept);
        match behavior {
            SubmitBehavior::Accept => {
                let order_id = state.assign_id();
                state.rest(request, &order_id);
                Ok(order_id)
            }
            SubmitBehavior::Duplicate(found) => {
                state.register_lookup(request, found);
                Err(GatewayError::DuplicateClientId(request.client_id.clone()))
            }
            SubmitBehavior::AckWithoutId(found) => {
                state.register_lookup(request, found);
                Ok(String::new())
            }
            SubmitBehavior::Reject(err) => Err(err),
        }
    }

    async fn order_by_client_id(
        &self,
        _inst: &InstId,
        client_id: &str,
    ) -> Result<Option<OrderStatus>, GatewayError> {
        let mut state = self.lock();
        state.lookup_calls += 1;
        Ok(state.lookups.get(client_id).cloned())
    }

    async fn cancel_order(&self, _inst: &InstId, order_id: &str) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.open_orders.retain(|o| o.order_id != order_id);
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn close_position(
        &self,
        _inst: &InstId,
        pos_side: PosSide,
        _td_mode: &str,
    ) -> Result<(), GatewayError> {
        self.lock().closed.push(pos_side);
        Ok(())
    }
}
