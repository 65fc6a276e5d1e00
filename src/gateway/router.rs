//! Order router: the single path from engine intents to the exchange.
//!
//! Applies the shared alignment rules, assigns client ids, resolves duplicate
//! submissions by lookup, and implements tag-based cancellation on top of the
//! raw gateway.

use super::{ClientIdGenerator, ErrorKind, ExchangeGateway, GatewayError};
use crate::domain::{
    align_size, effective_price, Decimal, InstId, InstrumentSpec, MakerOffset, OpenOrder,
    OrderKind, OrderRequest, OrderState, OrderStatus, OrderTag, PosSide, Side,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A resting limit order at a raw ladder price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitIntent {
    pub side: Side,
    pub pos_side: PosSide,
    pub raw_price: Decimal,
    pub size: Decimal,
    pub tag: OrderTag,
}

/// A market order that opens or reduces one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketIntent {
    pub side: Side,
    pub pos_side: PosSide,
    pub size: Decimal,
    pub reduce_only: bool,
    pub tag: OrderTag,
}

impl MarketIntent {
    /// Increase `pos_side` by `size`.
    pub fn open(pos_side: PosSide, size: Decimal, tag: OrderTag) -> Self {
        Self {
            side: pos_side.open_side(),
            pos_side,
            size,
            reduce_only: false,
            tag,
        }
    }

    /// Reduce `pos_side` by `size`.
    pub fn reduce(pos_side: PosSide, size: Decimal, tag: OrderTag) -> Self {
        Self {
            side: pos_side.close_side(),
            pos_side,
            size,
            reduce_only: true,
            tag,
        }
    }
}

/// Outcome of a submission that did not fail at the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Placed { order_id: String, client_id: String },
    /// The intent failed local validation and was never sent.
    Dropped { reason: String },
}

impl Submission {
    pub fn is_placed(&self) -> bool {
        matches!(self, Submission::Placed { .. })
    }
}

#[derive(Debug)]
pub struct OrderRouter {
    gateway: Arc<dyn ExchangeGateway>,
    inst: InstId,
    td_mode: String,
    spec: InstrumentSpec,
    maker: MakerOffset,
    ids: ClientIdGenerator,
}

impl OrderRouter {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        inst: InstId,
        td_mode: impl Into<String>,
        spec: InstrumentSpec,
        ids: ClientIdGenerator,
    ) -> Self {
        Self {
            gateway,
            inst,
            td_mode: td_mode.into(),
            spec,
            maker: MakerOffset::default(),
            ids,
        }
    }

    pub fn inst(&self) -> &InstId {
        &self.inst
    }

    pub fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    pub fn maker(&self) -> MakerOffset {
        self.maker
    }

    pub fn set_maker(&mut self, maker: MakerOffset) {
        self.maker = maker;
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    /// The price a limit intent at `raw` rests at. Same function the ladder
    /// uses for liveness.
    pub fn effective_price(&self, side: Side, raw: Decimal) -> Decimal {
        effective_price(side, raw, &self.spec, self.maker)
    }

    pub async fn place_limit(&self, intent: LimitIntent) -> Result<Submission, GatewayError> {
        let price = self.effective_price(intent.side, intent.raw_price);
        let Some(size) = align_size(intent.size, self.spec.lot_size, self.spec.min_size) else {
            return Ok(self.drop_intent(intent.tag, intent.pos_side, intent.size));
        };
        let request = OrderRequest {
            inst: self.inst.clone(),
            td_mode: self.td_mode.clone(),
            side: intent.side,
            pos_side: intent.pos_side,
            kind: OrderKind::Limit {
                price,
                post_only: self.maker.post_only,
            },
            size,
            reduce_only: false,
            tag: intent.tag,
            client_id: String::new(),
        };
        self.submit(request).await
    }

    /// Market order. Opening sizes are lifted to the exchange minimum;
    /// reduce-only sizes must already be lot-aligned by the caller.
    pub async fn place_market(&self, intent: MarketIntent) -> Result<Submission, GatewayError> {
        let size = if intent.reduce_only {
            Some(intent.size).filter(|s| s.is_positive())
        } else {
            align_size(intent.size, self.spec.lot_size, self.spec.min_size)
        };
        let Some(size) = size else {
            return Ok(self.drop_intent(intent.tag, intent.pos_side, intent.size));
        };
        let request = OrderRequest {
            inst: self.inst.clone(),
            td_mode: self.td_mode.clone(),
            side: intent.side,
            pos_side: intent.pos_side,
            kind: OrderKind::Market,
            size,
            reduce_only: intent.reduce_only,
            tag: intent.tag,
            client_id: String::new(),
        };
        self.submit(request).await
    }

    fn drop_intent(&self, tag: OrderTag, pos_side: PosSide, size: Decimal) -> Submission {
        warn!(
            tag = %tag,
            pos_side = %pos_side,
            size = %size,
            "Dropping order intent with non-positive size"
        );
        Submission::Dropped {
            reason: format!("non-positive size {}", size),
        }
    }

    /// Submit with duplicate resolution: on a duplicate id or an ack without
    /// an order id, look the order up; a non-terminal order counts as placed.
    /// Otherwise one retry with a fresh id, never more.
    async fn submit(&self, mut request: OrderRequest) -> Result<Submission, GatewayError> {
        for attempt in 0..2 {
            request.client_id = self.ids.next(
                &self.inst,
                request.side,
                request.price(),
                request.size,
                request.tag,
            );
            match self.gateway.submit_order(&request).await {
                Ok(order_id) if !order_id.is_empty() => {
                    debug!(
                        client_id = %request.client_id,
                        order_id = %order_id,
                        tag = %request.tag,
                        "Order accepted"
                    );
                    return Ok(Submission::Placed {
                        order_id,
                        client_id: request.client_id,
                    });
                }
                Ok(_) => {
                    debug!(client_id = %request.client_id, "Ack without order id, confirming");
                }
                Err(e) if e.kind() == ErrorKind::Duplicate => {
                    info!(client_id = %request.client_id, "Duplicate client id, confirming");
                }
                Err(e) => return Err(e),
            }

            match self
                .gateway
                .order_by_client_id(&self.inst, &request.client_id)
                .await
            {
                Ok(Some(status)) if confirms(&request, &status) => {
                    return Ok(Submission::Placed {
                        order_id: status.order_id,
                        client_id: request.client_id,
                    });
                }
                Ok(found) => {
                    debug!(
                        client_id = %request.client_id,
                        attempt,
                        state = ?found.map(|s| s.state),
                        "Order not confirmed"
                    );
                }
                Err(e) => {
                    warn!(client_id = %request.client_id, error = %e, "Lookup by client id failed");
                }
            }
        }
        Err(GatewayError::Unconfirmed {
            client_id: request.client_id,
        })
    }

    pub async fn open_orders(&self) -> Result<Vec<OpenOrder>, GatewayError> {
        self.gateway.open_orders(&self.inst).await
    }

    /// Prices of resting orders carrying `tag`, fresh from the exchange.
    pub async fn live_prices(&self, tag: OrderTag) -> Result<BTreeSet<Decimal>, GatewayError> {
        Ok(self
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| o.has_tag(tag))
            .map(|o| o.price)
            .collect())
    }

    pub async fn cancel_by_tag(&self, tag: OrderTag) -> Result<usize, GatewayError> {
        self.cancel_where(|o| o.has_tag(tag)).await
    }

    pub async fn cancel_by_tag_and_side(
        &self,
        tag: OrderTag,
        pos_side: PosSide,
    ) -> Result<usize, GatewayError> {
        self.cancel_where(|o| o.has_tag(tag) && o.pos_side == Some(pos_side))
            .await
    }

    /// One query, then cancel everything matching any of `tags`.
    pub async fn cancel_by_tags(&self, tags: &[OrderTag]) -> Result<usize, GatewayError> {
        self.cancel_where(|o| tags.iter().any(|t| o.has_tag(*t))).await
    }

    pub async fn cancel_by_tags_and_side(
        &self,
        tags: &[OrderTag],
        pos_side: PosSide,
    ) -> Result<usize, GatewayError> {
        self.cancel_where(|o| o.pos_side == Some(pos_side) && tags.iter().any(|t| o.has_tag(*t)))
            .await
    }

    pub async fn cancel_all(&self) -> Result<usize, GatewayError> {
        self.cancel_where(|_| true).await
    }

    /// Cancel matching orders. A single failed cancel is logged and skipped;
    /// only the listing failure is returned.
    async fn cancel_where<F>(&self, pred: F) -> Result<usize, GatewayError>
    where
        F: Fn(&OpenOrder) -> bool,
    {
        let orders = self.open_orders().await?;
        let mut cancelled = 0;
        for order in orders.iter().filter(|o| pred(o)) {
            match self.gateway.cancel_order(&self.inst, &order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(
                    order_id = %order.order_id,
                    tag = %order.label(),
                    error = %e,
                    "Cancel failed"
                ),
            }
        }
        Ok(cancelled)
    }

    pub async fn close_position(&self, pos_side: PosSide) -> Result<(), GatewayError> {
        self.gateway
            .close_position(&self.inst, pos_side, &self.td_mode)
            .await
    }
}

/// A lookup confirms a submission when the order exists and is still
/// working. A filled market order also counts.
fn confirms(request: &OrderRequest, status: &OrderStatus) -> bool {
    if status.order_id.is_empty() {
        return false;
    }
    match request.kind {
        OrderKind::Market => status.state != OrderState::Canceled,
        OrderKind::Limit { .. } => !status.state.is_terminal(),
    }
}
