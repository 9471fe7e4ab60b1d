//! Order construction from a trading decision.

use std::sync::Arc;

use keel_broker::BoxFuture;
use keel_core::{CorrelationId, OrderKind, OrderSide, Price, Size};
use serde::{Deserialize, Serialize};

use crate::base::OrderBase;
use crate::context::OrderContext;
use crate::error::{OrderError, OrderResult};
use crate::limit::LimitOrder;
use crate::market::MarketOrder;
use crate::order::Order;
use crate::sticky::StickyOrder;

/// One trading decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub correlation_id: CorrelationId,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub amount: Size,
    /// Required for limit orders, ignored otherwise.
    #[serde(default)]
    pub price: Option<Price>,
}

impl OrderRequest {
    pub fn new(kind: OrderKind, side: OrderSide, amount: Size) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            kind,
            side,
            amount,
            price: None,
        }
    }

    pub fn market(side: OrderSide, amount: Size) -> Self {
        Self::new(OrderKind::Market, side, amount)
    }

    pub fn limit(side: OrderSide, amount: Size, price: Price) -> Self {
        Self::new(OrderKind::Limit, side, amount).with_price(price)
    }

    pub fn sticky(side: OrderSide, amount: Size) -> Self {
        Self::new(OrderKind::Sticky, side, amount)
    }

    #[must_use]
    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Any concrete order kind.
#[derive(Debug, Clone)]
pub enum AnyOrder {
    Market(Arc<MarketOrder>),
    Limit(Arc<LimitOrder>),
    Sticky(Arc<StickyOrder>),
}

impl AnyOrder {
    fn inner(&self) -> &dyn Order {
        match self {
            Self::Market(order) => order.as_ref(),
            Self::Limit(order) => order.as_ref(),
            Self::Sticky(order) => order.as_ref(),
        }
    }
}

impl Order for AnyOrder {
    fn base(&self) -> &OrderBase {
        self.inner().base()
    }

    fn launch(&self) -> BoxFuture<'_, OrderResult<()>> {
        self.inner().launch()
    }

    fn cancel(&self) -> BoxFuture<'_, OrderResult<()>> {
        self.inner().cancel()
    }

    fn check_order(&self) -> BoxFuture<'_, OrderResult<()>> {
        self.inner().check_order()
    }
}

/// Build the order a request describes.
pub fn create_order(request: OrderRequest, ctx: OrderContext) -> OrderResult<AnyOrder> {
    let OrderRequest {
        correlation_id,
        kind,
        side,
        amount,
        price,
    } = request;

    if !amount.is_positive() {
        return Err(OrderError::InvalidAmount(format!(
            "{amount} (must be positive)"
        )));
    }

    let order = match kind {
        OrderKind::Market => AnyOrder::Market(MarketOrder::new(correlation_id, side, amount, ctx)),
        OrderKind::Limit => {
            let price = price.ok_or(OrderError::MissingPrice)?;
            if !price.is_positive() {
                return Err(OrderError::InvalidPrice(format!("{price} (must be positive)")));
            }
            AnyOrder::Limit(LimitOrder::new(correlation_id, side, amount, price, ctx))
        }
        OrderKind::Sticky => AnyOrder::Sticky(StickyOrder::new(correlation_id, side, amount, ctx)),
    };
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_broker::MockBroker;
    use keel_core::{OrderStatus, RemoteOrder, RemoteStatus};
    use rust_decimal_macros::dec;

    fn ctx() -> (Arc<MockBroker>, OrderContext) {
        let broker = Arc::new(MockBroker::new());
        (broker.clone(), OrderContext::simulated(broker))
    }

    #[test]
    fn test_limit_without_price_fails() {
        let (_, ctx) = ctx();
        let mut request = OrderRequest::limit(OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(1)));
        request.price = None;

        assert!(matches!(create_order(request, ctx), Err(OrderError::MissingPrice)));
    }

    #[test]
    fn test_non_positive_amount_fails() {
        let (_, ctx) = ctx();
        let request = OrderRequest::market(OrderSide::Sell, Size::ZERO);

        assert!(matches!(create_order(request, ctx), Err(OrderError::InvalidAmount(_))));
    }

    #[test]
    fn test_builds_each_kind() {
        let (_, ctx) = ctx();
        let amount = Size::new(dec!(1));

        let market = create_order(OrderRequest::market(OrderSide::Buy, amount), ctx.clone()).unwrap();
        let limit = create_order(
            OrderRequest::limit(OrderSide::Buy, amount, Price::new(dec!(100))),
            ctx.clone(),
        )
        .unwrap();
        let sticky = create_order(OrderRequest::sticky(OrderSide::Sell, amount), ctx).unwrap();

        assert!(matches!(market, AnyOrder::Market(_)));
        assert!(matches!(limit, AnyOrder::Limit(ref o) if o.price() == Price::new(dec!(100))));
        assert!(matches!(sticky, AnyOrder::Sticky(_)));
        assert_eq!(sticky.kind(), OrderKind::Sticky);
        assert_eq!(sticky.status(), OrderStatus::Initializing);
    }

    #[tokio::test]
    async fn test_any_order_delegates() {
        let (broker, ctx) = ctx();
        broker.push_create_market(Ok(RemoteOrder::new("m1", RemoteStatus::Closed)));
        let request = OrderRequest::market(OrderSide::Buy, Size::new(dec!(1)))
            .with_correlation_id(CorrelationId::from("decision-7"));

        let order = create_order(request, ctx).unwrap();
        let mut events = order.event_channel();
        order.launch().await.unwrap();

        assert_eq!(order.correlation_id().as_str(), "decision-7");
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.id().unwrap().as_str(), "m1");

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            completed |= event.is_completed();
        }
        assert!(completed);
    }
}
