//! Market order: one broker market order for the full amount.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keel_broker::{BoxFuture, BrokerError};
use keel_core::{CorrelationId, OrderKind, OrderSide, OrderStatus, RemoteOrder, RemoteStatus, Size};
use keel_telemetry::Metrics;
use tracing::{info, warn};

use crate::base::OrderBase;
use crate::context::OrderContext;
use crate::error::{OrderError, OrderResult};
use crate::order::{Order, OrderHandler};

#[derive(Debug)]
pub struct MarketOrder {
    base: OrderBase,
    launched: AtomicBool,
}

impl MarketOrder {
    pub fn new(
        correlation_id: CorrelationId,
        side: OrderSide,
        amount: Size,
        ctx: OrderContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: OrderBase::new(correlation_id, side, OrderKind::Market, amount, ctx),
            launched: AtomicBool::new(false),
        })
    }

    /// Map a broker answer onto the order status.
    fn settle(&self, remote: &RemoteOrder) {
        self.base.register(remote);
        match remote.status {
            RemoteStatus::Closed => {
                self.base.order_filled();
            }
            RemoteStatus::Canceled => {
                self.base.order_canceled(self.base.total_filled().is_positive());
            }
            RemoteStatus::Open => {
                self.base.set_status(OrderStatus::Open, None);
            }
        }
    }
}

impl Order for MarketOrder {
    fn base(&self) -> &OrderBase {
        &self.base
    }

    fn launch(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.launched.swap(true, Ordering::SeqCst) {
                return Err(OrderError::AlreadyLaunched(self.base.correlation_id().clone()));
            }

            let amount = self.base.amount();
            Metrics::order_launched(OrderKind::Market.as_str(), self.base.side().as_str());
            info!(
                correlation_id = %self.base.correlation_id(),
                side = %self.base.side(),
                %amount,
                "Launching market order"
            );

            if self.base.reject_below_min(amount) {
                return Ok(());
            }
            self.create_market_order(amount).await
        })
    }

    fn cancel(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.base.is_terminal() {
                return Ok(());
            }
            match self.base.id() {
                Some(id) => self.cancel_order(id).await,
                None => Ok(()),
            }
        })
    }

    fn check_order(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

impl OrderHandler for MarketOrder {
    fn handle_create_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.settle(&remote);
            Ok(())
        })
    }

    fn handle_create_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if err.is_unplaceable() {
                self.base.order_rejected(&err.to_string());
                return Ok(());
            }
            self.base.fail(err)
        })
    }

    fn handle_cancel_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.settle(&remote);
            Ok(())
        })
    }

    fn handle_cancel_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if err.is_not_found() {
                self.base.order_filled();
                return Ok(());
            }
            if err.is_domain() {
                warn!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    "Market order cancel refused"
                );
                return Ok(());
            }
            self.base.fail(err)
        })
    }

    fn handle_fetch_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.settle(&remote);
            Ok(())
        })
    }

    fn handle_fetch_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if err.is_domain() {
                warn!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    "Market order fetch refused"
                );
                return Ok(());
            }
            self.base.fail(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Completion, OrderEvent};
    use keel_broker::{BrokerCall, MockBroker};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn setup(amount: rust_decimal::Decimal) -> (Arc<MockBroker>, Arc<MarketOrder>) {
        let broker = Arc::new(MockBroker::new());
        let order = MarketOrder::new(
            CorrelationId::from("m1"),
            OrderSide::Buy,
            Size::new(amount),
            OrderContext::simulated(broker.clone()),
        );
        (broker, order)
    }

    fn record(order: &MarketOrder) -> Arc<Mutex<Vec<OrderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        order.subscribe(move |e| sink.lock().push(e.clone()));
        seen
    }

    #[tokio::test]
    async fn test_closed_completes_filled_once() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Ok(RemoteOrder::new("b1", RemoteStatus::Closed)
            .with_filled(Size::new(dec!(1)))));
        let seen = record(&order);

        order.launch().await.unwrap();
        order.cancel().await.unwrap();
        order.check_order().await.unwrap();

        let completions: Vec<_> = seen.lock().iter().filter(|e| e.is_completed()).cloned().collect();
        assert_eq!(
            completions,
            vec![OrderEvent::Completed(Completion {
                status: OrderStatus::Filled,
                filled: true,
                partially_filled: false,
            })]
        );
        assert_eq!(
            broker.calls(),
            vec![BrokerCall::CreateMarket {
                side: OrderSide::Buy,
                amount: Size::new(dec!(1)),
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_order_is_rejected() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Err(BrokerError::InvalidOrder("too small".into())));
        let seen = record(&order);

        order.launch().await.unwrap();

        let events = seen.lock().clone();
        assert!(matches!(&events[0], OrderEvent::Invalid(reason) if reason.contains("too small")));
        assert_eq!(
            events.last(),
            Some(&OrderEvent::Completed(Completion {
                status: OrderStatus::Rejected,
                filled: false,
                partially_filled: false,
            }))
        );
    }

    #[tokio::test]
    async fn test_below_min_rejected_without_broker_call() {
        let (broker, order) = setup(dec!(0.0001));

        order.launch().await.unwrap();

        assert_eq!(order.status(), OrderStatus::Rejected);
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_create_error_propagates() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Err(BrokerError::RateLimited));

        let err = order.launch().await.unwrap_err();
        assert!(matches!(err, OrderError::Broker(BrokerError::RateLimited)));
        assert_eq!(order.status(), OrderStatus::Error);
    }

    #[tokio::test]
    async fn test_second_launch_fails() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Ok(RemoteOrder::new("b1", RemoteStatus::Closed)));

        order.launch().await.unwrap();
        let err = order.launch().await.unwrap_err();
        assert!(matches!(err, OrderError::AlreadyLaunched(_)));
        assert_eq!(broker.create_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_not_found_means_filled() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Ok(RemoteOrder::new("b1", RemoteStatus::Open)));
        broker.push_cancel(Err(BrokerError::OrderNotFound("b1".into())));

        order.launch().await.unwrap();
        assert_eq!(order.status(), OrderStatus::Open);

        order.cancel().await.unwrap();
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(broker.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_create_not_found_is_fatal() {
        let (broker, order) = setup(dec!(1));
        broker.push_create_market(Err(BrokerError::OrderNotFound("m1".into())));

        let result = order.launch().await;

        assert!(matches!(result, Err(OrderError::Broker(BrokerError::OrderNotFound(_)))));
        assert_eq!(order.status(), OrderStatus::Error);
    }
}
