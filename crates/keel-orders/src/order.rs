//! Order traits.
//!
//! `Order` is the caller-facing surface: launch once, optionally cancel, and
//! observe lifecycle events. `OrderHandler` is implemented by each concrete
//! kind; its provided broker-call wrappers route every broker answer to the
//! kind's success or error handler.

use keel_broker::{BoxFuture, BrokerError};
use keel_core::{
    BrokerOrderId, CorrelationId, EventBus, OrderKind, OrderSide, OrderStatus, Price,
    RemoteOrder, Size,
};
use tokio::sync::mpsc;

use crate::base::OrderBase;
use crate::error::{OrderError, OrderResult};
use crate::event::OrderEvent;
use crate::summary::{build_summary, OrderSummary};

/// A trading decision being executed against the broker.
pub trait Order: Send + Sync {
    fn base(&self) -> &OrderBase;

    /// Submit the order. May be called once.
    fn launch(&self) -> BoxFuture<'_, OrderResult<()>>;

    /// Request cancellation. Advisory and idempotent.
    fn cancel(&self) -> BoxFuture<'_, OrderResult<()>>;

    /// Poll the broker once.
    fn check_order(&self) -> BoxFuture<'_, OrderResult<()>>;

    fn correlation_id(&self) -> &CorrelationId {
        self.base().correlation_id()
    }

    fn side(&self) -> OrderSide {
        self.base().side()
    }

    fn kind(&self) -> OrderKind {
        self.base().kind()
    }

    fn amount(&self) -> Size {
        self.base().amount()
    }

    fn status(&self) -> OrderStatus {
        self.base().status()
    }

    /// Current broker order id.
    fn id(&self) -> Option<BrokerOrderId> {
        self.base().id()
    }

    fn total_filled(&self) -> Size {
        self.base().total_filled()
    }

    fn events(&self) -> &EventBus<OrderEvent> {
        self.base().events()
    }

    fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&OrderEvent) + Send + Sync + 'static,
        Self: Sized,
    {
        self.base().events().subscribe(listener);
    }

    /// Receive events emitted from now on.
    fn event_channel(&self) -> mpsc::UnboundedReceiver<OrderEvent> {
        self.base().events().channel()
    }

    /// Summarise the fills of every broker order this order placed.
    fn summary(&self) -> BoxFuture<'_, OrderResult<OrderSummary>> {
        Box::pin(async move {
            let base = self.base();
            let (ids, since) = base.ledger_snapshot();
            let since =
                since.ok_or_else(|| OrderError::NoTransactions(base.correlation_id().clone()))?;
            build_summary(
                base.broker().as_ref(),
                base.correlation_id(),
                base.side(),
                &ids,
                since,
            )
            .await
        })
    }
}

/// Per-kind reactions to broker answers.
pub trait OrderHandler: Order {
    fn handle_create_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>>;

    fn handle_create_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>>;

    fn handle_cancel_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>>;

    fn handle_cancel_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>>;

    fn handle_fetch_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>>;

    fn handle_fetch_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>>;

    fn create_limit_order(&self, amount: Size, price: Price) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            let base = self.base();
            match base
                .broker()
                .create_limit_order(base.side(), amount, price)
                .await
            {
                Ok(remote) => self.handle_create_success(remote).await,
                Err(err) => {
                    base.broker_failed("create_limit", &err);
                    self.handle_create_error(err).await
                }
            }
        })
    }

    fn create_market_order(&self, amount: Size) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            let base = self.base();
            match base.broker().create_market_order(base.side(), amount).await {
                Ok(remote) => self.handle_create_success(remote).await,
                Err(err) => {
                    base.broker_failed("create_market", &err);
                    self.handle_create_error(err).await
                }
            }
        })
    }

    fn cancel_order(&self, id: BrokerOrderId) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            let base = self.base();
            match base.broker().cancel_order(id).await {
                Ok(remote) => self.handle_cancel_success(remote).await,
                Err(err) => {
                    base.broker_failed("cancel", &err);
                    self.handle_cancel_error(err).await
                }
            }
        })
    }

    fn fetch_order(&self, id: BrokerOrderId) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            let base = self.base();
            match base.broker().fetch_order(id).await {
                Ok(remote) => self.handle_fetch_success(remote).await,
                Err(err) => {
                    base.broker_failed("fetch", &err);
                    self.handle_fetch_error(err).await
                }
            }
        })
    }
}
