//! Limit order: one broker limit order at a fixed price, polled until done.
//!
//! `is_checking` and `cancel_sent` keep a fetch and a cancel from being in
//! flight together. A cancel requested while either is running (or before
//! the broker acknowledged creation) is remembered in `is_canceling` and
//! issued by whichever continuation finishes first.

use std::sync::{Arc, Weak};

use keel_broker::{BoxFuture, BrokerError};
use keel_core::{
    BrokerOrderId, CorrelationId, OrderKind, OrderSide, OrderStatus, Price, RemoteOrder,
    RemoteStatus, Size,
};
use keel_telemetry::Metrics;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::base::OrderBase;
use crate::context::OrderContext;
use crate::error::{OrderError, OrderResult};
use crate::order::{Order, OrderHandler};
use crate::timer::PollTimer;

#[derive(Debug, Default)]
struct LimitState {
    launched: bool,
    is_checking: bool,
    /// Caller asked to cancel.
    is_canceling: bool,
    /// A broker cancel is in flight.
    cancel_sent: bool,
}

#[derive(Debug)]
pub struct LimitOrder {
    base: OrderBase,
    price: Price,
    state: Mutex<LimitState>,
    this: Weak<LimitOrder>,
}

impl LimitOrder {
    pub fn new(
        correlation_id: CorrelationId,
        side: OrderSide,
        amount: Size,
        price: Price,
        ctx: OrderContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base: OrderBase::new(correlation_id, side, OrderKind::Limit, amount, ctx),
            price,
            state: Mutex::new(LimitState::default()),
            this: this.clone(),
        })
    }

    pub fn price(&self) -> Price {
        self.price
    }

    /// Cancel intent is recorded and still waiting to be sent.
    #[must_use]
    pub fn cancel_pending(&self) -> bool {
        let state = self.state.lock();
        state.is_canceling && !state.cancel_sent
    }

    /// Claim the right to send the pending cancel.
    ///
    /// `respect_check` is false for continuations of the check itself.
    fn take_cancel(&self, respect_check: bool) -> Option<BrokerOrderId> {
        if self.base.is_terminal() {
            return None;
        }
        let id = self.base.id()?;
        let mut state = self.state.lock();
        if !state.is_canceling || state.cancel_sent || (respect_check && state.is_checking) {
            return None;
        }
        state.cancel_sent = true;
        Some(id)
    }

    async fn send_pending_cancel(&self, respect_check: bool) -> OrderResult<()> {
        match self.take_cancel(respect_check) {
            Some(id) => self.cancel_order(id).await,
            None => Ok(()),
        }
    }

    fn start_polling(&self) {
        if !self.base.ctx().is_realtime() {
            return;
        }
        let period = self.base.broker().intervals().order_sync;
        let this = self.this.clone();
        self.base.ensure_timer(|| PollTimer::spawn(this, period));
    }
}

impl Order for LimitOrder {
    fn base(&self) -> &OrderBase {
        &self.base
    }

    fn launch(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                if state.launched {
                    return Err(OrderError::AlreadyLaunched(self.base.correlation_id().clone()));
                }
                state.launched = true;
            }

            let amount = self.base.amount();
            Metrics::order_launched(OrderKind::Limit.as_str(), self.base.side().as_str());
            info!(
                correlation_id = %self.base.correlation_id(),
                side = %self.base.side(),
                %amount,
                price = %self.price,
                "Launching limit order"
            );

            if self.base.reject_below_min(amount) {
                return Ok(());
            }
            self.create_limit_order(amount, self.price).await
        })
    }

    fn cancel(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.base.is_terminal() {
                return Ok(());
            }
            self.state.lock().is_canceling = true;
            self.send_pending_cancel(true).await
        })
    }

    fn check_order(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.base.is_terminal() {
                return Ok(());
            }

            let id = {
                let mut state = self.state.lock();
                if state.is_canceling {
                    None
                } else if state.is_checking {
                    return Ok(());
                } else {
                    match self.base.id() {
                        Some(id) => {
                            state.is_checking = true;
                            Some(id)
                        }
                        None => return Ok(()),
                    }
                }
            };
            let Some(id) = id else {
                return self.send_pending_cancel(true).await;
            };

            let result = self.fetch_order(id).await;
            self.state.lock().is_checking = false;
            result?;

            self.send_pending_cancel(false).await
        })
    }
}

impl OrderHandler for LimitOrder {
    fn handle_create_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                }
                RemoteStatus::Canceled => {
                    self.base.order_canceled_or_filled();
                }
                RemoteStatus::Open => {
                    self.base.set_status(OrderStatus::Open, None);
                    self.start_polling();
                    self.send_pending_cancel(true).await?;
                }
            }
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
            self.state.lock().cancel_sent = false;
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                }
                RemoteStatus::Canceled => {
                    self.base.order_canceled_or_filled();
                }
                RemoteStatus::Open => {
                    warn!(
                        correlation_id = %self.base.correlation_id(),
                        broker_id = %remote.id,
                        "Broker still reports order open after cancel, retrying on next poll"
                    );
                }
            }
            Ok(())
        })
    }

    fn handle_cancel_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.state.lock().cancel_sent = false;
            if err.is_not_found() {
                self.base.order_filled();
                return Ok(());
            }
            if err.is_domain() {
                warn!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    "Cancel refused, retrying on next poll"
                );
                return Ok(());
            }
            self.base.fail(err)
        })
    }

    fn handle_fetch_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                }
                RemoteStatus::Canceled => {
                    self.base.order_canceled_or_filled();
                }
                RemoteStatus::Open => {}
            }
            Ok(())
        })
    }

    fn handle_fetch_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if err.is_domain() {
                warn!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    "Order not visible yet, retrying on next poll"
                );
                return Ok(());
            }
            self.base.fail(err)
        })
    }
}
