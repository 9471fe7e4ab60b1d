//! Sticky order: a limit order kept one tick better than the book.
//!
//! Whenever a poll finds the book has moved away, the current broker order
//! is canceled and a new one is placed for whatever is left to fill, so the
//! fills of every broker order add up to the requested amount.
//!
//! At most one of these owns the broker at a time (all behind one mutex):
//! - `is_checking`: a poll fetch is in flight
//! - `is_canceling`: the caller's cancel is in flight
//! - `is_moving`: a reprice (cancel + re-place) is in progress
//!
//! `cancel_requested` records the caller's intent. It is issued by whoever
//! holds the broker when it is released.

use std::sync::{Arc, Weak};

use keel_broker::{BoxFuture, BrokerError};
use keel_core::{
    BrokerOrderId, CorrelationId, OrderKind, OrderSide, OrderStatus, Price, RemoteOrder,
    RemoteStatus, Size, Ticker,
};
use keel_telemetry::Metrics;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::base::OrderBase;
use crate::context::OrderContext;
use crate::error::{OrderError, OrderResult};
use crate::order::{Order, OrderHandler};
use crate::timer::PollTimer;

/// One tick better than the book, without crossing the opposite side.
///
/// BUY bids `bid + tick` unless that reaches the ask, in which case it joins
/// the bid. SELL mirrors this on the ask.
#[must_use]
pub fn sticky_price(side: OrderSide, ticker: &Ticker, tick: Price) -> Price {
    match side {
        OrderSide::Buy => {
            let price = ticker.bid + tick;
            if price >= ticker.ask {
                ticker.bid
            } else {
                price
            }
        }
        OrderSide::Sell => {
            let price = ticker.ask - tick;
            if price <= ticker.bid {
                ticker.ask
            } else {
                price
            }
        }
    }
}

#[derive(Debug, Default)]
struct StickyState {
    launched: bool,
    is_checking: bool,
    is_canceling: bool,
    is_moving: bool,
    cancel_requested: bool,
    /// Price of the current broker order.
    price: Option<Price>,
}

impl StickyState {
    fn is_busy(&self) -> bool {
        self.is_checking || self.is_canceling || self.is_moving
    }
}

#[derive(Debug)]
pub struct StickyOrder {
    base: OrderBase,
    state: Mutex<StickyState>,
    this: Weak<StickyOrder>,
}

impl StickyOrder {
    pub fn new(
        correlation_id: CorrelationId,
        side: OrderSide,
        amount: Size,
        ctx: OrderContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base: OrderBase::new(correlation_id, side, OrderKind::Sticky, amount, ctx),
            state: Mutex::new(StickyState::default()),
            this: this.clone(),
        })
    }

    /// Price of the current broker order.
    pub fn price(&self) -> Option<Price> {
        self.state.lock().price
    }

    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.state.lock().is_moving
    }

    /// Record the caller's cancel and claim the broker cancel if nothing
    /// else is talking to the broker for this order.
    fn request_cancel(&self) -> Option<BrokerOrderId> {
        let id = self.base.id();
        let mut state = self.state.lock();
        state.cancel_requested = true;
        if state.is_busy() {
            return None;
        }
        let id = id?;
        state.is_canceling = true;
        Some(id)
    }

    /// Claim the broker cancel for a recorded intent.
    ///
    /// With `from_move` the create continuation of a reprice hands its slot
    /// over to the cancel.
    fn issue_pending_cancel(&self, from_move: bool) -> Option<BrokerOrderId> {
        if self.base.is_terminal() {
            return None;
        }
        let id = self.base.id()?;
        let mut state = self.state.lock();
        if !state.cancel_requested || state.is_canceling || state.is_checking {
            return None;
        }
        if state.is_moving && !from_move {
            return None;
        }
        state.is_moving = false;
        state.is_canceling = true;
        Some(id)
    }

    async fn send_cancel(&self, ticket: Option<BrokerOrderId>) -> OrderResult<()> {
        match ticket {
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

    /// Place a limit order for the remainder at the current sticky price.
    async fn place(&self) -> OrderResult<()> {
        let broker = self.base.broker();
        let ticker = match broker.fetch_ticker().await {
            Ok(ticker) => ticker,
            Err(err) => {
                self.base.broker_failed("ticker", &err);
                return self.base.fail(err);
            }
        };

        let limits = broker.market_limits();
        let price = sticky_price(self.base.side(), &ticker, limits.tick());
        let remainder = self.base.remaining();

        if remainder.is_zero() {
            self.base.order_filled();
            return Ok(());
        }
        if remainder < limits.amount_min {
            if self.base.total_filled().is_positive() {
                self.base.order_filled();
            } else {
                self.base.order_rejected(&format!(
                    "amount {remainder} below market minimum {}",
                    limits.amount_min
                ));
            }
            return Ok(());
        }

        self.state.lock().price = Some(price);
        info!(
            correlation_id = %self.base.correlation_id(),
            side = %self.base.side(),
            amount = %remainder,
            %price,
            bid = %ticker.bid,
            ask = %ticker.ask,
            "Placing sticky order"
        );
        self.create_limit_order(remainder, price).await
    }

    /// Cancel the current broker order and re-place the remainder at the
    /// current sticky price.
    ///
    /// No-op while a cancel is pending or in flight, while another move is
    /// running, once terminal, or before the first broker acknowledgement.
    pub async fn move_order(&self) -> OrderResult<()> {
        if self.base.is_terminal() {
            return Ok(());
        }
        let Some(id) = self.base.id() else {
            return Ok(());
        };
        {
            let mut state = self.state.lock();
            if state.cancel_requested || state.is_busy() {
                return Ok(());
            }
            state.is_moving = true;
        }

        Metrics::sticky_reprice(self.base.side().as_str());
        info!(
            correlation_id = %self.base.correlation_id(),
            broker_id = %id,
            filled = %self.base.total_filled(),
            "Repricing sticky order"
        );

        let result = self.reprice(id).await;
        self.state.lock().is_moving = false;
        result
    }

    async fn reprice(&self, id: BrokerOrderId) -> OrderResult<()> {
        self.cancel_order(id).await?;
        if self.base.is_terminal() {
            return Ok(());
        }
        if self.base.current_remote_status() == Some(RemoteStatus::Open) {
            warn!(
                correlation_id = %self.base.correlation_id(),
                "Cancel did not take, keeping current sticky order"
            );
            return Ok(());
        }

        let cancel_requested = self.state.lock().cancel_requested;
        if cancel_requested {
            self.base.order_canceled_or_filled();
            return Ok(());
        }
        self.place().await
    }

    /// Reprice if the book moved away from our order.
    async fn follow_book(&self) -> OrderResult<()> {
        let broker = self.base.broker();
        let ticker = match broker.fetch_ticker().await {
            Ok(ticker) => ticker,
            Err(err) => {
                self.base.broker_failed("ticker", &err);
                if err.is_domain() {
                    return Ok(());
                }
                return self.base.fail(err);
            }
        };

        let ours = self.state.lock().price;
        let Some(ours) = ours else {
            return Ok(());
        };
        let side = self.base.side();
        let top = match side {
            OrderSide::Buy => ticker.bid,
            OrderSide::Sell => ticker.ask,
        };
        if top == ours {
            return Ok(());
        }
        let target = sticky_price(side, &ticker, broker.market_limits().tick());
        if target == ours {
            return Ok(());
        }

        debug!(
            correlation_id = %self.base.correlation_id(),
            %ours,
            %target,
            bid = %ticker.bid,
            ask = %ticker.ask,
            "Book moved away from sticky order"
        );
        self.move_order().await
    }
}

impl Order for StickyOrder {
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

            Metrics::order_launched(OrderKind::Sticky.as_str(), self.base.side().as_str());
            info!(
                correlation_id = %self.base.correlation_id(),
                side = %self.base.side(),
                amount = %self.base.amount(),
                "Launching sticky order"
            );
            self.place().await
        })
    }

    fn cancel(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.base.is_terminal() {
                return Ok(());
            }
            let ticket = self.request_cancel();
            self.send_cancel(ticket).await
        })
    }

    fn check_order(&self) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if self.base.is_terminal() {
                return Ok(());
            }
            let Some(id) = self.base.id() else {
                return Ok(());
            };

            let fetch = {
                let mut state = self.state.lock();
                if state.is_busy() {
                    return Ok(());
                }
                if state.cancel_requested {
                    false
                } else {
                    state.is_checking = true;
                    true
                }
            };
            if !fetch {
                let ticket = self.issue_pending_cancel(false);
                return self.send_cancel(ticket).await;
            }

            // The fetch handlers release `is_checking` before reacting, so a
            // reprice takes the broker over from the poll.
            self.fetch_order(id).await?;

            let ticket = self.issue_pending_cancel(false);
            self.send_cancel(ticket).await
        })
    }
}

impl OrderHandler for StickyOrder {
    fn handle_create_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                }
                // Terminal even in the middle of a move.
                RemoteStatus::Canceled => {
                    self.base.order_canceled_or_filled();
                }
                RemoteStatus::Open => {
                    self.base.set_status(OrderStatus::Open, None);
                    self.start_polling();
                    let ticket = self.issue_pending_cancel(true);
                    self.send_cancel(ticket).await?;
                }
            }
            Ok(())
        })
    }

    fn handle_create_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            if !err.is_unplaceable() {
                return self.base.fail(err);
            }
            if self.base.total_filled().is_positive() {
                info!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    filled = %self.base.total_filled(),
                    "Remainder not placeable, completing with prior fills"
                );
                self.base.order_filled();
            } else {
                self.base.order_rejected(&err.to_string());
            }
            Ok(())
        })
    }

    fn handle_cancel_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            let repricing = {
                let mut state = self.state.lock();
                state.is_canceling = false;
                state.is_moving
            };
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                }
                RemoteStatus::Canceled => {
                    if self.base.remaining().is_zero() {
                        self.base.order_filled();
                    } else if !repricing {
                        self.base.order_canceled(self.base.total_filled().is_positive());
                    }
                }
                RemoteStatus::Open => {
                    warn!(
                        correlation_id = %self.base.correlation_id(),
                        broker_id = %remote.id,
                        "Broker still reports order open after cancel"
                    );
                }
            }
            Ok(())
        })
    }

    fn handle_cancel_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.state.lock().is_canceling = false;
            if err.is_not_found() {
                self.base.order_filled();
                return Ok(());
            }
            if err.is_domain() {
                warn!(
                    correlation_id = %self.base.correlation_id(),
                    error = %err,
                    "Cancel refused"
                );
                return Ok(());
            }
            self.base.fail(err)
        })
    }

    fn handle_fetch_success(&self, remote: RemoteOrder) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.state.lock().is_checking = false;
            self.base.register(&remote);
            match remote.status {
                RemoteStatus::Closed => {
                    self.base.order_filled();
                    Ok(())
                }
                RemoteStatus::Canceled => {
                    self.base.order_canceled_or_filled();
                    Ok(())
                }
                RemoteStatus::Open => self.follow_book().await,
            }
        })
    }

    fn handle_fetch_error(&self, err: BrokerError) -> BoxFuture<'_, OrderResult<()>> {
        Box::pin(async move {
            self.state.lock().is_checking = false;
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
