//! Shared order state: status FSM, fill ledger, poll timer and events.
//!
//! Every concrete kind embeds one `OrderBase`. State lives behind
//! `parking_lot` mutexes that are never held across an `.await`, and every
//! event is emitted after the locks are released so listeners may call back
//! into the order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use keel_broker::{BrokerError, DynBroker};
use keel_core::{
    BrokerOrderId, CorrelationId, EventBus, OrderKind, OrderSide, OrderStatus, RemoteOrder,
    RemoteStatus, Size, Transaction,
};
use keel_telemetry::Metrics;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::OrderContext;
use crate::error::{OrderError, OrderResult};
use crate::event::{Completion, OrderEvent};
use crate::timer::PollTimer;

#[derive(Debug, Default)]
struct Ledger {
    /// Id of the current broker order.
    id: Option<BrokerOrderId>,
    status: OrderStatus,
    transactions: HashMap<BrokerOrderId, Transaction>,
}

impl Ledger {
    fn total_filled(&self) -> Size {
        self.transactions.values().map(|t| t.filled).sum()
    }
}

pub struct OrderBase {
    correlation_id: CorrelationId,
    side: OrderSide,
    kind: OrderKind,
    amount: Size,
    ctx: OrderContext,
    ledger: Mutex<Ledger>,
    timer: Mutex<Option<PollTimer>>,
    events: EventBus<OrderEvent>,
}

impl OrderBase {
    pub fn new(
        correlation_id: CorrelationId,
        side: OrderSide,
        kind: OrderKind,
        amount: Size,
        ctx: OrderContext,
    ) -> Self {
        Self {
            correlation_id,
            side,
            kind,
            amount,
            ctx,
            ledger: Mutex::new(Ledger::default()),
            timer: Mutex::new(None),
            events: EventBus::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    /// Requested amount.
    pub fn amount(&self) -> Size {
        self.amount
    }

    pub fn ctx(&self) -> &OrderContext {
        &self.ctx
    }

    pub fn broker(&self) -> &DynBroker {
        &self.ctx.broker
    }

    pub fn events(&self) -> &EventBus<OrderEvent> {
        &self.events
    }

    pub fn status(&self) -> OrderStatus {
        self.ledger.lock().status
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn id(&self) -> Option<BrokerOrderId> {
        self.ledger.lock().id.clone()
    }

    /// Sum of filled across every broker order.
    pub fn total_filled(&self) -> Size {
        self.ledger.lock().total_filled()
    }

    /// Amount still to execute, floored at zero.
    pub fn remaining(&self) -> Size {
        self.amount.saturating_sub(self.total_filled())
    }

    pub fn transaction(&self, id: &BrokerOrderId) -> Option<Transaction> {
        self.ledger.lock().transactions.get(id).cloned()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.ledger.lock().transactions.values().cloned().collect();
        txs.sort_by_key(|t| t.timestamp);
        txs
    }

    /// Broker-side status of the current broker order.
    pub fn current_remote_status(&self) -> Option<RemoteStatus> {
        let ledger = self.ledger.lock();
        let id = ledger.id.as_ref()?;
        ledger.transactions.get(id).map(|t| t.status)
    }

    /// Transaction ids and the earliest transaction time.
    pub fn ledger_snapshot(&self) -> (Vec<BrokerOrderId>, Option<DateTime<Utc>>) {
        let ledger = self.ledger.lock();
        let ids = ledger.transactions.keys().cloned().collect();
        let since = ledger.transactions.values().map(|t| t.timestamp).min();
        (ids, since)
    }

    /// A poll task is running for this order.
    #[must_use]
    pub fn has_timer(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    // ========================================================================
    // Ledger
    // ========================================================================

    /// Record a broker answer about one of our orders.
    ///
    /// Upserts the transaction, makes it the current broker order and applies
    /// the reported fill. A `closed` answer without a fill figure means the
    /// broker order executed everything that was left.
    pub fn register(&self, remote: &RemoteOrder) {
        let filled = {
            let mut ledger = self.ledger.lock();
            let others: Size = ledger
                .transactions
                .values()
                .filter(|t| t.id != remote.id)
                .map(|t| t.filled)
                .sum();
            let tx = ledger
                .transactions
                .entry(remote.id.clone())
                .or_insert_with(|| Transaction::from_remote(remote));
            tx.status = remote.status;
            ledger.id = Some(remote.id.clone());

            match (remote.filled, remote.status) {
                (Some(filled), _) => Some(filled),
                (None, RemoteStatus::Closed) => Some(self.amount.saturating_sub(others)),
                (None, _) => None,
            }
        };

        debug!(
            correlation_id = %self.correlation_id,
            broker_id = %remote.id,
            remote_status = %remote.status,
            filled = ?remote.filled,
            "Broker order update"
        );

        if let Some(filled) = filled {
            self.order_partially_filled(&remote.id, filled);
        }
    }

    /// Raise the filled counter of one transaction.
    ///
    /// Lower reports are ignored and the total is clamped to the requested
    /// amount. Emits `PartiallyFilled(total)` when the total grew and is
    /// still below the requested amount. Returns the new total.
    pub fn order_partially_filled(&self, id: &BrokerOrderId, filled: Size) -> Size {
        let (raised, total, over_report) = {
            let mut ledger = self.ledger.lock();
            let others: Size = ledger
                .transactions
                .values()
                .filter(|t| &t.id != id)
                .map(|t| t.filled)
                .sum();
            let cap = self.amount.saturating_sub(others);
            let clamped = filled.min(cap);

            let tx = ledger
                .transactions
                .entry(id.clone())
                .or_insert_with(|| Transaction {
                    id: id.clone(),
                    timestamp: Utc::now(),
                    filled: Size::ZERO,
                    status: RemoteStatus::Open,
                });
            let raised = tx.raise_filled(clamped);
            (raised, others + tx.filled, filled > cap)
        };

        if over_report {
            warn!(
                correlation_id = %self.correlation_id,
                broker_id = %id,
                reported = %filled,
                amount = %self.amount,
                "Fill report exceeds requested amount, clamped"
            );
        }

        if raised && total < self.amount {
            debug!(
                correlation_id = %self.correlation_id,
                broker_id = %id,
                total = %total,
                "Order partially filled"
            );
            self.events.emit(&OrderEvent::PartiallyFilled(total));
        }
        total
    }

    // ========================================================================
    // Status FSM
    // ========================================================================

    /// Move to `status`. Refused once terminal.
    ///
    /// Terminal statuses complete the order: the poll timer is released and
    /// `Completed` follows `StatusChanged`. Logs at error level when a
    /// reason is given. Returns false if the transition was refused.
    pub fn set_status(&self, status: OrderStatus, reason: Option<&str>) -> bool {
        if status.is_terminal() {
            let partially_filled =
                status != OrderStatus::Filled && self.total_filled().is_positive();
            return self.terminate(status, reason, None, partially_filled);
        }

        let previous = {
            let mut ledger = self.ledger.lock();
            if !ledger.status.can_transition_to(status) {
                let current = ledger.status;
                drop(ledger);
                warn!(
                    correlation_id = %self.correlation_id,
                    current = %current,
                    requested = %status,
                    "Status change refused"
                );
                return false;
            }
            std::mem::replace(&mut ledger.status, status)
        };

        self.log_status(previous, status, reason);
        self.events.emit(&OrderEvent::StatusChanged(status));
        true
    }

    pub fn order_filled(&self) -> bool {
        self.terminate(OrderStatus::Filled, None, None, false)
    }

    pub fn order_canceled(&self, partially_filled: bool) -> bool {
        self.terminate(OrderStatus::Canceled, None, None, partially_filled)
    }

    /// Canceled, or filled when nothing is left to execute.
    pub fn order_canceled_or_filled(&self) -> bool {
        if self.remaining().is_zero() {
            self.order_filled()
        } else {
            self.order_canceled(self.total_filled().is_positive())
        }
    }

    /// Emits `Invalid(reason)` before completing.
    pub fn order_rejected(&self, reason: &str) -> bool {
        self.terminate(
            OrderStatus::Rejected,
            Some(reason),
            Some(OrderEvent::Invalid(reason.to_string())),
            false,
        )
    }

    /// Emits `Errored(reason)` before completing.
    pub fn order_errored(&self, reason: &str) -> bool {
        let partially_filled = self.total_filled().is_positive();
        self.terminate(
            OrderStatus::Error,
            Some(reason),
            Some(OrderEvent::Errored(reason.to_string())),
            partially_filled,
        )
    }

    /// Unknown broker failure: move to `error` and hand the error back.
    pub fn fail(&self, err: BrokerError) -> OrderResult<()> {
        self.order_errored(&err.to_string());
        Err(OrderError::Broker(err))
    }

    /// Reject locally when `amount` is below the market minimum.
    ///
    /// Returns true if the order was rejected.
    pub fn reject_below_min(&self, amount: Size) -> bool {
        let min = self.broker().market_limits().amount_min;
        if amount < min {
            self.order_rejected(&format!("amount {amount} below market minimum {min}"));
            return true;
        }
        false
    }

    /// Exactly-once terminal transition.
    fn terminate(
        &self,
        status: OrderStatus,
        reason: Option<&str>,
        before: Option<OrderEvent>,
        partially_filled: bool,
    ) -> bool {
        let (previous, total) = {
            let mut ledger = self.ledger.lock();
            if ledger.status.is_terminal() {
                let current = ledger.status;
                drop(ledger);
                debug!(
                    correlation_id = %self.correlation_id,
                    current = %current,
                    requested = %status,
                    "Order already complete, ignoring"
                );
                return false;
            }
            let previous = std::mem::replace(&mut ledger.status, status);
            (previous, ledger.total_filled())
        };

        let timer = self.timer.lock().take();
        drop(timer);

        self.log_status(previous, status, reason);
        info!(
            correlation_id = %self.correlation_id,
            side = %self.side,
            kind = %self.kind,
            status = %status,
            amount = %self.amount,
            filled = %total,
            "Order complete"
        );
        Metrics::order_completed(self.kind.as_str(), status.as_str());

        if let Some(event) = before {
            self.events.emit(&event);
        }
        self.events.emit(&OrderEvent::StatusChanged(status));
        self.events.emit(&OrderEvent::Completed(Completion {
            status,
            filled: status == OrderStatus::Filled,
            partially_filled,
        }));
        true
    }

    fn log_status(&self, previous: OrderStatus, status: OrderStatus, reason: Option<&str>) {
        match reason {
            Some(reason) => error!(
                correlation_id = %self.correlation_id,
                side = %self.side,
                kind = %self.kind,
                from = %previous,
                status = %status,
                reason,
                "Order status changed"
            ),
            None => info!(
                correlation_id = %self.correlation_id,
                side = %self.side,
                kind = %self.kind,
                from = %previous,
                status = %status,
                "Order status changed"
            ),
        }
    }

    /// Log and count a failed broker call.
    pub fn broker_failed(&self, operation: &str, err: &BrokerError) {
        let domain = err.is_domain();
        Metrics::broker_error(operation, domain);
        if domain {
            warn!(
                correlation_id = %self.correlation_id,
                operation,
                error = %err,
                "Broker refused request"
            );
        } else {
            error!(
                correlation_id = %self.correlation_id,
                operation,
                error = %err,
                "Broker call failed"
            );
        }
    }

    // ========================================================================
    // Timer
    // ========================================================================

    /// Install a poll timer unless one is running or the order is complete.
    pub fn ensure_timer<F>(&self, spawn: F)
    where
        F: FnOnce() -> PollTimer,
    {
        let mut slot = self.timer.lock();
        if slot.is_some() || self.is_terminal() {
            return;
        }
        *slot = Some(spawn());
        debug!(correlation_id = %self.correlation_id, "Order poll started");
    }
}

impl std::fmt::Debug for OrderBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("OrderBase")
            .field("correlation_id", &self.correlation_id)
            .field("side", &self.side)
            .field("kind", &self.kind)
            .field("amount", &self.amount)
            .field("status", &ledger.status)
            .field("id", &ledger.id)
            .field("filled", &ledger.total_filled())
            .finish()
    }
}
