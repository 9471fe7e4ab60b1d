//! Broker collaborator trait.
//!
//! Abstracts one exchange connection for one trading pair. Orders consume
//! it through `DynBroker`; the venue is assumed to serialize and rate-limit
//! its own calls, so implementations must be shareable across every open
//! order.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_core::{BrokerOrderId, MarketLimits, OrderSide, Price, RemoteOrder, Size, Ticker, Trade};

use crate::error::BrokerResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Polling cadence the venue tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerIntervals {
    /// Interval between order status polls.
    pub order_sync: Duration,
}

impl Default for BrokerIntervals {
    fn default() -> Self {
        Self {
            order_sync: Duration::from_millis(1_000),
        }
    }
}

/// Exchange connection for a single trading pair.
pub trait Broker: Send + Sync {
    /// Trading pair symbol (e.g. `BTC/USDT`).
    fn symbol(&self) -> &str;

    /// Place a limit order.
    fn create_limit_order(
        &self,
        side: OrderSide,
        amount: Size,
        price: Price,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>>;

    /// Place a market order.
    fn create_market_order(
        &self,
        side: OrderSide,
        amount: Size,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>>;

    /// Cancel an order. Resolves to the broker's view after the cancel.
    fn cancel_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>>;

    /// Fetch the current state of an order.
    fn fetch_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>>;

    /// Fetch the top of book.
    fn fetch_ticker(&self) -> BoxFuture<'_, BrokerResult<Ticker>>;

    /// Trading limits of this market.
    fn market_limits(&self) -> MarketLimits;

    /// Own fills for `symbol` since the given time.
    fn fetch_my_trades(
        &self,
        symbol: String,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, BrokerResult<Vec<Trade>>>;

    /// Polling cadence.
    fn intervals(&self) -> BrokerIntervals;
}

/// Arc wrapper for Broker trait objects.
pub type DynBroker = Arc<dyn Broker>;
