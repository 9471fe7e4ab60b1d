//! Scripted broker for tests.
//!
//! Every order call pops the next scripted response from its own queue and
//! records the call. An empty queue answers `Exchange("no scripted response")`
//! so an unexpected call surfaces as a fatal error instead of a hang.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_core::{
    BrokerOrderId, MarketLimits, OrderSide, Price, RemoteOrder, Size, Ticker, Trade,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use crate::broker::{BoxFuture, Broker, BrokerIntervals};
use crate::error::{BrokerError, BrokerResult};

/// One recorded broker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    CreateLimit {
        side: OrderSide,
        amount: Size,
        price: Price,
    },
    CreateMarket {
        side: OrderSide,
        amount: Size,
    },
    Cancel(BrokerOrderId),
    Fetch(BrokerOrderId),
    FetchTicker,
    FetchTrades {
        symbol: String,
        since: DateTime<Utc>,
    },
}

impl BrokerCall {
    pub fn is_create(&self) -> bool {
        matches!(self, Self::CreateLimit { .. } | Self::CreateMarket { .. })
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel(_))
    }
}

type Script = Mutex<VecDeque<BrokerResult<RemoteOrder>>>;

/// Mock broker for testing.
#[derive(Debug)]
pub struct MockBroker {
    symbol: String,
    limits: Mutex<MarketLimits>,
    intervals: Mutex<BrokerIntervals>,
    ticker: Mutex<BrokerResult<Ticker>>,
    trades: Mutex<BrokerResult<Vec<Trade>>>,
    create_limit: Script,
    create_market: Script,
    cancel: Script,
    fetch: Script,
    /// Answer for fetches once the fetch script is exhausted.
    fetch_fallback: Mutex<Option<RemoteOrder>>,
    /// When set, create calls wait for a permit before answering.
    create_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<Vec<BrokerCall>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Mock on `BTC/USDT` with tick 0.01, min amount 0.001 and a 100/101 book.
    pub fn new() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            limits: Mutex::new(MarketLimits::new(
                Price::new(Decimal::new(1, 2)),
                Size::new(Decimal::new(1, 3)),
            )),
            intervals: Mutex::new(BrokerIntervals::default()),
            ticker: Mutex::new(Ok(Ticker::new(
                Price::new(Decimal::from(100)),
                Price::new(Decimal::from(101)),
            ))),
            trades: Mutex::new(Ok(Vec::new())),
            create_limit: Mutex::new(VecDeque::new()),
            create_market: Mutex::new(VecDeque::new()),
            cancel: Mutex::new(VecDeque::new()),
            fetch: Mutex::new(VecDeque::new()),
            fetch_fallback: Mutex::new(None),
            create_gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn set_limits(&self, limits: MarketLimits) {
        *self.limits.lock() = limits;
    }

    pub fn set_intervals(&self, intervals: BrokerIntervals) {
        *self.intervals.lock() = intervals;
    }

    pub fn set_ticker(&self, ticker: Ticker) {
        *self.ticker.lock() = Ok(ticker);
    }

    pub fn set_ticker_error(&self, err: BrokerError) {
        *self.ticker.lock() = Err(err);
    }

    pub fn set_trades(&self, trades: Vec<Trade>) {
        *self.trades.lock() = Ok(trades);
    }

    pub fn set_trades_error(&self, err: BrokerError) {
        *self.trades.lock() = Err(err);
    }

    pub fn push_create_limit(&self, result: BrokerResult<RemoteOrder>) {
        self.create_limit.lock().push_back(result);
    }

    pub fn push_create_market(&self, result: BrokerResult<RemoteOrder>) {
        self.create_market.lock().push_back(result);
    }

    pub fn push_cancel(&self, result: BrokerResult<RemoteOrder>) {
        self.cancel.lock().push_back(result);
    }

    pub fn push_fetch(&self, result: BrokerResult<RemoteOrder>) {
        self.fetch.lock().push_back(result);
    }

    pub fn set_fetch_fallback(&self, remote: RemoteOrder) {
        *self.fetch_fallback.lock() = Some(remote);
    }

    /// Hold every create call until the returned gate is notified.
    pub fn gate_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock() = Some(gate.clone());
        gate
    }

    /// Get recorded calls.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn create_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_create()).count()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_cancel()).count()
    }

    /// Scripted responses not consumed yet, across all queues.
    pub fn pending_responses(&self) -> usize {
        self.create_limit.lock().len()
            + self.create_market.lock().len()
            + self.cancel.lock().len()
            + self.fetch.lock().len()
    }

    fn record(&self, call: BrokerCall) {
        self.calls.lock().push(call);
    }

    fn pop(script: &Script) -> BrokerResult<RemoteOrder> {
        script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BrokerError::Exchange("no scripted response".to_string())))
    }

    async fn wait_gate(&self) {
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

impl Broker for MockBroker {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn create_limit_order(
        &self,
        side: OrderSide,
        amount: Size,
        price: Price,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move {
            self.record(BrokerCall::CreateLimit {
                side,
                amount,
                price,
            });
            self.wait_gate().await;
            Self::pop(&self.create_limit)
        })
    }

    fn create_market_order(
        &self,
        side: OrderSide,
        amount: Size,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move {
            self.record(BrokerCall::CreateMarket { side, amount });
            self.wait_gate().await;
            Self::pop(&self.create_market)
        })
    }

    fn cancel_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move {
            self.record(BrokerCall::Cancel(id));
            Self::pop(&self.cancel)
        })
    }

    fn fetch_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move {
            self.record(BrokerCall::Fetch(id));
            let scripted = self.fetch.lock().pop_front();
            match scripted {
                Some(result) => result,
                None => self
                    .fetch_fallback
                    .lock()
                    .clone()
                    .ok_or_else(|| BrokerError::Exchange("no scripted response".to_string())),
            }
        })
    }

    fn fetch_ticker(&self) -> BoxFuture<'_, BrokerResult<Ticker>> {
        Box::pin(async move {
            self.record(BrokerCall::FetchTicker);
            self.ticker.lock().clone()
        })
    }

    fn market_limits(&self) -> MarketLimits {
        *self.limits.lock()
    }

    fn fetch_my_trades(
        &self,
        symbol: String,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, BrokerResult<Vec<Trade>>> {
        Box::pin(async move {
            self.record(BrokerCall::FetchTrades { symbol, since });
            self.trades.lock().clone()
        })
    }

    fn intervals(&self) -> BrokerIntervals {
        *self.intervals.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::RemoteStatus;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_pops_scripted_responses_in_order() {
        let broker = MockBroker::new();
        broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));
        broker.push_create_limit(Err(BrokerError::InvalidOrder("min".into())));

        let first = broker
            .create_limit_order(OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(100)))
            .await;
        assert_eq!(first.unwrap().id.as_str(), "o1");

        let second = broker
            .create_limit_order(OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(100)))
            .await;
        assert!(matches!(second, Err(BrokerError::InvalidOrder(_))));

        let third = broker
            .create_limit_order(OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(100)))
            .await;
        assert!(matches!(third, Err(BrokerError::Exchange(_))));
        assert_eq!(broker.create_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let broker = MockBroker::new();
        broker.push_cancel(Ok(RemoteOrder::new("o1", RemoteStatus::Canceled)));

        let _ = broker.fetch_ticker().await;
        let _ = broker.cancel_order(BrokerOrderId::new("o1")).await;

        assert_eq!(
            broker.calls(),
            vec![
                BrokerCall::FetchTicker,
                BrokerCall::Cancel(BrokerOrderId::new("o1"))
            ]
        );
        assert_eq!(broker.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_fallback_after_script() {
        let broker = MockBroker::new();
        broker.push_fetch(Ok(
            RemoteOrder::new("o1", RemoteStatus::Open).with_filled(Size::new(dec!(0.1)))
        ));
        broker.set_fetch_fallback(RemoteOrder::new("o1", RemoteStatus::Open));

        let first = broker.fetch_order(BrokerOrderId::new("o1")).await.unwrap();
        assert_eq!(first.filled, Some(Size::new(dec!(0.1))));

        let second = broker.fetch_order(BrokerOrderId::new("o1")).await.unwrap();
        assert_eq!(second.filled, None);
    }

    #[tokio::test]
    async fn test_gated_create_waits_for_permit() {
        let broker = Arc::new(MockBroker::new());
        broker.push_create_market(Ok(RemoteOrder::new("m1", RemoteStatus::Closed)));
        let gate = broker.gate_creates();

        let task = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .create_market_order(OrderSide::Sell, Size::new(dec!(1)))
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert!(!task.is_finished());
        assert_eq!(broker.create_count(), 1);

        gate.notify_one();
        let result = task.await.unwrap();
        assert_eq!(result.unwrap().status, RemoteStatus::Closed);
    }
}
