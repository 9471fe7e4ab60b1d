//! In-memory paper venue.
//!
//! Fills against an externally driven top of book. Market orders and
//! crossing limit orders take liquidity at the touch. Resting orders fill
//! when `step_book` moves the book through them, and orders priced strictly
//! better than the new book receive a configurable share of their remainder
//! as maker fills.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use keel_core::{
    BrokerOrderId, MarketLimits, OrderSide, Price, RemoteOrder, RemoteStatus, Size, Ticker, Trade,
    TradeFee,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::broker::{BoxFuture, Broker, BrokerIntervals};
use crate::error::{BrokerError, BrokerResult, RangeBound};

/// Paper venue settings.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub symbol: String,
    pub limits: MarketLimits,
    /// Fee rate on resting fills (0.001 = 0.1%).
    pub maker_fee: Decimal,
    /// Fee rate on fills that take liquidity.
    pub taker_fee: Decimal,
    /// Share of the remainder a better-than-book order fills per book step.
    pub maker_fill_ratio: Decimal,
    pub intervals: BrokerIntervals,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            limits: MarketLimits::new(
                Price::new(Decimal::new(1, 2)),
                Size::new(Decimal::new(1, 3)),
            ),
            maker_fee: Decimal::new(1, 3),
            taker_fee: Decimal::new(2, 3),
            maker_fill_ratio: Decimal::ZERO,
            intervals: BrokerIntervals::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    id: BrokerOrderId,
    side: OrderSide,
    amount: Size,
    price: Option<Price>,
    filled: Size,
    status: RemoteStatus,
    created_at: DateTime<Utc>,
}

impl PaperOrder {
    fn remaining(&self) -> Size {
        self.amount.saturating_sub(self.filled)
    }

    fn to_remote(&self) -> RemoteOrder {
        let mut remote = RemoteOrder::new(self.id.clone(), self.status)
            .with_filled(self.filled)
            .with_remaining(self.remaining())
            .with_timestamp(self.created_at);
        if let Some(price) = self.price {
            remote = remote.with_price(price);
        }
        remote
    }

    /// The book trades through this order.
    fn crossed_by(&self, book: &Ticker) -> bool {
        match (self.side, self.price) {
            (OrderSide::Buy, Some(price)) => price >= book.ask,
            (OrderSide::Sell, Some(price)) => price <= book.bid,
            _ => false,
        }
    }

    /// This order would be the new best price on its side.
    fn improves(&self, book: &Ticker) -> bool {
        match (self.side, self.price) {
            (OrderSide::Buy, Some(price)) => price > book.bid,
            (OrderSide::Sell, Some(price)) => price < book.ask,
            _ => false,
        }
    }
}

/// In-memory paper trading venue for a single symbol.
pub struct PaperBroker {
    config: PaperConfig,
    book: RwLock<Ticker>,
    orders: DashMap<BrokerOrderId, PaperOrder>,
    trades: Mutex<Vec<Trade>>,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(config: PaperConfig, book: Ticker) -> Self {
        Self {
            config,
            book: RwLock::new(book),
            orders: DashMap::new(),
            trades: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    pub fn book(&self) -> Ticker {
        *self.book.read()
    }

    /// Number of orders resting on the book.
    pub fn open_orders(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| o.status == RemoteStatus::Open)
            .count()
    }

    /// Move the book and match resting orders against it.
    ///
    /// Returns the number of fills produced.
    pub fn step_book(&self, book: Ticker) -> usize {
        *self.book.write() = book;

        let mut fills = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let order = entry.value_mut();
            if order.status != RemoteStatus::Open {
                continue;
            }
            let Some(price) = order.price else {
                continue;
            };

            let qty = if order.crossed_by(&book) {
                order.remaining()
            } else if order.improves(&book) {
                Size::new(order.remaining().inner() * self.config.maker_fill_ratio)
            } else {
                Size::ZERO
            };
            if !qty.is_positive() {
                continue;
            }

            order.filled += qty;
            if order.remaining().is_zero() {
                order.status = RemoteStatus::Closed;
            }
            fills.push(self.trade(&order.id, qty, price, self.config.maker_fee));
        }

        let count = fills.len();
        if count > 0 {
            debug!(bid = %book.bid, ask = %book.ask, fills = count, "Paper book matched");
            self.trades.lock().extend(fills);
        }
        count
    }

    fn next_order_id(&self) -> BrokerOrderId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        BrokerOrderId::new(format!("paper-{n}"))
    }

    fn trade(&self, id: &BrokerOrderId, amount: Size, price: Price, rate: Decimal) -> Trade {
        Trade {
            order_id: id.clone(),
            amount,
            price,
            fee: Some(TradeFee {
                rate,
                cost: Some(amount.notional(price) * rate),
            }),
            timestamp: Utc::now(),
        }
    }

    fn check_amount(&self, amount: Size) -> BrokerResult<()> {
        if amount < self.config.limits.amount_min {
            return Err(BrokerError::InvalidOrder(format!(
                "amount {amount} below minimum {}",
                self.config.limits.amount_min
            )));
        }
        Ok(())
    }

    fn touch(&self, side: OrderSide) -> BrokerResult<Price> {
        let book = self.book();
        if !book.is_valid() {
            return Err(BrokerError::Exchange(format!(
                "no liquidity: bid {} ask {}",
                book.bid, book.ask
            )));
        }
        Ok(match side {
            OrderSide::Buy => book.ask,
            OrderSide::Sell => book.bid,
        })
    }

    /// Fill `order` completely at `price` as a taker and store it.
    fn take(&self, mut order: PaperOrder, price: Price) -> RemoteOrder {
        let trade = self.trade(&order.id, order.amount, price, self.config.taker_fee);
        order.filled = order.amount;
        order.status = RemoteStatus::Closed;
        self.trades.lock().push(trade);

        let remote = order.to_remote();
        self.orders.insert(order.id.clone(), order);
        remote
    }

    fn place_limit(&self, side: OrderSide, amount: Size, price: Price) -> BrokerResult<RemoteOrder> {
        self.check_amount(amount)?;
        if !price.is_positive() {
            return Err(BrokerError::OrderOutOfRange {
                bound: RangeBound::Min,
                message: format!("price {price} must be positive"),
            });
        }

        let order = PaperOrder {
            id: self.next_order_id(),
            side,
            amount,
            price: Some(price),
            filled: Size::ZERO,
            status: RemoteStatus::Open,
            created_at: Utc::now(),
        };

        let book = self.book();
        if book.is_valid() && order.crossed_by(&book) {
            let touch = self.touch(side)?;
            info!(id = %order.id, %side, %amount, %price, %touch, "Paper limit crossed");
            return Ok(self.take(order, touch));
        }

        debug!(id = %order.id, %side, %amount, %price, "Paper limit resting");
        let remote = order.to_remote();
        self.orders.insert(order.id.clone(), order);
        Ok(remote)
    }

    fn place_market(&self, side: OrderSide, amount: Size) -> BrokerResult<RemoteOrder> {
        self.check_amount(amount)?;
        let touch = self.touch(side)?;

        let order = PaperOrder {
            id: self.next_order_id(),
            side,
            amount,
            price: None,
            filled: Size::ZERO,
            status: RemoteStatus::Open,
            created_at: Utc::now(),
        };
        info!(id = %order.id, %side, %amount, %touch, "Paper market fill");
        Ok(self.take(order, touch))
    }

    fn cancel(&self, id: &BrokerOrderId) -> BrokerResult<RemoteOrder> {
        let mut entry = self
            .orders
            .get_mut(id)
            .ok_or_else(|| BrokerError::OrderNotFound(id.to_string()))?;
        if entry.status != RemoteStatus::Open {
            return Err(BrokerError::OrderNotFound(format!("{id} is {}", entry.status)));
        }
        entry.status = RemoteStatus::Canceled;
        debug!(%id, filled = %entry.filled, "Paper order canceled");
        Ok(entry.to_remote())
    }

    fn fetch(&self, id: &BrokerOrderId) -> BrokerResult<RemoteOrder> {
        self.orders
            .get(id)
            .map(|o| o.to_remote())
            .ok_or_else(|| BrokerError::OrderNotFound(id.to_string()))
    }
}

impl Broker for PaperBroker {
    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    fn create_limit_order(
        &self,
        side: OrderSide,
        amount: Size,
        price: Price,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move { self.place_limit(side, amount, price) })
    }

    fn create_market_order(
        &self,
        side: OrderSide,
        amount: Size,
    ) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move { self.place_market(side, amount) })
    }

    fn cancel_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move { self.cancel(&id) })
    }

    fn fetch_order(&self, id: BrokerOrderId) -> BoxFuture<'_, BrokerResult<RemoteOrder>> {
        Box::pin(async move { self.fetch(&id) })
    }

    fn fetch_ticker(&self) -> BoxFuture<'_, BrokerResult<Ticker>> {
        Box::pin(async move { Ok(self.book()) })
    }

    fn market_limits(&self) -> MarketLimits {
        self.config.limits
    }

    fn fetch_my_trades(
        &self,
        symbol: String,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, BrokerResult<Vec<Trade>>> {
        Box::pin(async move {
            if symbol != self.config.symbol {
                return Ok(Vec::new());
            }
            Ok(self
                .trades
                .lock()
                .iter()
                .filter(|t| t.timestamp >= since)
                .cloned()
                .collect())
        })
    }

    fn intervals(&self) -> BrokerIntervals {
        self.config.intervals
    }
}
