//! Broker-facing records.
//!
//! Contains the ticker (top of book), market limits, the broker's view of a
//! single order (`RemoteOrder`), trade fills, and the `Transaction` ledger
//! entry an order keeps per broker order id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::BrokerOrderId;
use crate::{Price, Size};

/// Top of book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Best bid price.
    pub bid: Price,
    /// Best ask price.
    pub ask: Price,
}

impl Ticker {
    pub fn new(bid: Price, ask: Price) -> Self {
        Self { bid, ask }
    }

    /// Spread: ask - bid.
    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }

    /// Mid price, or None if the book is not valid.
    pub fn mid_price(&self) -> Option<Price> {
        if !self.is_valid() {
            return None;
        }
        Some(Price::new((self.bid.inner() + self.ask.inner()) / Decimal::TWO))
    }

    /// Both sides positive and not crossed.
    pub fn is_valid(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.bid < self.ask
    }
}

/// Trading limits of the market an order is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketLimits {
    /// Minimum price increment (tick).
    pub price_min: Price,
    /// Minimum order amount.
    pub amount_min: Size,
}

impl MarketLimits {
    pub fn new(price_min: Price, amount_min: Size) -> Self {
        Self {
            price_min,
            amount_min,
        }
    }

    /// Tick used to price orders one increment better than the book.
    pub fn tick(&self) -> Price {
        self.price_min
    }
}

/// Broker-side status of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Open,
    Closed,
    Canceled,
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Broker's view of one order, as returned by create / cancel / fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: BrokerOrderId,
    pub status: RemoteStatus,
    /// Amount executed so far, when the venue reports it.
    #[serde(default)]
    pub filled: Option<Size>,
    #[serde(default)]
    pub remaining: Option<Size>,
    #[serde(default)]
    pub price: Option<Price>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteOrder {
    /// Minimal record with only id and status (timestamp = now).
    pub fn new(id: impl Into<BrokerOrderId>, status: RemoteStatus) -> Self {
        Self {
            id: id.into(),
            status,
            filled: None,
            remaining: None,
            price: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_filled(mut self, filled: Size) -> Self {
        self.filled = Some(filled);
        self
    }

    #[must_use]
    pub fn with_remaining(mut self, remaining: Size) -> Self {
        self.remaining = Some(remaining);
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Fee charged on a single fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFee {
    /// Fee rate as a fraction (0.001 = 0.1%).
    pub rate: Decimal,
    /// Fee cost in quote currency, when known.
    #[serde(default)]
    pub cost: Option<Decimal>,
}

/// One execution (fill) reported by the broker's trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Broker order id this fill belongs to.
    pub order_id: BrokerOrderId,
    pub amount: Size,
    pub price: Price,
    #[serde(default)]
    pub fee: Option<TradeFee>,
    pub timestamp: DateTime<Utc>,
}

/// Ledger entry for one broker order instance.
///
/// A sticky order spans many of these over its life; fills recorded under
/// an earlier price survive a reprice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: BrokerOrderId,
    pub timestamp: DateTime<Utc>,
    pub filled: Size,
    pub status: RemoteStatus,
}

impl Transaction {
    /// Start a ledger entry from the broker's first acknowledgement.
    pub fn from_remote(remote: &RemoteOrder) -> Self {
        Self {
            id: remote.id.clone(),
            timestamp: remote.timestamp,
            filled: Size::ZERO,
            status: remote.status,
        }
    }

    /// Raise the filled counter. Lower or equal reports are ignored.
    ///
    /// Returns true if the counter moved.
    pub fn raise_filled(&mut self, filled: Size) -> bool {
        if filled > self.filled {
            self.filled = filled;
            true
        } else {
            false
        }
    }
}
