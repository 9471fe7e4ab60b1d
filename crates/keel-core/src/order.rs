//! Order-related enums and identifiers.
//!
//! Provides order side, kind and status (the order FSM), plus the two
//! identifiers every order carries: the caller-assigned correlation id and
//! the broker-assigned order id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution strategy of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Fire-and-forget market order.
    Market,
    /// Fixed-price limit order, polled until done.
    Limit,
    /// Limit order repriced to stay one tick ahead of the book.
    Sticky,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Sticky => "sticky",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Self::Market),
            "limit" => Ok(Self::Limit),
            "sticky" => Ok(Self::Sticky),
            other => Err(CoreError::UnknownOrderKind(other.to_string())),
        }
    }
}

/// Order status.
///
/// Forward-only: `Initializing -> Open -> {Filled, Canceled, Rejected, Error}`.
/// `Initializing` may jump straight to a terminal state (e.g. rejected on
/// create). `Open -> Open` is allowed and re-emits. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Constructed, no broker acknowledgement yet.
    #[default]
    Initializing,
    /// Acknowledged by the broker and resting.
    Open,
    /// Requested amount fully executed.
    Filled,
    /// Canceled, possibly after partial execution.
    Canceled,
    /// Never accepted by the broker.
    Rejected,
    /// Unknown broker failure.
    Error,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Error
        )
    }

    /// Check whether the FSM allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            Self::Initializing => next != Self::Initializing,
            Self::Open => next != Self::Initializing,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-assigned order identifier, stable for the lifetime of an order.
///
/// One trading decision maps to one correlation id, no matter how many
/// broker orders it spans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new unique correlation id.
    ///
    /// Format: `keel_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("keel_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerOrderId(String);

impl BrokerOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BrokerOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BrokerOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for BrokerOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
