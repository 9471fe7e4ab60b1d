//! Order error types.

use keel_broker::BrokerError;
use keel_core::CorrelationId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    /// Unknown broker failure. The order is in `error` and must be replaced.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Order {0} already launched")]
    AlreadyLaunched(CorrelationId),

    #[error("Limit order requires a price")]
    MissingPrice,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Order {0} has no transactions")]
    NoTransactions(CorrelationId),

    #[error("No trades match order {0}")]
    NoMatchingTrades(CorrelationId),
}

pub type OrderResult<T> = Result<T, OrderError>;
