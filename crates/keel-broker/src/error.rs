//! Broker error taxonomy.
//!
//! `InvalidOrder`, `OrderNotFound` and `OrderOutOfRange` are domain errors:
//! order kinds map them to a terminal state. Everything else is fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which bound an out-of-range order violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeBound {
    Min,
    Max,
}

impl std::fmt::Display for RangeBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order out of range ({bound}): {message}")]
    OrderOutOfRange { bound: RangeBound, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Exchange error: {0}")]
    Exchange(String),
}

impl BrokerError {
    /// Domain errors are recovered by the order kinds; the rest are fatal.
    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::InvalidOrder(_) | Self::OrderNotFound(_) | Self::OrderOutOfRange { .. }
        )
    }

    /// Create / re-create refused by the venue's order rules.
    #[must_use]
    pub fn is_unplaceable(&self) -> bool {
        matches!(self, Self::InvalidOrder(_) | Self::OrderOutOfRange { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::OrderNotFound(_))
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(BrokerError::InvalidOrder("too small".into()).is_domain());
        assert!(BrokerError::OrderNotFound("o1".into()).is_domain());
        assert!(BrokerError::OrderOutOfRange {
            bound: RangeBound::Min,
            message: "amount".into()
        }
        .is_unplaceable());

        assert!(!BrokerError::RateLimited.is_domain());
        assert!(!BrokerError::Connection("reset".into()).is_domain());
        assert!(!BrokerError::Exchange("500".into()).is_unplaceable());
    }

    #[test]
    fn test_out_of_range_display() {
        let err = BrokerError::OrderOutOfRange {
            bound: RangeBound::Max,
            message: "price 1e9".into(),
        };
        assert_eq!(err.to_string(), "Order out of range (max): price 1e9");
    }
}
