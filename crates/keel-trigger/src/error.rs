//! Trigger error types.

use keel_core::Price;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("Invalid trail: {0} (must be non-negative)")]
    InvalidTrail(Price),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
