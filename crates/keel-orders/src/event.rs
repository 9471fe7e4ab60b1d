//! Order lifecycle events.

use keel_core::{OrderStatus, Size};
use serde::Serialize;

/// Payload of the final event of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub status: OrderStatus,
    /// The requested amount was executed.
    pub filled: bool,
    /// Part of the requested amount was executed before the order ended.
    pub partially_filled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    StatusChanged(OrderStatus),
    /// Total filled across every broker order so far.
    PartiallyFilled(Size),
    Completed(Completion),
    /// Emitted before `Completed` when the order is rejected.
    Invalid(String),
    /// Emitted before `Completed` on an unknown broker failure.
    Errored(String),
}

impl OrderEvent {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
