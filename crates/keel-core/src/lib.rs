//! Core domain types for the keel order execution engine.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `OrderSide`, `OrderKind`, `OrderStatus`: Order enums and the status FSM
//! - `CorrelationId`, `BrokerOrderId`: Order identifiers
//! - `RemoteOrder`, `Ticker`, `MarketLimits`, `Trade`: Broker-facing records
//! - `Transaction`: Per-broker-order ledger entry
//! - `EventBus`: Listener-registration pub-sub

pub mod decimal;
pub mod error;
pub mod event;
pub mod order;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use event::EventBus;
pub use order::{BrokerOrderId, CorrelationId, OrderKind, OrderSide, OrderStatus};
pub use types::{
    MarketLimits, RemoteOrder, RemoteStatus, Ticker, Trade, TradeFee, Transaction,
};
