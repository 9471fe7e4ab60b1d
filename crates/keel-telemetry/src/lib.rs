//! Prometheus metrics and structured logging for keel.
//!
//! - Order lifecycle counters (launched, completed, reprices, broker errors)
//! - Trailing stop triggers
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
