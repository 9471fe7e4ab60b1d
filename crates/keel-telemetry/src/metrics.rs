//! Prometheus metrics for the order engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, a programming error that must crash at first use.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter};

use crate::error::TelemetryResult;

/// Orders launched.
/// Labels: kind (market/limit/sticky), side (buy/sell)
pub static ORDERS_LAUNCHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "keel_orders_launched_total",
        "Total orders launched",
        &["kind", "side"]
    )
    .unwrap()
});

/// Orders reaching a terminal status.
/// Labels: kind, status (filled/canceled/rejected/error)
pub static ORDERS_COMPLETED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "keel_orders_completed_total",
        "Total orders completed, by terminal status",
        &["kind", "status"]
    )
    .unwrap()
});

/// Broker call failures.
/// Labels: operation (create_limit/create_market/cancel/fetch/ticker/trades),
/// class (domain/fatal)
pub static BROKER_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "keel_broker_errors_total",
        "Total broker call failures",
        &["operation", "class"]
    )
    .unwrap()
});

/// Sticky order reprices (cancel + re-place).
pub static STICKY_REPRICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "keel_sticky_reprices_total",
        "Total sticky order reprices",
        &["side"]
    )
    .unwrap()
});

/// Trailing stop triggers.
pub static TRAILING_STOP_TRIGGERS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "keel_trailing_stop_triggers_total",
        "Total trailing stop triggers"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record an order launch.
    pub fn order_launched(kind: &str, side: &str) {
        ORDERS_LAUNCHED_TOTAL.with_label_values(&[kind, side]).inc();
    }

    /// Record a terminal transition.
    pub fn order_completed(kind: &str, status: &str) {
        ORDERS_COMPLETED_TOTAL
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Record a failed broker call.
    pub fn broker_error(operation: &str, domain: bool) {
        let class = if domain { "domain" } else { "fatal" };
        BROKER_ERRORS_TOTAL
            .with_label_values(&[operation, class])
            .inc();
    }

    /// Record a sticky reprice.
    pub fn sticky_reprice(side: &str) {
        STICKY_REPRICES_TOTAL.with_label_values(&[side]).inc();
    }

    /// Record a trailing stop trigger.
    pub fn trailing_stop_triggered() {
        TRAILING_STOP_TRIGGERS_TOTAL.inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_counters() {
        let before = ORDERS_COMPLETED_TOTAL
            .with_label_values(&["sticky", "filled"])
            .get();

        Metrics::order_completed("sticky", "filled");
        Metrics::order_completed("sticky", "filled");

        let after = ORDERS_COMPLETED_TOTAL
            .with_label_values(&["sticky", "filled"])
            .get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_gather_text_contains_registered_metrics() {
        Metrics::broker_error("cancel", true);
        Metrics::trailing_stop_triggered();

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("keel_broker_errors_total"));
        assert!(text.contains("keel_trailing_stop_triggers_total"));
    }
}
