//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Order error: {0}")]
    Order(#[from] keel_orders::OrderError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] keel_trigger::TriggerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] keel_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;
