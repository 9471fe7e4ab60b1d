//! keel paper-trading runner.
//!
//! Runs one trading decision end-to-end against the in-memory paper venue:
//! - TOML configuration (venue, order, trailing stop)
//! - Order construction through the keel order factory
//! - Book replay along a configured price path
//! - Optional trailing-stop exit for filled buys

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, ExitReport, OrderReport, RunReport};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
