//! Price triggers for keel.
//!
//! `TrailingStop` follows a rising price and fires once when the price falls
//! back by at least the trail.

pub mod error;
pub mod trailing_stop;

pub use error::{TriggerError, TriggerResult};
pub use trailing_stop::{TrailingStop, TriggerEvent};
