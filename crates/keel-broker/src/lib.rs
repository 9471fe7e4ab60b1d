//! Broker collaborator for keel.
//!
//! - `Broker`: dyn-compatible async interface to one exchange market
//! - `BrokerError`: domain vs fatal error taxonomy
//! - `MockBroker`: scripted responses and call recording for tests
//! - `PaperBroker`: in-memory venue driven by an external top of book

pub mod broker;
pub mod error;
pub mod mock;
pub mod paper;

pub use broker::{BoxFuture, Broker, BrokerIntervals, DynBroker};
pub use error::{BrokerError, BrokerResult, RangeBound};
pub use mock::{BrokerCall, MockBroker};
pub use paper::{PaperBroker, PaperConfig};
