//! Execution context shared by every order of one run.

use keel_broker::DynBroker;
use serde::{Deserialize, Serialize};

/// Where time comes from.
///
/// `Realtime` orders poll the broker on their own timer. `Simulated` orders
/// never start a timer; the driver calls `check_order()` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    #[default]
    Realtime,
    Simulated,
}

#[derive(Clone)]
pub struct OrderContext {
    pub broker: DynBroker,
    pub clock: ClockMode,
}

impl OrderContext {
    pub fn new(broker: DynBroker, clock: ClockMode) -> Self {
        Self { broker, clock }
    }

    pub fn realtime(broker: DynBroker) -> Self {
        Self::new(broker, ClockMode::Realtime)
    }

    pub fn simulated(broker: DynBroker) -> Self {
        Self::new(broker, ClockMode::Simulated)
    }

    #[must_use]
    pub fn is_realtime(&self) -> bool {
        self.clock == ClockMode::Realtime
    }
}

impl std::fmt::Debug for OrderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderContext")
            .field("symbol", &self.broker.symbol())
            .field("clock", &self.clock)
            .finish()
    }
}
