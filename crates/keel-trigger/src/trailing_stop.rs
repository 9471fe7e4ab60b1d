//! Trailing stop trigger.
//!
//! The trailing point follows the highest price seen, `trail` below it. The
//! stop fires the first time a price update lands at or below the trailing
//! point and is dead afterwards.

use keel_core::{EventBus, Price};
use keel_telemetry::Metrics;
use tracing::{debug, info};

use crate::error::{TriggerError, TriggerResult};

/// Events emitted by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Fired at this price.
    Triggered(Price),
}

type Callback = Box<dyn FnOnce(Price) + Send>;

/// One-shot trailing stop.
///
/// # Example
/// ```ignore
/// let mut stop = TrailingStop::new(trail, entry_price)?;
/// stop.on_trigger(|price| exit_position(price));
/// for price in feed {
///     stop.update_price(price);
/// }
/// ```
pub struct TrailingStop {
    trail: Price,
    trailing_point: Price,
    previous_price: Price,
    is_live: bool,
    on_trigger: Option<Callback>,
    events: EventBus<TriggerEvent>,
}

impl TrailingStop {
    /// Arm a stop `trail` below `initial_price`.
    pub fn new(trail: Price, initial_price: Price) -> TriggerResult<Self> {
        check_trail(trail)?;
        Ok(Self {
            trail,
            trailing_point: initial_price - trail,
            previous_price: initial_price,
            is_live: true,
            on_trigger: None,
            events: EventBus::new(),
        })
    }

    /// Register the callback invoked when the stop fires. Replaces any
    /// previous callback.
    pub fn on_trigger<F>(&mut self, callback: F)
    where
        F: FnOnce(Price) + Send + 'static,
    {
        self.on_trigger = Some(Box::new(callback));
    }

    /// Register an event listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&TriggerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }

    pub fn events(&self) -> &EventBus<TriggerEvent> {
        &self.events
    }

    /// Feed a new price. No-op once fired.
    pub fn update_price(&mut self, price: Price) {
        if !self.is_live {
            return;
        }

        if price > self.trailing_point + self.trail {
            self.trailing_point = price - self.trail;
            debug!(%price, trailing_point = %self.trailing_point, "Trailing point raised");
        }
        self.previous_price = price;

        if price <= self.trailing_point {
            self.fire(price);
        }
    }

    /// Change the trail and re-evaluate against the last price.
    ///
    /// The trailing point is re-anchored on the last price, so a zero trail
    /// fires immediately.
    pub fn update_trail(&mut self, trail: Price) -> TriggerResult<()> {
        check_trail(trail)?;
        if !self.is_live {
            return Ok(());
        }

        self.trail = trail;
        self.trailing_point = self.previous_price - trail;
        self.update_price(self.previous_price);
        Ok(())
    }

    fn fire(&mut self, price: Price) {
        self.is_live = false;
        info!(
            %price,
            trailing_point = %self.trailing_point,
            trail = %self.trail,
            "Trailing stop triggered"
        );
        Metrics::trailing_stop_triggered();

        if let Some(callback) = self.on_trigger.take() {
            callback(price);
        }
        self.events.emit(&TriggerEvent::Triggered(price));
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn trail(&self) -> Price {
        self.trail
    }

    pub fn trailing_point(&self) -> Price {
        self.trailing_point
    }

    pub fn previous_price(&self) -> Price {
        self.previous_price
    }
}

fn check_trail(trail: Price) -> TriggerResult<()> {
    if trail < Price::ZERO {
        return Err(TriggerError::InvalidTrail(trail));
    }
    Ok(())
}

impl std::fmt::Debug for TrailingStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrailingStop")
            .field("trail", &self.trail)
            .field("trailing_point", &self.trailing_point)
            .field("previous_price", &self.previous_price)
            .field("is_live", &self.is_live)
            .finish()
    }
}
