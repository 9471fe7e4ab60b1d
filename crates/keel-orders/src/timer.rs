//! Periodic order poll.
//!
//! The poll task holds a `Weak` reference to its order: dropping the last
//! `Arc` ends the task at its next tick, and dropping the `PollTimer` (which
//! the order does on its terminal transition) cancels it immediately.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::order::Order;

/// Handle to a running poll task. Stops the task when dropped.
#[derive(Debug)]
pub struct PollTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTimer {
    /// Call `check_order()` on `order` every `period`, first call one period
    /// from now.
    pub fn spawn<T>(order: Weak<T>, period: Duration) -> Self
    where
        T: Order + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(order, period, token.clone()));
        Self { token, handle }
    }

    /// The task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn poll_loop<T>(order: Weak<T>, period: Duration, token: CancellationToken)
where
    T: Order + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(order) = order.upgrade() else {
            break;
        };
        if order.status().is_terminal() {
            break;
        }
        if let Err(e) = order.check_order().await {
            warn!(
                correlation_id = %order.correlation_id(),
                error = %e,
                "Order poll failed, stopping timer"
            );
            break;
        }
    }

    debug!(period_ms = period.as_millis() as u64, "Order poll stopped");
}
