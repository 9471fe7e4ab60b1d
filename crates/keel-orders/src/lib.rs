//! Order execution for keel.
//!
//! Turns one trading decision into broker order placements and tracks them
//! to exactly one terminal state:
//! - `MarketOrder`: fire-and-forget market order
//! - `LimitOrder`: fixed price, polled until filled or canceled
//! - `StickyOrder`: kept one tick better than the book, repriced as it moves
//!
//! All kinds share `OrderBase` (status FSM, fill ledger, events, poll timer)
//! and are built from an `OrderRequest` by `create_order`.

pub mod base;
pub mod context;
pub mod error;
pub mod event;
pub mod factory;
pub mod limit;
pub mod market;
pub mod order;
pub mod sticky;
pub mod summary;
pub mod timer;

pub use base::OrderBase;
pub use context::{ClockMode, OrderContext};
pub use error::{OrderError, OrderResult};
pub use event::{Completion, OrderEvent};
pub use factory::{create_order, AnyOrder, OrderRequest};
pub use limit::LimitOrder;
pub use market::MarketOrder;
pub use order::{Order, OrderHandler};
pub use sticky::{sticky_price, StickyOrder};
pub use summary::{build_summary, OrderSummary};
pub use timer::PollTimer;
