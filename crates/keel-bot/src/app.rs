//! Paper-trading run of one trading decision.
//!
//! The entry order is built through the order factory and launched on the
//! paper venue. The configured book path is then replayed: in simulated mode
//! each step is followed by an explicit `check_order()`, in realtime mode the
//! order's own poll timer observes the steps. When the path runs out (or a
//! shutdown is requested) an unfinished order is canceled. A filled buy may
//! then be guarded by a trailing stop fed with the rest of the path.

use std::sync::Arc;
use std::vec::IntoIter;

use keel_broker::PaperBroker;
use keel_core::{CorrelationId, OrderKind, OrderSide, OrderStatus, Price, Size, Ticker};
use keel_orders::{
    create_order, AnyOrder, ClockMode, Order, OrderContext, OrderEvent, OrderRequest,
    OrderSummary,
};
use keel_trigger::TrailingStop;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

/// Outcome of one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderReport {
    pub correlation_id: CorrelationId,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled: Size,
    pub summary: Option<OrderSummary>,
}

/// Trailing-stop exit.
#[derive(Debug, Clone, Serialize)]
pub struct ExitReport {
    pub trigger_price: Price,
    pub order: OrderReport,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub entry: OrderReport,
    pub exit: Option<ExitReport>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    venue: Arc<PaperBroker>,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application instance.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let venue = Arc::new(PaperBroker::new(config.paper_config(), config.initial_book()));
        Ok(Self {
            config,
            venue,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn venue(&self) -> &Arc<PaperBroker> {
        &self.venue
    }

    /// Token that, once canceled, makes `run` cancel its open order and
    /// return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn is_realtime(&self) -> bool {
        self.config.execution.clock == ClockMode::Realtime
    }

    /// Execute the configured decision.
    pub async fn run(&self) -> AppResult<RunReport> {
        let ctx = OrderContext::new(self.venue.clone(), self.config.execution.clock);
        let entry = create_order(self.config.order_request(), ctx.clone())?;
        log_events(&entry, "entry");

        info!(
            correlation_id = %entry.correlation_id(),
            kind = %entry.kind(),
            side = %entry.side(),
            amount = %entry.amount(),
            clock = ?self.config.execution.clock,
            symbol = %self.config.paper.symbol,
            "Launching entry order"
        );
        entry.launch().await?;

        let mut path = self.config.book_path().into_iter();
        self.drive(&entry, &mut path).await?;
        let entry_report = order_report(&entry).await;

        let guard = self.config.trailing_stop.enabled
            && entry.side() == OrderSide::Buy
            && entry.status() == OrderStatus::Filled
            && !self.shutdown.is_cancelled();
        let exit = if guard {
            let entry_price = entry_report.summary.as_ref().map(|s| s.price);
            self.guard_position(&ctx, &entry, entry_price, &mut path).await?
        } else {
            None
        };

        Ok(RunReport {
            entry: entry_report,
            exit,
        })
    }

    /// Replay the book until the order completes, then cancel it if it has
    /// not.
    async fn drive(&self, order: &AnyOrder, path: &mut IntoIter<Ticker>) -> AppResult<()> {
        while !order.status().is_terminal() {
            if self.shutdown.is_cancelled() {
                info!(correlation_id = %order.correlation_id(), "Shutdown requested");
                break;
            }
            if !self.wait(self.config.paper.book_step()).await
                || order.status().is_terminal()
            {
                break;
            }
            let Some(book) = path.next() else {
                break;
            };

            let fills = self.venue.step_book(book);
            debug!(bid = %book.bid, ask = %book.ask, fills, "Book stepped");
            if !self.is_realtime() {
                order.check_order().await?;
            }
        }

        // Give the poll timer a chance to observe the last step.
        if self.is_realtime() && !order.status().is_terminal() {
            self.wait(self.config.paper.order_sync() * 2).await;
        }

        if !order.status().is_terminal() {
            info!(
                correlation_id = %order.correlation_id(),
                filled = %order.total_filled(),
                "Order still open, canceling"
            );
            order.cancel().await?;
        }
        Ok(())
    }

    /// Feed the remaining book path into a trailing stop and sell the
    /// position when it fires.
    async fn guard_position(
        &self,
        ctx: &OrderContext,
        entry: &AnyOrder,
        entry_price: Option<Price>,
        path: &mut IntoIter<Ticker>,
    ) -> AppResult<Option<ExitReport>> {
        let initial = entry_price.unwrap_or_else(|| self.venue.book().bid);
        let trail = Price::new(self.config.trailing_stop.trail);
        let mut stop = TrailingStop::new(trail, initial)?;
        let (tx, mut rx) = oneshot::channel();
        stop.on_trigger(move |price| {
            let _ = tx.send(price);
        });
        info!(%initial, %trail, "Trailing stop armed");

        let trigger_price = loop {
            if self.shutdown.is_cancelled() {
                break None;
            }
            if !self.wait(self.config.paper.book_step()).await {
                break None;
            }
            let Some(book) = path.next() else {
                break None;
            };

            self.venue.step_book(book);
            stop.update_price(book.bid);
            if let Ok(price) = rx.try_recv() {
                break Some(price);
            }
        };

        let Some(trigger_price) = trigger_price else {
            info!(
                trailing_point = %stop.trailing_point(),
                "Trailing stop not triggered"
            );
            return Ok(None);
        };

        let request = OrderRequest::market(OrderSide::Sell, entry.total_filled())
            .with_correlation_id(CorrelationId::from(format!("{}-exit", entry.correlation_id())));
        let exit = create_order(request, ctx.clone())?;
        log_events(&exit, "exit");
        info!(
            correlation_id = %exit.correlation_id(),
            %trigger_price,
            amount = %exit.amount(),
            "Trailing stop fired, selling position"
        );
        exit.launch().await?;

        Ok(Some(ExitReport {
            trigger_price,
            order: order_report(&exit).await,
        }))
    }

    /// Sleep in realtime mode. Returns false if shutdown was requested.
    async fn wait(&self, period: std::time::Duration) -> bool {
        if !self.is_realtime() {
            return !self.shutdown.is_cancelled();
        }
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }
}

async fn order_report(order: &AnyOrder) -> OrderReport {
    let summary = match order.summary().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(correlation_id = %order.correlation_id(), error = %e, "No order summary");
            None
        }
    };
    OrderReport {
        correlation_id: order.correlation_id().clone(),
        kind: order.kind(),
        side: order.side(),
        status: order.status(),
        filled: order.total_filled(),
        summary,
    }
}

fn log_events(order: &AnyOrder, role: &'static str) {
    let correlation_id = order.correlation_id().clone();
    order.subscribe(move |event| match event {
        OrderEvent::StatusChanged(status) => {
            info!(role, %correlation_id, %status, "Order status");
        }
        OrderEvent::PartiallyFilled(total) => {
            info!(role, %correlation_id, %total, "Order partially filled");
        }
        OrderEvent::Completed(completion) => {
            info!(
                role,
                %correlation_id,
                status = %completion.status,
                filled = completion.filled,
                partially_filled = completion.partially_filled,
                "Order completed"
            );
        }
        OrderEvent::Invalid(reason) => {
            warn!(role, %correlation_id, %reason, "Order invalid");
        }
        OrderEvent::Errored(message) => {
            error!(role, %correlation_id, %message, "Order errored");
        }
    });
}
