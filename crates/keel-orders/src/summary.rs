//! Post-hoc execution summary of one order.
//!
//! Built from the broker's trade history rather than from the order's own
//! ledger, so fees and the actual fill prices are reflected.

use chrono::{DateTime, Utc};
use keel_broker::Broker;
use keel_core::{BrokerOrderId, CorrelationId, OrderSide, Price, Size, Trade};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::error::{OrderError, OrderResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    /// Total executed amount.
    pub amount: Size,
    /// Fill-weighted average price.
    pub price: Price,
    pub side: OrderSide,
    /// Fill-weighted fee in percent over fills that report a fee.
    pub fee_percent: Option<Decimal>,
    /// Time of the last matching fill.
    pub execution_date: DateTime<Utc>,
}

/// Summarise the fills of `ids` reported since `since`.
pub async fn build_summary(
    broker: &dyn Broker,
    correlation_id: &CorrelationId,
    side: OrderSide,
    ids: &[BrokerOrderId],
    since: DateTime<Utc>,
) -> OrderResult<OrderSummary> {
    if ids.is_empty() {
        return Err(OrderError::NoTransactions(correlation_id.clone()));
    }

    let trades = broker
        .fetch_my_trades(broker.symbol().to_string(), since)
        .await?;
    let matching: Vec<&Trade> = trades.iter().filter(|t| ids.contains(&t.order_id)).collect();
    debug!(
        %correlation_id,
        fetched = trades.len(),
        matching = matching.len(),
        "Building order summary"
    );

    summarise(side, &matching).ok_or_else(|| OrderError::NoMatchingTrades(correlation_id.clone()))
}

fn summarise(side: OrderSide, trades: &[&Trade]) -> Option<OrderSummary> {
    let amount: Size = trades.iter().map(|t| t.amount).sum();
    if !amount.is_positive() {
        return None;
    }

    let notional: Decimal = trades.iter().map(|t| t.amount.notional(t.price)).sum();
    let price = Price::new(notional / amount.inner());

    let mut fee_weight = Decimal::ZERO;
    let mut fee_amount = Decimal::ZERO;
    for trade in trades {
        if let Some(fee) = trade.fee {
            fee_weight += fee.rate * Decimal::ONE_HUNDRED * trade.amount.inner();
            fee_amount += trade.amount.inner();
        }
    }
    let fee_percent = (!fee_amount.is_zero()).then(|| fee_weight / fee_amount);

    let execution_date = trades.iter().map(|t| t.timestamp).max()?;

    Some(OrderSummary {
        amount,
        price,
        side,
        fee_percent,
        execution_date,
    })
}
