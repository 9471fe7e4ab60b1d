//! Application configuration.

use std::time::Duration;

use keel_broker::{BrokerIntervals, PaperConfig};
use keel_core::{CorrelationId, MarketLimits, OrderKind, OrderSide, Price, Size, Ticker};
use keel_orders::{ClockMode, OrderRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// `realtime`: orders poll on their own timer while the book replays on a
    /// wall-clock interval. `simulated`: the runner steps the book and polls
    /// the order itself, as fast as possible.
    #[serde(default)]
    pub clock: ClockMode,
}

/// One top-of-book snapshot in the replay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl BookLevel {
    pub fn ticker(&self) -> Ticker {
        Ticker::new(Price::new(self.bid), Price::new(self.ask))
    }
}

/// Paper venue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    /// Trading pair. Default: BTC/USDT.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Initial best bid. Default: 100.
    #[serde(default = "default_bid")]
    pub bid: Decimal,
    /// Initial best ask. Default: 101.
    #[serde(default = "default_ask")]
    pub ask: Decimal,
    /// Price increment. Default: 0.01.
    #[serde(default = "default_tick")]
    pub tick: Decimal,
    /// Minimum order amount. Default: 0.001.
    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,
    /// Maker fee rate. Default: 0.001 (0.1%).
    #[serde(default = "default_maker_fee")]
    pub maker_fee: Decimal,
    /// Taker fee rate. Default: 0.002 (0.2%).
    #[serde(default = "default_taker_fee")]
    pub taker_fee: Decimal,
    /// Share of its remainder an order inside the spread fills per book step.
    /// Default: 0.25.
    #[serde(default = "default_maker_fill_ratio")]
    pub maker_fill_ratio: Decimal,
    /// Order poll interval (ms). Default: 1,000.
    #[serde(default = "default_order_sync_ms")]
    pub order_sync_ms: u64,
    /// Wall-clock delay between book steps in realtime mode (ms). Default: 500.
    #[serde(default = "default_book_step_ms")]
    pub book_step_ms: u64,
    /// Book snapshots replayed after launch, in order.
    #[serde(default)]
    pub book_path: Vec<BookLevel>,
}

fn default_symbol() -> String {
    "BTC/USDT".to_string()
}

fn default_bid() -> Decimal {
    Decimal::from(100)
}

fn default_ask() -> Decimal {
    Decimal::from(101)
}

fn default_tick() -> Decimal {
    Decimal::new(1, 2)
}

fn default_min_amount() -> Decimal {
    Decimal::new(1, 3)
}

fn default_maker_fee() -> Decimal {
    Decimal::new(1, 3)
}

fn default_taker_fee() -> Decimal {
    Decimal::new(2, 3)
}

fn default_maker_fill_ratio() -> Decimal {
    Decimal::new(25, 2)
}

fn default_order_sync_ms() -> u64 {
    1_000
}

fn default_book_step_ms() -> u64 {
    500
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            bid: default_bid(),
            ask: default_ask(),
            tick: default_tick(),
            min_amount: default_min_amount(),
            maker_fee: default_maker_fee(),
            taker_fee: default_taker_fee(),
            maker_fill_ratio: default_maker_fill_ratio(),
            order_sync_ms: default_order_sync_ms(),
            book_step_ms: default_book_step_ms(),
            book_path: Vec::new(),
        }
    }
}

impl PaperVenueConfig {
    pub fn book_step(&self) -> Duration {
        Duration::from_millis(self.book_step_ms)
    }

    pub fn order_sync(&self) -> Duration {
        Duration::from_millis(self.order_sync_ms)
    }
}

/// The trading decision to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// market / limit / sticky. Default: sticky.
    #[serde(default = "default_kind")]
    pub kind: OrderKind,
    /// Default: buy.
    #[serde(default = "default_side")]
    pub side: OrderSide,
    /// Default: 1.
    #[serde(default = "default_amount")]
    pub amount: Decimal,
    /// Limit price. Required for limit orders.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Caller-assigned id. Generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

fn default_kind() -> OrderKind {
    OrderKind::Sticky
}

fn default_side() -> OrderSide {
    OrderSide::Buy
}

fn default_amount() -> Decimal {
    Decimal::ONE
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            side: default_side(),
            amount: default_amount(),
            price: None,
            correlation_id: None,
        }
    }
}

/// Trailing stop guarding a filled buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// Distance below the high-water mark. Default: 1.
    #[serde(default = "default_trail")]
    pub trail: Decimal,
}

fn default_trail() -> Decimal {
    Decimal::ONE
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trail: default_trail(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paper: PaperVenueConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the venue or the order factory cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        let paper = &self.paper;
        if paper.bid <= Decimal::ZERO || paper.ask <= paper.bid {
            return invalid(format!(
                "paper book must satisfy 0 < bid < ask (bid {}, ask {})",
                paper.bid, paper.ask
            ));
        }
        if paper.tick <= Decimal::ZERO {
            return invalid(format!("paper.tick must be positive, got {}", paper.tick));
        }
        if paper.min_amount < Decimal::ZERO {
            return invalid(format!("paper.min_amount must not be negative, got {}", paper.min_amount));
        }
        if paper.maker_fee < Decimal::ZERO || paper.taker_fee < Decimal::ZERO {
            return invalid("paper fees must not be negative".to_string());
        }
        if paper.maker_fill_ratio < Decimal::ZERO || paper.maker_fill_ratio > Decimal::ONE {
            return invalid(format!(
                "paper.maker_fill_ratio must be within [0, 1], got {}",
                paper.maker_fill_ratio
            ));
        }
        if paper.order_sync_ms == 0 {
            return invalid("paper.order_sync_ms must be positive".to_string());
        }
        if let Some((i, level)) = paper
            .book_path
            .iter()
            .enumerate()
            .find(|(_, l)| l.bid <= Decimal::ZERO || l.ask <= l.bid)
        {
            return invalid(format!(
                "paper.book_path[{i}] must satisfy 0 < bid < ask (bid {}, ask {})",
                level.bid, level.ask
            ));
        }

        if self.order.amount <= Decimal::ZERO {
            return invalid(format!("order.amount must be positive, got {}", self.order.amount));
        }
        match (self.order.kind, self.order.price) {
            (OrderKind::Limit, None) => {
                return invalid("order.price is required for limit orders".to_string());
            }
            (OrderKind::Limit, Some(price)) if price <= Decimal::ZERO => {
                return invalid(format!("order.price must be positive, got {price}"));
            }
            _ => {}
        }

        if self.trailing_stop.trail < Decimal::ZERO {
            return invalid(format!(
                "trailing_stop.trail must not be negative, got {}",
                self.trailing_stop.trail
            ));
        }
        Ok(())
    }

    /// Paper venue settings in broker terms.
    pub fn paper_config(&self) -> PaperConfig {
        PaperConfig {
            symbol: self.paper.symbol.clone(),
            limits: MarketLimits::new(
                Price::new(self.paper.tick),
                Size::new(self.paper.min_amount),
            ),
            maker_fee: self.paper.maker_fee,
            taker_fee: self.paper.taker_fee,
            maker_fill_ratio: self.paper.maker_fill_ratio,
            intervals: BrokerIntervals {
                order_sync: self.paper.order_sync(),
            },
        }
    }

    pub fn initial_book(&self) -> Ticker {
        Ticker::new(Price::new(self.paper.bid), Price::new(self.paper.ask))
    }

    pub fn book_path(&self) -> Vec<Ticker> {
        self.paper.book_path.iter().map(BookLevel::ticker).collect()
    }

    pub fn order_request(&self) -> OrderRequest {
        let mut request = OrderRequest::new(
            self.order.kind,
            self.order.side,
            Size::new(self.order.amount),
        );
        if let Some(price) = self.order.price {
            request = request.with_price(Price::new(price));
        }
        if let Some(id) = &self.order.correlation_id {
            request = request.with_correlation_id(CorrelationId::from(id.as_str()));
        }
        request
    }
}

fn invalid(message: String) -> AppResult<()> {
    Err(AppError::Config(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.clock, ClockMode::Realtime);
        assert_eq!(config.order.kind, OrderKind::Sticky);
        assert!(!config.trailing_stop.enabled);
    }

    #[test]
    fn test_parse_sections() {
        let config = AppConfig::from_toml(
            r#"
            [execution]
            clock = "simulated"

            [paper]
            bid = "200"
            ask = "200.5"
            maker_fill_ratio = "0.5"
            book_path = [{ bid = "201", ask = "202" }]

            [order]
            kind = "limit"
            side = "sell"
            amount = "0.5"
            price = "210"
            correlation_id = "decision-1"

            [trailing_stop]
            enabled = true
            trail = "2.5"
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.clock, ClockMode::Simulated);
        assert_eq!(config.paper.tick, dec!(0.01));
        assert_eq!(config.book_path(), vec![Ticker::new(Price::new(dec!(201)), Price::new(dec!(202)))]);

        let request = config.order_request();
        assert_eq!(request.kind, OrderKind::Limit);
        assert_eq!(request.side, OrderSide::Sell);
        assert_eq!(request.price, Some(Price::new(dec!(210))));
        assert_eq!(request.correlation_id.as_str(), "decision-1");
        assert_eq!(config.trailing_stop.trail, dec!(2.5));
    }

    #[test]
    fn test_limit_requires_price() {
        let err = AppConfig::from_toml("[order]\nkind = \"limit\"\n").unwrap_err();
        assert!(err.to_string().contains("order.price is required"));
    }

    #[test]
    fn test_rejects_crossed_book() {
        let mut config = AppConfig::default();
        config.paper.book_path.push(BookLevel {
            bid: dec!(101),
            ask: dec!(100),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("book_path[0]"));
    }

    #[test]
    fn test_rejects_fill_ratio_above_one() {
        let mut config = AppConfig::default();
        config.paper.maker_fill_ratio = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert!(!config.paper.book_path.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("maker_fill_ratio"));
        assert!(toml_str.contains("[trailing_stop]"));
    }
}
