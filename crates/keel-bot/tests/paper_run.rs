//! Paper runs of whole trading decisions.

use keel_bot::{AppConfig, Application};
use keel_core::{OrderKind, OrderSide, OrderStatus, Price, Size};
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

fn config(body: &str) -> AppConfig {
    AppConfig::from_toml(body).unwrap()
}

#[tokio::test]
async fn test_sticky_buy_follows_the_book_until_filled() {
    let app = assert_ok!(Application::new(config(
        r#"
        [execution]
        clock = "simulated"

        [paper]
        maker_fill_ratio = "0.25"
        book_path = [
            { bid = "100", ask = "101" },
            { bid = "100.5", ask = "101" },
            { bid = "100.6", ask = "101" },
            { bid = "100.2", ask = "100.4" },
            { bid = "99", ask = "100" },
        ]

        [order]
        kind = "sticky"
        side = "buy"
        amount = "1"
        correlation_id = "sticky-run"
        "#,
    )));

    let report = assert_ok!(app.run().await);
    let entry = report.entry;

    assert_eq!(entry.correlation_id.as_str(), "sticky-run");
    assert_eq!(entry.kind, OrderKind::Sticky);
    assert_eq!(entry.status, OrderStatus::Filled);
    assert_eq!(entry.filled, Size::new(dec!(1)));

    // 0.25 rested inside the spread at 100.01, the rest was repriced twice
    // and traded through at 100.61.
    let summary = entry.summary.unwrap();
    assert_eq!(summary.amount, Size::new(dec!(1)));
    assert_eq!(summary.price, Price::new(dec!(100.46)));
    assert_eq!(summary.fee_percent, Some(dec!(0.1)));
    assert_eq!(app.venue().open_orders(), 0);
    assert!(report.exit.is_none());
}

#[tokio::test]
async fn test_unreached_limit_is_canceled_after_the_path() {
    let app = assert_ok!(Application::new(config(
        r#"
        [execution]
        clock = "simulated"

        [paper]
        book_path = [
            { bid = "100.5", ask = "101.5" },
            { bid = "101", ask = "102" },
        ]

        [order]
        kind = "limit"
        side = "buy"
        amount = "2"
        price = "95"

        [trailing_stop]
        enabled = true
        "#,
    )));

    let report = assert_ok!(app.run().await);

    assert_eq!(report.entry.status, OrderStatus::Canceled);
    assert_eq!(report.entry.filled, Size::ZERO);
    assert!(report.entry.summary.is_none());
    assert!(report.exit.is_none());
    assert_eq!(app.venue().open_orders(), 0);
}

#[tokio::test]
async fn test_trailing_stop_sells_a_filled_market_buy() {
    let app = assert_ok!(Application::new(config(
        r#"
        [execution]
        clock = "simulated"

        [paper]
        book_path = [
            { bid = "102", ask = "103" },
            { bid = "105", ask = "106" },
            { bid = "104", ask = "105" },
            { bid = "102.5", ask = "103.5" },
            { bid = "90", ask = "91" },
        ]

        [order]
        kind = "market"
        side = "buy"
        amount = "0.5"

        [trailing_stop]
        enabled = true
        trail = "2"
        "#,
    )));

    let report = assert_ok!(app.run().await);

    assert_eq!(report.entry.status, OrderStatus::Filled);
    assert_eq!(report.entry.summary.as_ref().unwrap().price, Price::new(dec!(101)));

    // High-water mark 105 puts the stop at 103.
    let exit = report.exit.unwrap();
    assert_eq!(exit.trigger_price, Price::new(dec!(102.5)));
    assert_eq!(exit.order.kind, OrderKind::Market);
    assert_eq!(exit.order.side, OrderSide::Sell);
    assert_eq!(exit.order.status, OrderStatus::Filled);
    assert_eq!(exit.order.filled, Size::new(dec!(0.5)));
    assert_eq!(exit.order.summary.unwrap().price, Price::new(dec!(102.5)));
    assert!(exit.order.correlation_id.as_str().ends_with("-exit"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_the_open_order() {
    let app = assert_ok!(Application::new(config(
        r#"
        [paper]
        order_sync_ms = 200
        book_path = [{ bid = "100", ask = "101" }]

        [order]
        kind = "limit"
        side = "sell"
        amount = "1"
        price = "110"
        "#,
    )));
    app.shutdown_token().cancel();

    let report = assert_ok!(app.run().await);

    assert_eq!(report.entry.status, OrderStatus::Canceled);
    assert_eq!(app.venue().open_orders(), 0);
}
