//! End-to-end order scenarios against the scripted and paper brokers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keel_broker::{
    BrokerCall, BrokerError, BrokerIntervals, MockBroker, PaperBroker, PaperConfig,
};
use keel_core::{
    CorrelationId, OrderSide, OrderStatus, Price, RemoteOrder, RemoteStatus, Size, Ticker, Trade,
    TradeFee,
};
use keel_orders::{
    create_order, Completion, LimitOrder, MarketOrder, Order, OrderContext, OrderEvent,
    OrderRequest, StickyOrder,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

fn p(value: Decimal) -> Price {
    Price::new(value)
}

fn s(value: Decimal) -> Size {
    Size::new(value)
}

fn record<O: Order>(order: &O) -> Arc<Mutex<Vec<OrderEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    order.subscribe(move |e| sink.lock().push(e.clone()));
    seen
}

fn completions(seen: &Mutex<Vec<OrderEvent>>) -> Vec<OrderEvent> {
    seen.lock().iter().filter(|e| e.is_completed()).cloned().collect()
}

#[tokio::test]
async fn test_limit_order_fills_on_poll() {
    let broker = Arc::new(MockBroker::new());
    broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));
    broker.push_fetch(Ok(RemoteOrder::new("o1", RemoteStatus::Closed).with_filled(s(dec!(1)))));

    let order = LimitOrder::new(
        CorrelationId::from("limit-1"),
        OrderSide::Buy,
        s(dec!(1)),
        p(dec!(100)),
        OrderContext::simulated(broker.clone()),
    );
    let seen = record(order.as_ref());

    assert_ok!(order.launch().await);
    assert_eq!(order.status(), OrderStatus::Open);
    assert_ok!(order.check_order().await);

    assert_eq!(
        completions(&seen),
        vec![OrderEvent::Completed(Completion {
            status: OrderStatus::Filled,
            filled: true,
            partially_filled: false,
        })]
    );
}

#[tokio::test]
async fn test_sticky_reprice_places_only_the_remainder() {
    let broker = Arc::new(MockBroker::new());
    broker.push_create_limit(Ok(RemoteOrder::new("order-1", RemoteStatus::Open)));

    let order = StickyOrder::new(
        CorrelationId::from("sticky-1"),
        OrderSide::Sell,
        s(dec!(6)),
        OrderContext::simulated(broker.clone()),
    );
    assert_ok!(order.launch().await);
    assert_eq!(order.price(), Some(p(dec!(100.99))));

    broker.push_fetch(Ok(RemoteOrder::new("order-1", RemoteStatus::Open).with_filled(s(dec!(4)))));
    broker.push_cancel(Ok(
        RemoteOrder::new("order-1", RemoteStatus::Canceled).with_filled(s(dec!(4)))
    ));
    broker.push_create_limit(Ok(RemoteOrder::new("order-2", RemoteStatus::Open)));
    broker.set_ticker(Ticker::new(p(dec!(99)), p(dec!(100))));

    assert_ok!(order.check_order().await);

    assert_eq!(
        broker.calls().last(),
        Some(&BrokerCall::CreateLimit {
            side: OrderSide::Sell,
            amount: s(dec!(2)),
            price: p(dec!(99.99)),
        })
    );
    assert_eq!(order.status(), OrderStatus::Open);
    assert_eq!(order.id().unwrap().as_str(), "order-2");
    assert_eq!(order.total_filled(), s(dec!(4)));
    assert_eq!(order.base().transactions().len(), 2);
}

#[tokio::test]
async fn test_market_order_rejected_by_broker() {
    let broker = Arc::new(MockBroker::new());
    broker.push_create_market(Err(BrokerError::InvalidOrder("too small".into())));

    let order = MarketOrder::new(
        CorrelationId::from("market-1"),
        OrderSide::Buy,
        s(dec!(1)),
        OrderContext::simulated(broker.clone()),
    );
    let seen = record(order.as_ref());

    assert_ok!(order.launch().await);

    let events = seen.lock().clone();
    let invalid = events
        .iter()
        .position(|e| matches!(e, OrderEvent::Invalid(r) if r.contains("too small")))
        .expect("Invalid emitted");
    let completed = events
        .iter()
        .position(|e| {
            *e == OrderEvent::Completed(Completion {
                status: OrderStatus::Rejected,
                filled: false,
                partially_filled: false,
            })
        })
        .expect("Completed emitted");
    assert!(invalid < completed);
}

#[tokio::test]
async fn test_summary_over_order_ledger() {
    let broker = Arc::new(MockBroker::new());
    broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));
    broker.push_fetch(Ok(RemoteOrder::new("o1", RemoteStatus::Closed)));
    let later = Utc::now() + chrono::Duration::seconds(30);
    broker.set_trades(vec![
        Trade {
            order_id: "o1".into(),
            amount: s(dec!(1)),
            price: p(dec!(10)),
            fee: Some(TradeFee {
                rate: dec!(0.001),
                cost: None,
            }),
            timestamp: Utc::now(),
        },
        Trade {
            order_id: "o1".into(),
            amount: s(dec!(1)),
            price: p(dec!(12)),
            fee: Some(TradeFee {
                rate: dec!(0.002),
                cost: None,
            }),
            timestamp: later,
        },
    ]);

    let order = LimitOrder::new(
        CorrelationId::from("limit-2"),
        OrderSide::Buy,
        s(dec!(2)),
        p(dec!(11)),
        OrderContext::simulated(broker.clone()),
    );
    assert_ok!(order.launch().await);
    assert_ok!(order.check_order().await);

    let summary = order.summary().await.unwrap();
    assert_eq!(summary.amount, s(dec!(2)));
    assert_eq!(summary.price, p(dec!(11)));
    assert_eq!(summary.fee_percent, Some(dec!(0.15)));
    assert_eq!(summary.execution_date, later);
    assert_eq!(summary.side, OrderSide::Buy);
}

#[tokio::test]
async fn test_cancel_on_terminal_order_never_reaches_broker() {
    let broker = Arc::new(MockBroker::new());
    broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Closed)));
    let ctx = OrderContext::simulated(broker.clone());

    let order = create_order(OrderRequest::sticky(OrderSide::Buy, s(dec!(1))), ctx).unwrap();
    assert_ok!(order.launch().await);
    assert_eq!(order.status(), OrderStatus::Filled);

    assert_ok!(order.cancel().await);
    assert_ok!(order.cancel().await);
    assert_eq!(broker.cancel_count(), 0);
}

#[tokio::test]
async fn test_sticky_total_matches_amount_after_reprices() {
    let venue = Arc::new(PaperBroker::new(
        PaperConfig {
            maker_fill_ratio: dec!(0.2),
            ..PaperConfig::default()
        },
        Ticker::new(p(dec!(100)), p(dec!(101))),
    ));
    let order = StickyOrder::new(
        CorrelationId::from("sticky-drift"),
        OrderSide::Buy,
        s(dec!(1)),
        OrderContext::simulated(venue.clone()),
    );
    let seen = record(order.as_ref());
    assert_ok!(order.launch().await);

    let mut book = Ticker::new(p(dec!(100)), p(dec!(101)));
    for _ in 0..3 {
        // Our bid is inside the spread and collects a maker fill.
        venue.step_book(book);
        // The book runs away above our bid.
        book = Ticker::new(book.bid + p(dec!(1)), book.ask + p(dec!(1)));
        venue.step_book(book);
        assert_ok!(order.check_order().await);
        assert_eq!(order.status(), OrderStatus::Open);
    }

    let ours = order.price().unwrap();
    assert_eq!(ours, p(dec!(103.01)));
    venue.step_book(Ticker::new(ours - p(dec!(1)), ours));
    assert_ok!(order.check_order().await);

    assert_eq!(order.status(), OrderStatus::Filled);
    assert_eq!(order.total_filled(), s(dec!(1)));
    let ledger: Size = order.base().transactions().iter().map(|t| t.filled).sum();
    assert_eq!(ledger, s(dec!(1)));
    assert_eq!(order.base().transactions().len(), 4);
    assert_eq!(venue.open_orders(), 0);
    assert_eq!(completions(&seen).len(), 1);

    let summary = order.summary().await.unwrap();
    assert_eq!(summary.amount, s(dec!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_an_order_stops_its_poll() {
    let broker = Arc::new(MockBroker::new());
    broker.set_intervals(BrokerIntervals {
        order_sync: Duration::from_secs(1),
    });
    broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));
    broker.set_fetch_fallback(RemoteOrder::new("o1", RemoteStatus::Open));

    let order = LimitOrder::new(
        CorrelationId::from("limit-drop"),
        OrderSide::Sell,
        s(dec!(1)),
        p(dec!(200)),
        OrderContext::realtime(broker.clone()),
    );
    assert_ok!(order.launch().await);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let fetches_before = broker
        .calls()
        .iter()
        .filter(|c| matches!(c, BrokerCall::Fetch(_)))
        .count();
    assert_eq!(fetches_before, 1);

    drop(order);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let fetches_after = broker
        .calls()
        .iter()
        .filter(|c| matches!(c, BrokerCall::Fetch(_)))
        .count();
    assert_eq!(fetches_after, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sticky_poll_follows_the_book_in_realtime() {
    let broker = Arc::new(MockBroker::new());
    broker.set_intervals(BrokerIntervals {
        order_sync: Duration::from_secs(1),
    });
    broker.push_create_limit(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));

    let order = StickyOrder::new(
        CorrelationId::from("sticky-rt"),
        OrderSide::Buy,
        s(dec!(1)),
        OrderContext::realtime(broker.clone()),
    );
    assert_ok!(order.launch().await);
    assert!(order.base().has_timer());

    broker.push_fetch(Ok(RemoteOrder::new("o1", RemoteStatus::Open)));
    broker.push_cancel(Ok(RemoteOrder::new("o1", RemoteStatus::Canceled)));
    broker.push_create_limit(Ok(RemoteOrder::new("o2", RemoteStatus::Open)));
    broker.push_fetch(Ok(RemoteOrder::new("o2", RemoteStatus::Closed)));
    broker.set_ticker(Ticker::new(p(dec!(100.5)), p(dec!(101))));

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert_eq!(order.status(), OrderStatus::Filled);
    assert_eq!(order.total_filled(), s(dec!(1)));
    assert!(!order.base().has_timer());
    assert!(broker.calls().contains(&BrokerCall::CreateLimit {
        side: OrderSide::Buy,
        amount: s(dec!(1)),
        price: p(dec!(100.51)),
    }));
}
