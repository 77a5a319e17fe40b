// tests/dispatch_fanout.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{event_topic, harness, item, key, route, ts, RecordingSender};
use lodestone_relay::dispatch::Dispatcher;
use lodestone_relay::news::Category;
use lodestone_relay::routes::MemoryRoutes;
use lodestone_relay::tracker::{Signal, SignalKind};
use tokio::sync::watch;

fn dispatcher(routes: &Arc<MemoryRoutes>, sender: &Arc<RecordingSender>) -> Dispatcher {
    Dispatcher::new(routes.clone(), sender.clone(), Duration::from_secs(1))
}

fn new_items(keys: &[&str]) -> Vec<Signal> {
    keys.iter()
        .enumerate()
        .map(|(i, k)| Signal::NewItem(item(Category::Topic, k, i as i64)))
        .collect()
}

#[tokio::test]
async fn failing_destination_does_not_affect_others() {
    let routes = Arc::new(MemoryRoutes::from_routes([
        route(1, Category::Topic, 10),
        route(2, Category::Topic, 20),
        route(3, Category::Topic, 30),
    ]));
    let sender = Arc::new(RecordingSender::default());
    sender.fail_channel(20);
    let (_tx, rx) = watch::channel(false);

    let report = dispatcher(&routes, &sender)
        .dispatch(new_items(&["a", "b"]), &rx)
        .await;

    assert_eq!(report.signals, 2);
    assert_eq!(report.sent, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(sender.channels_for(&key("a")), vec![10, 30]);
    assert_eq!(sender.channels_for(&key("b")), vec![10, 30]);
}

#[tokio::test]
async fn signals_only_reach_routes_of_their_category() {
    let routes = Arc::new(MemoryRoutes::from_routes([
        route(1, Category::Topic, 10),
        route(1, Category::Maintenance, 11),
        route(2, Category::Maintenance, 21),
    ]));
    let sender = Arc::new(RecordingSender::default());
    let (_tx, rx) = watch::channel(false);

    let signals = vec![
        Signal::NewItem(item(Category::Maintenance, "m", 0)),
        Signal::NewItem(item(Category::Notice, "n", 0)),
    ];
    let report = dispatcher(&routes, &sender).dispatch(signals, &rx).await;

    assert_eq!(report.sent, 2);
    assert_eq!(sender.channels_for(&key("m")), vec![11, 21]);
    assert!(sender.channels_for(&key("n")).is_empty());
}

#[tokio::test]
async fn deliveries_follow_signal_order() {
    let routes = Arc::new(MemoryRoutes::from_routes([route(1, Category::Topic, 10)]));
    let sender = Arc::new(RecordingSender::default());
    let (_tx, rx) = watch::channel(false);

    dispatcher(&routes, &sender)
        .dispatch(new_items(&["first", "second", "third"]), &rx)
        .await;

    let urls: Vec<String> = sender.deliveries().into_iter().map(|(_, p)| p.url).collect();
    assert_eq!(urls, vec![key("first"), key("second"), key("third")]);
}

#[tokio::test]
async fn disabled_dispatch_drops_signals() {
    let routes = Arc::new(MemoryRoutes::from_routes([route(1, Category::Topic, 10)]));
    let sender = Arc::new(RecordingSender::default());
    let (_tx, rx) = watch::channel(false);

    let d = dispatcher(&routes, &sender).with_enabled(false);
    assert!(!d.is_enabled());
    let report = d.dispatch(new_items(&["a", "b"]), &rx).await;

    assert_eq!(report.skipped, 2);
    assert_eq!(report.sent, 0);
    assert!(sender.deliveries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_destination_times_out_alone() {
    let routes = Arc::new(MemoryRoutes::from_routes([
        route(1, Category::Topic, 10),
        route(2, Category::Topic, 20),
    ]));
    let sender = Arc::new(RecordingSender::default());
    sender.hang_channel(20);
    let (_tx, rx) = watch::channel(false);

    let report = dispatcher(&routes, &sender).dispatch(new_items(&["a"]), &rx).await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(sender.channels_for(&key("a")), vec![10]);
}

#[tokio::test]
async fn shutdown_abandons_remaining_signals() {
    let routes = Arc::new(MemoryRoutes::from_routes([route(1, Category::Topic, 10)]));
    let sender = Arc::new(RecordingSender::default());
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = dispatcher(&routes, &sender)
        .dispatch(new_items(&["a", "b", "c"]), &rx)
        .await;

    assert_eq!(report.abandoned, 3);
    assert!(sender.deliveries().is_empty());
}

#[tokio::test]
async fn late_route_gets_reminder_but_not_the_earlier_new_item() {
    let h = harness(10);
    h.routes.upsert(route(1, Category::Topic, 10));
    let (_tx, rx) = watch::channel(false);

    h.source.set(Category::Topic, vec![event_topic("e1", 0, 10_000)]);
    h.relay.run_tick(ts(0), &rx).await;

    h.routes.upsert(route(2, Category::Topic, 20));
    h.relay.run_tick(ts(6_400), &rx).await;

    let by_kind = |kind: SignalKind| -> Vec<u64> {
        let mut v: Vec<u64> = h
            .sender
            .deliveries()
            .into_iter()
            .filter(|(_, p)| p.kind == kind)
            .map(|(c, _)| c)
            .collect();
        v.sort_unstable();
        v
    };
    assert_eq!(by_kind(SignalKind::NewItem), vec![10]);
    assert_eq!(by_kind(SignalKind::ReminderDue), vec![10, 20]);
}

#[tokio::test]
async fn replaced_route_moves_delivery_to_new_channel() {
    let routes = Arc::new(MemoryRoutes::default());
    let sender = Arc::new(RecordingSender::default());
    let (_tx, rx) = watch::channel(false);
    let d = dispatcher(&routes, &sender);

    assert_eq!(routes.upsert(route(1, Category::Topic, 10)), None);
    d.dispatch(new_items(&["a"]), &rx).await;
    assert_eq!(routes.upsert(route(1, Category::Topic, 15)), Some(10));
    d.dispatch(new_items(&["b"]), &rx).await;
    assert_eq!(routes.remove(1, Category::Topic), Some(15));
    d.dispatch(new_items(&["c"]), &rx).await;

    assert_eq!(sender.channels_for(&key("a")), vec![10]);
    assert_eq!(sender.channels_for(&key("b")), vec![15]);
    assert!(sender.channels_for(&key("c")).is_empty());
}
