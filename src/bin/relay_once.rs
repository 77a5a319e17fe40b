//! Runs a single relay tick against the embedded fixtures and logs every
//! notification instead of sending it.

use std::sync::Arc;

use chrono::Utc;
use lodestone_relay::config::RelayConfig;
use lodestone_relay::dispatch::LogSender;
use lodestone_relay::ingest::providers::lodestone::LodestoneProvider;
use lodestone_relay::routes::{MemoryRoutes, Route};
use lodestone_relay::{build_relay, init_tracing, Category};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    init_tracing();

    let source = LodestoneProvider::from_fixtures([
        (Category::Topic, include_str!("../../tests/fixtures/lodestone_topics.json")),
        (Category::Maintenance, include_str!("../../tests/fixtures/lodestone_maintenance.json")),
        (Category::Notice, include_str!("../../tests/fixtures/lodestone_notices.json")),
    ]);
    let routes = MemoryRoutes::from_routes(Category::ALL.map(|category| Route {
        guild_id: 1,
        category,
        channel_id: 100 + category.index() as u64,
    }));

    let cfg = RelayConfig {
        persist_items: false,
        seed_empty_stores: false,
        ..RelayConfig::default()
    };
    let relay = build_relay(&cfg, Arc::new(source), Arc::new(routes), Arc::new(LogSender)).await;

    let (_tx, rx) = watch::channel(false);
    let tick = relay.run_tick(Utc::now(), &rx).await;
    for (category, r) in &tick.categories {
        println!(
            "{category:<12} accepted={} duplicates={} signals={} sent={}",
            r.accepted, r.duplicates, r.dispatch.signals, r.dispatch.sent
        );
    }
    println!("relay-once done");
}
