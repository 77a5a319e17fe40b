// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod news;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod tracker;

// ---- Re-exports for a stable public API ----
pub use crate::dispatch::{Dispatcher, RenderedPayload, Sender};
pub use crate::ingest::{types::NewsSource, IngestEngine};
pub use crate::news::{Category, NewsItem};
pub use crate::scheduler::{spawn_scheduler, Relay};
pub use crate::store::{CategoryStore, StoreError, Stores};
pub use crate::tracker::{Signal, StateTracker};

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::RelayConfig;
use crate::routes::RouteRegistry;
use crate::store::{ItemBackend, JsonFileBackend, MemoryBackend};

/// Compact logs by default, JSON lines when `RELAY_LOG_JSON=1`.
/// Filter from `RUST_LOG`, else `lodestone_relay=info,ingest=info,warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lodestone_relay=info,ingest=info,warn"));
    let json = std::env::var("RELAY_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    // a subscriber may already be installed (tests, embedding)
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

/// Build stores (restoring persisted items), engine, tracker and dispatcher
/// from `cfg` around the given collaborators.
pub async fn build_relay(
    cfg: &RelayConfig,
    source: Arc<dyn NewsSource>,
    routes: Arc<dyn RouteRegistry>,
    sender: Arc<dyn Sender>,
) -> Arc<Relay> {
    let backend: Arc<dyn ItemBackend> = if cfg.persist_items {
        Arc::new(JsonFileBackend::new(cfg.state_dir.clone()))
    } else {
        Arc::new(MemoryBackend::default())
    };
    let stores = Arc::new(Stores::new(|c| cfg.capacity_for(c), backend));

    for (category, res) in stores.restore_all().await {
        match res {
            Ok(n) => info!(category = %category, restored = n, "store ready"),
            Err(e) => warn!(category = %category, error = %e, "store restore incomplete"),
        }
    }

    let engine = IngestEngine::new(source, stores, cfg.fetch_timeout())
        .with_seed_empty_stores(cfg.seed_empty_stores);
    let tracker = StateTracker::new(cfg.reminder_lead(), cfg.broadcast_grace());
    let dispatcher = Dispatcher::new(routes, sender, cfg.send_timeout())
        .with_enabled(cfg.dispatch_notifications);

    info!(
        source = engine.source_name(),
        persist = cfg.persist_items,
        dispatch = cfg.dispatch_notifications,
        "relay built"
    );
    Arc::new(Relay::new(engine, tracker, dispatcher))
}
