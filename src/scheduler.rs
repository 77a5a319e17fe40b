// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::dispatch::{DispatchReport, Dispatcher};
use crate::ingest::IngestEngine;
use crate::news::Category;
use crate::tracker::StateTracker;

#[derive(Debug, Clone, Default)]
pub struct CategoryReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub changed: usize,
    pub evicted: usize,
    pub seeded: bool,
    pub dispatch: DispatchReport,
    /// Set when the fetch failed; the category is retried next tick.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub categories: Vec<(Category, CategoryReport)>,
}

impl TickReport {
    pub fn get(&self, c: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|(k, _)| *k == c).map(|(_, r)| r)
    }

    pub fn dispatch_total(&self) -> DispatchReport {
        let mut total = DispatchReport::default();
        for (_, r) in &self.categories {
            total.merge(r.dispatch);
        }
        total
    }
}

/// Ingestion, tracking and dispatch wired together for one tick.
pub struct Relay {
    engine: IngestEngine,
    tracker: StateTracker,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(engine: IngestEngine, tracker: StateTracker, dispatcher: Dispatcher) -> Self {
        Self {
            engine,
            tracker,
            dispatcher,
        }
    }

    pub fn engine(&self) -> &IngestEngine {
        &self.engine
    }

    /// Ingest -> track -> dispatch for one category.
    pub async fn run_category(
        &self,
        category: Category,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> CategoryReport {
        let mut report = CategoryReport::default();
        let store = self.engine.stores().get(category).clone();

        let outcome = match self.engine.run_category(category).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(category = %category, error = ?e, "category fetch failed, skipping this tick");
                report.error = Some(format!("{e:#}"));
                Default::default()
            }
        };
        report.accepted = outcome.accepted.len();
        report.duplicates = outcome.duplicates;
        report.stale = outcome.stale;
        report.changed = outcome.changed.len();
        report.evicted = outcome.evicted.len();
        report.seeded = outcome.seeded;

        // scheduled reminders still come due when the fetch failed
        let signals = self.tracker.evaluate(&store, &outcome, now).await;
        report.dispatch = self.dispatcher.dispatch(signals, shutdown).await;
        report
    }

    /// All categories concurrently, joined before returning.
    pub async fn run_tick(self: &Arc<Self>, now: DateTime<Utc>, shutdown: &watch::Receiver<bool>) -> TickReport {
        let mut set = JoinSet::new();
        for category in Category::ALL {
            let relay = Arc::clone(self);
            let shutdown = shutdown.clone();
            set.spawn(async move {
                let r = relay.run_category(category, now, &shutdown).await;
                (category, r)
            });
        }

        let mut tick = TickReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => tick.categories.push(pair),
                Err(e) => tracing::error!(error = %e, "category task panicked"),
            }
        }
        tick.categories.sort_by_key(|(c, _)| c.index());

        counter!("relay_ticks_total").increment(1);
        gauge!("relay_tick_last_run_ts").set(Utc::now().timestamp() as f64);
        tick
    }
}

/// Spawn the polling loop. A tick that is running when shutdown is
/// requested still finishes its store mutations; only its pending sends
/// are abandoned. No new tick starts afterwards.
pub fn spawn_scheduler(relay: Arc<Relay>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = crate::dispatch::wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let tick = relay.run_tick(Utc::now(), &shutdown).await;
            let total = tick.dispatch_total();
            let failed_categories = tick.categories.iter().filter(|(_, r)| r.error.is_some()).count();
            tracing::info!(
                target: "ingest",
                accepted = tick.categories.iter().map(|(_, r)| r.accepted).sum::<usize>(),
                signals = total.signals,
                sent = total.sent,
                failed = total.failed + total.timed_out,
                failed_categories,
                "relay tick"
            );
        }
        tracing::info!("scheduler stopped");
    })
}
