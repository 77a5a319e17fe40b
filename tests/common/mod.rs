// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lodestone_relay::dispatch::{Delivered, Dispatcher, RenderedPayload, Sender};
use lodestone_relay::news::{Category, EventSchedule, FlagState, MaintenanceWindow, NewsItem};
use lodestone_relay::routes::{MemoryRoutes, Route};
use lodestone_relay::{IngestEngine, NewsSource, Relay, StateTracker, Stores};

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

pub fn item(category: Category, key: &str, secs: i64) -> NewsItem {
    NewsItem::new(category, format!("https://example.test/{key}"), format!("Item {key}"), ts(secs))
}

pub fn key(k: &str) -> String {
    format!("https://example.test/{k}")
}

pub fn maintenance(k: &str, secs: i64, start: i64, end: i64) -> NewsItem {
    let mut it = item(Category::Maintenance, k, secs);
    it.window = Some(MaintenanceWindow {
        start: ts(start),
        end: ts(end),
    });
    it
}

pub fn event_topic(k: &str, secs: i64, start: i64) -> NewsItem {
    let mut it = item(Category::Topic, k, secs);
    it.event = Some(EventSchedule {
        nominal_start: Some(ts(start)),
        nominal_end: None,
        start_override: None,
        end_override: None,
        live_broadcast_at: None,
        live_broadcast: FlagState::Pending,
        reminder: FlagState::Pending,
    });
    it
}

/// News source whose listings and failures are set by the test.
#[derive(Default)]
pub struct ScriptedSource {
    listings: Mutex<HashMap<Category, Vec<NewsItem>>>,
    failing: Mutex<HashSet<Category>>,
    hanging: Mutex<HashSet<Category>>,
}

impl ScriptedSource {
    /// `items` newest first, as the real source returns them.
    pub fn set(&self, category: Category, items: Vec<NewsItem>) {
        self.listings.lock().unwrap().insert(category, items);
    }

    pub fn fail(&self, category: Category, on: bool) {
        let mut f = self.failing.lock().unwrap();
        if on {
            f.insert(category);
        } else {
            f.remove(&category);
        }
    }

    pub fn hang(&self, category: Category) {
        self.hanging.lock().unwrap().insert(category);
    }
}

#[async_trait]
impl NewsSource for ScriptedSource {
    async fn fetch_category(&self, category: Category, _since: Option<&str>) -> Result<Vec<NewsItem>> {
        if self.failing.lock().unwrap().contains(&category) {
            return Err(anyhow!("source unreachable"));
        }
        let hang = self.hanging.lock().unwrap().contains(&category);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Records every delivery; configured channels fail or hang.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(u64, RenderedPayload)>>,
    failing: Mutex<HashSet<u64>>,
    hanging: Mutex<HashSet<u64>>,
}

impl RecordingSender {
    pub fn fail_channel(&self, ch: u64) {
        self.failing.lock().unwrap().insert(ch);
    }

    pub fn hang_channel(&self, ch: u64) {
        self.hanging.lock().unwrap().insert(ch);
    }

    pub fn deliveries(&self) -> Vec<(u64, RenderedPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn channels_for(&self, url: &str) -> Vec<u64> {
        let mut v: Vec<u64> = self
            .deliveries()
            .into_iter()
            .filter(|(_, p)| p.url == url)
            .map(|(c, _)| c)
            .collect();
        v.sort_unstable();
        v
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, channel_id: u64, payload: &RenderedPayload) -> Result<Delivered> {
        if self.failing.lock().unwrap().contains(&channel_id) {
            return Err(anyhow!("channel {channel_id} rejected the message"));
        }
        let hang = self.hanging.lock().unwrap().contains(&channel_id);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.sent.lock().unwrap().push((channel_id, payload.clone()));
        Ok(Delivered::default())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub sender: Arc<RecordingSender>,
    pub routes: Arc<MemoryRoutes>,
    pub stores: Arc<Stores>,
    pub relay: Arc<Relay>,
}

/// Relay over memory stores of `capacity`, no seeding, 1h reminder lead,
/// 2h broadcast grace, 1s send timeout.
pub fn harness(capacity: usize) -> Harness {
    let source = Arc::new(ScriptedSource::default());
    let sender = Arc::new(RecordingSender::default());
    let routes = Arc::new(MemoryRoutes::default());
    let stores = Arc::new(Stores::in_memory(capacity));
    let engine = IngestEngine::new(source.clone(), stores.clone(), Duration::from_secs(5));
    let tracker = StateTracker::new(chrono::Duration::hours(1), chrono::Duration::hours(2));
    let dispatcher = Dispatcher::new(routes.clone(), sender.clone(), Duration::from_secs(1));
    let relay = Arc::new(Relay::new(engine, tracker, dispatcher));
    Harness {
        source,
        sender,
        routes,
        stores,
        relay,
    }
}

pub fn route(guild_id: u64, category: Category, channel_id: u64) -> Route {
    Route {
        guild_id,
        category,
        channel_id,
    }
}
