// src/ingest/types.rs
use anyhow::Result;

use crate::news::{Category, NewsItem, ScheduleSnapshot};

/// External news listing. Returns a category's current items, newest first.
///
/// `since` is the source key of the newest item already stored for the
/// category; sources that cannot page by cursor ignore it.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_category(&self, category: Category, since: Option<&str>) -> Result<Vec<NewsItem>>;
    fn name(&self) -> &'static str;
}

/// A stored item whose window or event times were corrected by the source.
#[derive(Debug, Clone)]
pub struct ScheduleChange {
    pub item: NewsItem,
    pub previous: ScheduleSnapshot,
}

/// Result of one ingestion pass over one category.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Newly stored items, oldest fetched first.
    pub accepted: Vec<NewsItem>,
    pub changed: Vec<ScheduleChange>,
    pub evicted: Vec<String>,
    pub duplicates: usize,
    pub invalid: usize,
    /// Not stored: the store was full and held only newer items.
    pub stale: usize,
    /// First pass over an empty store: accepted items are recorded but not announced.
    pub seeded: bool,
}
