// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::types::{IngestOutcome, NewsSource, ScheduleChange};
use crate::news::{Category, DescriptionBlock, EventSchedule, NewsItem, ScheduleSnapshot};
use crate::store::{CategoryStore, InsertMode, Stores};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_source_items_total", "Items parsed from the news source.");
        describe_counter!("relay_ingest_accepted_total", "Items newly stored.");
        describe_counter!(
            "relay_ingest_duplicate_total",
            "Fetched items already present in their store."
        );
        describe_counter!("relay_ingest_invalid_total", "Fetched items rejected at validation.");
        describe_counter!(
            "relay_ingest_stale_total",
            "Fetched items older than everything in their full store."
        );
        describe_counter!("relay_ingest_evicted_total", "Items evicted to make room.");
        describe_counter!(
            "relay_schedule_changed_total",
            "Stored items whose window or event times changed."
        );
        describe_counter!("relay_fetch_errors_total", "News source fetch errors and timeouts.");
        describe_counter!("relay_signals_total", "Signals handed to the dispatcher.");
        describe_counter!("relay_send_ok_total", "Successful deliveries.");
        describe_counter!("relay_send_failed_total", "Failed or timed out deliveries.");
        describe_histogram!("relay_source_parse_ms", "Source parse time in milliseconds.");
        describe_counter!("relay_ticks_total", "Scheduler ticks completed.");
        describe_gauge!("relay_tick_last_run_ts", "Unix ts when the last tick finished.");
    });
}

/// Normalize a single-line field: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Normalize multi-line markdown: decode entities, trim every line, and
/// squeeze runs of blank lines down to one.
pub fn normalize_markdown(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).replace("\r\n", "\n");
    let mut out = String::with_capacity(decoded.len());
    let mut blank_run = 0usize;
    for line in decoded.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Boundary check for items coming from the source. Returns `None` for
/// items that cannot enter `category`'s store.
pub fn validate_item(category: Category, mut item: NewsItem) -> Option<NewsItem> {
    if item.category != category {
        return None;
    }
    item.source_key = item.source_key.trim().to_string();
    if item.source_key.is_empty() {
        return None;
    }

    item.title = normalize_text(&item.title);
    if item.title.is_empty() {
        return None;
    }
    item.tag = item
        .tag
        .map(|t| normalize_text(&t))
        .filter(|t| !t.is_empty());
    item.summary = normalize_markdown(&item.summary);
    item.banner_url = item.banner_url.filter(|u| !u.trim().is_empty());

    item.description_blocks = item
        .description_blocks
        .map(|blocks| {
            blocks
                .into_iter()
                .filter_map(|b| match b {
                    DescriptionBlock::Text { markdown } => {
                        let markdown = normalize_markdown(&markdown);
                        (!markdown.is_empty()).then_some(DescriptionBlock::Text { markdown })
                    }
                    DescriptionBlock::MediaGallery { urls } => {
                        let urls: Vec<String> =
                            urls.into_iter().filter(|u| !u.trim().is_empty()).collect();
                        (!urls.is_empty()).then_some(DescriptionBlock::MediaGallery { urls })
                    }
                    DescriptionBlock::Separator => Some(DescriptionBlock::Separator),
                })
                .collect::<Vec<_>>()
        })
        .filter(|blocks| !blocks.is_empty());

    // Windows only exist on maintenance posts.
    if category != Category::Maintenance {
        item.window = None;
    }
    if let Some(w) = item.window.as_mut() {
        if w.end < w.start {
            std::mem::swap(&mut w.start, &mut w.end);
        }
    }
    if let Some(ev) = item.event.as_mut() {
        sanitize_event(ev);
    }
    item.event = item
        .event
        .filter(|ev| ev.effective_start().is_some() || ev.live_broadcast_at.is_some());

    Some(item)
}

fn sanitize_event(ev: &mut EventSchedule) {
    if let (Some(s), Some(e)) = (ev.nominal_start, ev.nominal_end) {
        if e < s {
            ev.nominal_start = Some(e);
            ev.nominal_end = Some(s);
        }
    }
    if let (Some(s), Some(e)) = (ev.start_override, ev.end_override) {
        if e < s {
            ev.start_override = Some(e);
            ev.end_override = Some(s);
        }
    }
}

/// Source-reported schedule differs from the stored one. Values the source
/// stops reporting are kept, never cleared.
fn schedule_differs(stored: &NewsItem, fetched: &NewsItem) -> bool {
    let window_changed = fetched.window.is_some() && fetched.window != stored.window;
    let event_changed = match (&fetched.event, &stored.event) {
        (Some(f), Some(s)) => f.times() != s.times(),
        (Some(_), None) => true,
        (None, _) => false,
    };
    window_changed || event_changed
}

/// Copies the fetched window/event times onto the stored item, keeping its
/// reminder and broadcast flags.
fn apply_schedule(stored: &mut NewsItem, fetched: &NewsItem) {
    if fetched.window.is_some() {
        stored.window = fetched.window;
    }
    if let Some(f) = &fetched.event {
        match stored.event.as_mut() {
            Some(ev) => ev.apply_times(f.times()),
            None => {
                let mut ev = f.clone();
                ev.reminder = Default::default();
                ev.live_broadcast = Default::default();
                stored.event = Some(ev);
            }
        }
    }
}

/// Pulls each category from the source and diffs it against its store.
pub struct IngestEngine {
    source: Arc<dyn NewsSource>,
    stores: Arc<Stores>,
    fetch_timeout: Duration,
    seed_empty_stores: bool,
}

impl IngestEngine {
    pub fn new(source: Arc<dyn NewsSource>, stores: Arc<Stores>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            stores,
            fetch_timeout,
            seed_empty_stores: false,
        }
    }

    /// When on, the first pass over an empty store records the listing
    /// without announcing it, so a fresh deployment does not replay history.
    pub fn with_seed_empty_stores(mut self, on: bool) -> Self {
        self.seed_empty_stores = on;
        self
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// One pass over one category. Errors only when the fetch fails or times out.
    pub async fn run_category(&self, category: Category) -> anyhow::Result<IngestOutcome> {
        ensure_metrics_described();
        let store = self.stores.get(category).clone();

        let since = store
            .list_newest_first()
            .await
            .first()
            .map(|i| i.source_key.clone());

        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.source.fetch_category(category, since.as_deref()),
        )
        .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                counter!("relay_fetch_errors_total").increment(1);
                return Err(e.context(format!("fetching {category} from {}", self.source.name())));
            }
            Err(_) => {
                counter!("relay_fetch_errors_total").increment(1);
                anyhow::bail!(
                    "fetching {category} from {} timed out after {:?}",
                    self.source.name(),
                    self.fetch_timeout
                );
            }
        };

        let seeded = self.seed_empty_stores && store.is_empty().await;
        let mut outcome = diff_into_store(&store, fetched).await;
        outcome.seeded = seeded;

        counter!("relay_ingest_accepted_total").increment(outcome.accepted.len() as u64);
        counter!("relay_ingest_duplicate_total").increment(outcome.duplicates as u64);
        counter!("relay_ingest_invalid_total").increment(outcome.invalid as u64);
        counter!("relay_ingest_stale_total").increment(outcome.stale as u64);
        counter!("relay_ingest_evicted_total").increment(outcome.evicted.len() as u64);
        counter!("relay_schedule_changed_total").increment(outcome.changed.len() as u64);

        tracing::debug!(
            target: "ingest",
            category = %category,
            accepted = outcome.accepted.len(),
            duplicates = outcome.duplicates,
            stale = outcome.stale,
            changed = outcome.changed.len(),
            evicted = outcome.evicted.len(),
            seeded,
            "category pass done"
        );
        Ok(outcome)
    }
}

/// Insert-or-diff a newest-first listing into `store`. Items are applied
/// oldest first so the store keeps chronological order within the category.
pub async fn diff_into_store(store: &CategoryStore, fetched: Vec<NewsItem>) -> IngestOutcome {
    let category = store.category();
    let mut outcome = IngestOutcome::default();

    for raw in fetched.into_iter().rev() {
        let Some(item) = validate_item(category, raw) else {
            outcome.invalid += 1;
            continue;
        };

        let key = item.source_key.clone();
        let scheduled = item.is_scheduled();
        let fetched_copy = scheduled.then(|| item.clone());

        match store.insert(item, InsertMode::EvictOlder).await {
            Ok(ins) => {
                if let Some(ev) = ins.evicted {
                    // an item accepted earlier in this pass may already be gone again
                    outcome.accepted.retain(|a| a.source_key != ev.source_key);
                    outcome.changed.retain(|c| c.item.source_key != ev.source_key);
                    outcome.evicted.push(ev.source_key);
                }
                match store.get(&key).await {
                    Ok(stored) => outcome.accepted.push(stored),
                    Err(e) => tracing::warn!(category = %category, error = %e, "accepted item vanished"),
                }
            }
            // already fell out of a full store; re-inserting would push out newer posts
            Err(e) if e.is_stale() => outcome.stale += 1,
            Err(e) if e.is_already_in_store() => {
                outcome.duplicates += 1;
                let Some(fetched) = fetched_copy else { continue };
                match detect_schedule_change(store, &fetched).await {
                    Ok(Some(change)) => {
                        outcome.changed.retain(|c| c.item.source_key != key);
                        outcome.changed.push(change);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        category = %category,
                        source_key = %key,
                        error = %e,
                        "schedule update failed"
                    ),
                }
            }
            Err(e) => {
                tracing::warn!(category = %category, source_key = %key, error = %e, "insert failed");
            }
        }
    }

    outcome
}

async fn detect_schedule_change(
    store: &CategoryStore,
    fetched: &NewsItem,
) -> Result<Option<ScheduleChange>, crate::store::StoreError> {
    let (previous, item): (Option<ScheduleSnapshot>, NewsItem) = store
        .update(&fetched.source_key, |stored| {
            if !schedule_differs(stored, fetched) {
                return None;
            }
            let before = stored.schedule();
            apply_schedule(stored, fetched);
            Some(before)
        })
        .await?;

    Ok(previous.map(|previous| ScheduleChange { item, previous }))
}
