use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;
use std::collections::HashMap;

use crate::ingest::types::NewsSource;
use crate::news::{Category, DescriptionBlock, EventSchedule, FlagState, MaintenanceWindow, NewsItem};

/// Listing entry as served by the news API (`GET {base}/news/{feed}`).
#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    blocks: Option<Vec<DescriptionBlock>>,
    // maintenance window
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    event: Option<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    start_override: Option<DateTime<Utc>>,
    #[serde(default)]
    end_override: Option<DateTime<Utc>>,
    #[serde(default)]
    live_broadcast: Option<DateTime<Utc>>,
}

fn to_item(category: Category, w: WireItem) -> Option<NewsItem> {
    let key = w.url.or(w.id)?;
    let published_at = w.time?;
    let mut item = NewsItem::new(category, key, w.title.unwrap_or_default(), published_at);
    item.tag = w.tag;
    item.summary = w.description.unwrap_or_default();
    item.description_blocks = w.blocks;
    item.banner_url = w.image;

    if category == Category::Maintenance {
        if let (Some(start), Some(end)) = (w.start, w.end) {
            item.window = Some(MaintenanceWindow { start, end });
        }
    }

    item.event = w.event.map(|e| EventSchedule {
        nominal_start: e.start,
        nominal_end: e.end,
        start_override: e.start_override,
        end_override: e.end_override,
        live_broadcast_at: e.live_broadcast,
        live_broadcast: FlagState::Pending,
        reminder: FlagState::Pending,
    });
    Some(item)
}

pub struct LodestoneProvider {
    mode: Mode,
    page_size: usize,
}

enum Mode {
    Fixture(HashMap<Category, String>),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl LodestoneProvider {
    /// Serve canned JSON listings, one per category; unknown categories yield `[]`.
    pub fn from_fixtures<I, S>(fixtures: I) -> Self
    where
        I: IntoIterator<Item = (Category, S)>,
        S: Into<String>,
    {
        Self {
            mode: Mode::Fixture(fixtures.into_iter().map(|(c, s)| (c, s.into())).collect()),
            page_size: 20,
        }
    }

    /// e.g. `https://na.lodestonenews.com`
    pub fn from_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lodestone-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            mode: Mode::Http {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client,
            },
            page_size: 20,
        }
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    pub fn parse_listing(category: Category, body: &str, page_size: usize) -> Result<Vec<NewsItem>> {
        let t0 = std::time::Instant::now();
        let wire: Vec<WireItem> = serde_json::from_str(body)
            .with_context(|| format!("parsing {category} listing json"))?;

        let mut out: Vec<NewsItem> = wire
            .into_iter()
            .filter_map(|w| to_item(category, w))
            .collect();
        // the API is newest first already; keep that contract even if it slips
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        out.truncate(page_size);

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("relay_source_parse_ms").record(ms);
        counter!("relay_source_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl NewsSource for LodestoneProvider {
    async fn fetch_category(&self, category: Category, _since: Option<&str>) -> Result<Vec<NewsItem>> {
        match &self.mode {
            Mode::Fixture(map) => match map.get(&category) {
                Some(s) => Self::parse_listing(category, s, self.page_size),
                None => Ok(Vec::new()),
            },
            Mode::Http { base_url, client } => {
                let url = format!("{base_url}/news/{}", category.feed_path());
                let body = client
                    .get(&url)
                    .query(&[("limit", self.page_size)])
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?
                    .error_for_status()
                    .with_context(|| format!("GET {url} non-2xx"))?
                    .text()
                    .await
                    .context("reading listing body")?;
                Self::parse_listing(category, &body, self.page_size)
            }
        }
    }

    fn name(&self) -> &'static str {
        "lodestone"
    }
}
