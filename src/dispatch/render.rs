//! Destination-agnostic rendering of signals.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::news::{Category, DescriptionBlock, NewsItem, ScheduleSnapshot};
use crate::tracker::{Signal, SignalKind};

/// Summary text longer than this is cut and followed by a read-more link.
pub const SUMMARY_MAX_CHARS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accent {
    Topic,
    Notice,
    Maintenance,
    Update,
    Status,
}

impl Accent {
    pub fn for_category(c: Category) -> Self {
        match c {
            Category::Topic => Accent::Topic,
            Category::Notice => Accent::Notice,
            Category::Maintenance => Accent::Maintenance,
            Category::Update => Accent::Update,
            Category::Status => Accent::Status,
        }
    }

    /// RGB colour used by senders that support it.
    pub fn color(self) -> u32 {
        match self {
            Accent::Topic => 0xC8_A2_4B,
            Accent::Notice => 0x7F_8C_8D,
            Accent::Maintenance => 0xE6_7E_22,
            Accent::Update => 0x34_98_DB,
            Accent::Status => 0xE7_4C_3C,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Accent::Topic => "📰",
            Accent::Notice => "📢",
            Accent::Maintenance => "🛠️",
            Accent::Update => "🔄",
            Accent::Status => "⚠️",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPayload {
    pub kind: SignalKind,
    pub category: Category,
    /// Short line above the title, e.g. "New maintenance" or "Starting soon".
    pub headline: String,
    pub title: String,
    pub url: String,
    pub accent: Accent,
    pub body: Vec<DescriptionBlock>,
    pub fields: Vec<Field>,
    pub banner_url: Option<String>,
    pub gallery: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RenderedPayload {
    /// Body flattened to markdown, blocks separated by blank lines.
    pub fn body_markdown(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.body.len());
        for b in &self.body {
            match b {
                DescriptionBlock::Text { markdown } => parts.push(markdown.clone()),
                DescriptionBlock::Separator => parts.push("───".to_string()),
                // galleries are carried in `gallery`
                DescriptionBlock::MediaGallery { .. } => {}
            }
        }
        parts.join("\n\n")
    }
}

pub fn fmt_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Cut `text` to `max` chars; when cut, add an ellipsis and a link to `url`.
pub fn truncate_with_link(text: &str, max: usize, url: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…\n\n[Continue reading]({url})", cut.trim_end())
}

fn headline(kind: SignalKind, item: &NewsItem) -> String {
    let what = match item.category {
        Category::Topic => "topic",
        Category::Notice => "notice",
        Category::Maintenance => "maintenance",
        Category::Update => "update",
        Category::Status => "status report",
    };
    match kind {
        SignalKind::NewItem => format!("New {what}"),
        SignalKind::WindowChanged if item.window.is_some() => "Maintenance schedule updated".into(),
        SignalKind::WindowChanged => "Event schedule updated".into(),
        SignalKind::ReminderDue => "Starting soon".into(),
        SignalKind::BroadcastDue => "Live broadcast starting".into(),
    }
}

fn range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<String> {
    match (start, end) {
        (Some(s), Some(e)) => Some(format!("{} → {}", fmt_time(s), fmt_time(e))),
        (Some(s), None) => Some(format!("from {}", fmt_time(s))),
        (None, Some(e)) => Some(format!("until {}", fmt_time(e))),
        (None, None) => None,
    }
}

fn schedule_fields(item: &NewsItem, previous: Option<&ScheduleSnapshot>) -> Vec<Field> {
    let mut fields = Vec::new();
    if let Some(w) = item.window {
        if let Some(prev) = previous.and_then(|p| p.window).filter(|p| *p != w) {
            fields.push(Field {
                name: "Previously".into(),
                value: format!("{} → {}", fmt_time(prev.start), fmt_time(prev.end)),
            });
        }
        fields.push(Field {
            name: "Maintenance window".into(),
            value: format!("{} → {}", fmt_time(w.start), fmt_time(w.end)),
        });
    }
    if let Some(ev) = &item.event {
        if let Some(prev) = previous.and_then(|p| p.event) {
            let before = range(
                prev.start_override.or(prev.nominal_start),
                prev.end_override.or(prev.nominal_end),
            );
            let now = range(ev.effective_start(), ev.effective_end());
            if before != now {
                if let Some(b) = before {
                    fields.push(Field {
                        name: "Previously".into(),
                        value: b,
                    });
                }
            }
        }
        if let Some(r) = range(ev.effective_start(), ev.effective_end()) {
            fields.push(Field {
                name: "Event".into(),
                value: r,
            });
        }
        if let Some(at) = ev.live_broadcast_at {
            fields.push(Field {
                name: "Live broadcast".into(),
                value: fmt_time(at),
            });
        }
    }
    fields
}

pub fn render(signal: &Signal) -> RenderedPayload {
    let kind = signal.kind();
    let item = signal.item();
    let previous = match signal {
        Signal::WindowChanged { previous, .. } => Some(previous),
        _ => None,
    };

    let (body, gallery) = match &item.description_blocks {
        Some(blocks) => {
            let gallery = blocks
                .iter()
                .filter_map(|b| match b {
                    DescriptionBlock::MediaGallery { urls } => Some(urls.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            (blocks.clone(), gallery)
        }
        None if item.summary.is_empty() => (Vec::new(), Vec::new()),
        None => (
            vec![DescriptionBlock::Text {
                markdown: truncate_with_link(&item.summary, SUMMARY_MAX_CHARS, &item.source_key),
            }],
            Vec::new(),
        ),
    };

    let title = match &item.tag {
        Some(tag) => format!("[{tag}] {}", item.title),
        None => item.title.clone(),
    };

    RenderedPayload {
        kind,
        category: item.category,
        headline: headline(kind, item),
        title,
        url: item.source_key.clone(),
        accent: Accent::for_category(item.category),
        // reminders and broadcasts are short pings, not a repost
        body: match kind {
            SignalKind::NewItem => body,
            _ => Vec::new(),
        },
        fields: schedule_fields(item, previous),
        banner_url: item.banner_url.clone(),
        gallery: match kind {
            SignalKind::NewItem => gallery,
            _ => Vec::new(),
        },
        timestamp: item.published_at,
    }
}
