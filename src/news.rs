//! # News model
//! One `NewsItem` per announcement, keyed by `source_key` within its
//! `Category`. Maintenance posts carry a `MaintenanceWindow`; event and
//! broadcast posts carry an `EventSchedule` whose reminder/broadcast flags
//! only ever move forward.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Topic,
    Notice,
    Maintenance,
    Update,
    Status,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Topic,
        Category::Notice,
        Category::Maintenance,
        Category::Update,
        Category::Status,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Topic => "topic",
            Category::Notice => "notice",
            Category::Maintenance => "maintenance",
            Category::Update => "update",
            Category::Status => "status",
        }
    }

    /// Position in `Category::ALL`.
    pub fn index(self) -> usize {
        match self {
            Category::Topic => 0,
            Category::Notice => 1,
            Category::Maintenance => 2,
            Category::Update => 3,
            Category::Status => 4,
        }
    }

    /// Path segment used by the news API (`/news/topics`, `/news/status`, ...).
    pub fn feed_path(self) -> &'static str {
        match self {
            Category::Topic => "topics",
            Category::Notice => "notices",
            Category::Maintenance => "maintenance",
            Category::Update => "updates",
            Category::Status => "status",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topic" | "topics" => Ok(Category::Topic),
            "notice" | "notices" => Ok(Category::Notice),
            "maintenance" => Ok(Category::Maintenance),
            "update" | "updates" => Ok(Category::Update),
            "status" => Ok(Category::Status),
            other => anyhow::bail!("unknown news category: {other}"),
        }
    }
}

/// Structured body block, used instead of `summary` when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DescriptionBlock {
    Text { markdown: String },
    Separator,
    MediaGallery { urls: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One-shot side effect state. `Fired` and `Suppressed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagState {
    #[default]
    Pending,
    Fired,
    Suppressed,
}

impl FlagState {
    pub fn is_pending(self) -> bool {
        matches!(self, FlagState::Pending)
    }

    /// Pending -> Fired. Returns true only on the actual transition.
    pub fn fire(&mut self) -> bool {
        if self.is_pending() {
            *self = FlagState::Fired;
            true
        } else {
            false
        }
    }

    /// Pending -> Suppressed. Returns true only on the actual transition.
    pub fn suppress(&mut self) -> bool {
        if self.is_pending() {
            *self = FlagState::Suppressed;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    pub nominal_start: Option<DateTime<Utc>>,
    pub nominal_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_override: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_override: Option<DateTime<Utc>>,
    #[serde(default)]
    pub live_broadcast_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub live_broadcast: FlagState,
    #[serde(default)]
    pub reminder: FlagState,
}

impl EventSchedule {
    pub fn effective_start(&self) -> Option<DateTime<Utc>> {
        self.start_override.or(self.nominal_start)
    }

    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        self.end_override.or(self.nominal_end)
    }

    /// Moment at which the reminder becomes due; `None` without a start
    /// or when `lead` reaches past the representable range.
    pub fn reminder_due_at(&self, lead: Duration) -> Option<DateTime<Utc>> {
        self.effective_start()?.checked_sub_signed(lead)
    }

    /// The source-controlled part of the schedule, without local flag state.
    pub fn times(&self) -> ScheduleTimes {
        ScheduleTimes {
            nominal_start: self.nominal_start,
            nominal_end: self.nominal_end,
            start_override: self.start_override,
            end_override: self.end_override,
            live_broadcast_at: self.live_broadcast_at,
        }
    }

    /// Overwrite the source-controlled times and keep the flags.
    pub fn apply_times(&mut self, t: ScheduleTimes) {
        self.nominal_start = t.nominal_start;
        self.nominal_end = t.nominal_end;
        self.start_override = t.start_override;
        self.end_override = t.end_override;
        self.live_broadcast_at = t.live_broadcast_at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleTimes {
    pub nominal_start: Option<DateTime<Utc>>,
    pub nominal_end: Option<DateTime<Utc>>,
    pub start_override: Option<DateTime<Utc>>,
    pub end_override: Option<DateTime<Utc>>,
    pub live_broadcast_at: Option<DateTime<Utc>>,
}

/// Everything on an item that the source may correct after first publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub window: Option<MaintenanceWindow>,
    pub event: Option<ScheduleTimes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub category: Category,
    pub source_key: String, // canonical announcement URL
    pub title: String,
    #[serde(default)]
    pub tag: Option<String>, // e.g. "Emergency", "Recovery"
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description_blocks: Option<Vec<DescriptionBlock>>,
    #[serde(default)]
    pub banner_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub window: Option<MaintenanceWindow>,
    #[serde(default)]
    pub event: Option<EventSchedule>,
}

impl NewsItem {
    /// Minimal item; the remaining fields are filled through the pub fields.
    pub fn new(
        category: Category,
        source_key: impl Into<String>,
        title: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            category,
            source_key: source_key.into(),
            title: title.into(),
            tag: None,
            published_at,
            summary: String::new(),
            description_blocks: None,
            banner_url: None,
            created_at: now,
            updated_at: now,
            window: None,
            event: None,
        }
    }

    pub fn schedule(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            window: self.window,
            event: self.event.as_ref().map(EventSchedule::times),
        }
    }

    /// True when the item carries state the tracker cares about.
    pub fn is_scheduled(&self) -> bool {
        self.window.is_some() || self.event.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn flag_transitions_are_one_way() {
        let mut f = FlagState::default();
        assert!(f.fire());
        assert!(!f.fire());
        assert!(!f.suppress());
        assert_eq!(f, FlagState::Fired);

        let mut g = FlagState::Pending;
        assert!(g.suppress());
        assert!(!g.fire());
        assert_eq!(g, FlagState::Suppressed);
    }

    #[test]
    fn override_takes_precedence_over_nominal() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut ev = EventSchedule {
            nominal_start: Some(t0),
            nominal_end: None,
            start_override: None,
            end_override: None,
            live_broadcast_at: None,
            live_broadcast: FlagState::Pending,
            reminder: FlagState::Pending,
        };
        assert_eq!(ev.effective_start(), Some(t0));
        ev.start_override = Some(t1);
        assert_eq!(ev.effective_start(), Some(t1));
        assert_eq!(
            ev.reminder_due_at(Duration::minutes(30)),
            Some(t1 - Duration::minutes(30))
        );
    }

    #[test]
    fn category_parses_feed_names() {
        assert_eq!("Topics".parse::<Category>().unwrap(), Category::Topic);
        assert_eq!("status".parse::<Category>().unwrap(), Category::Status);
        assert!("events".parse::<Category>().is_err());
    }
}
