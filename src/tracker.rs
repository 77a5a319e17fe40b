//! # Event/Window State Tracker
//! Turns an ingestion outcome plus the current store contents into the
//! ordered list of signals for one tick.
//!
//! Reminder and broadcast flags are checked and flipped inside the store's
//! update section, so evaluating the same item twice never fires twice.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingest::types::IngestOutcome;
use crate::news::{EventSchedule, NewsItem, ScheduleSnapshot};
use crate::store::CategoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    NewItem,
    WindowChanged,
    ReminderDue,
    BroadcastDue,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::NewItem => "new_item",
            SignalKind::WindowChanged => "window_changed",
            SignalKind::ReminderDue => "reminder_due",
            SignalKind::BroadcastDue => "broadcast_due",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Signal {
    NewItem(NewsItem),
    WindowChanged {
        item: NewsItem,
        previous: ScheduleSnapshot,
    },
    ReminderDue(NewsItem),
    BroadcastDue(NewsItem),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::NewItem(_) => SignalKind::NewItem,
            Signal::WindowChanged { .. } => SignalKind::WindowChanged,
            Signal::ReminderDue(_) => SignalKind::ReminderDue,
            Signal::BroadcastDue(_) => SignalKind::BroadcastDue,
        }
    }

    pub fn item(&self) -> &NewsItem {
        match self {
            Signal::NewItem(i)
            | Signal::ReminderDue(i)
            | Signal::BroadcastDue(i)
            | Signal::WindowChanged { item: i, .. } => i,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Fired,
    Suppressed,
}

/// Reminder rule. Fires once `now` reaches the effective start minus
/// `lead`; an event that is already over is suppressed instead.
pub fn reminder_transition(ev: &mut EventSchedule, now: DateTime<Utc>, lead: Duration) -> Option<Transition> {
    if !ev.reminder.is_pending() {
        return None;
    }
    let due = ev.reminder_due_at(lead)?;
    if ev.effective_end().is_some_and(|end| now > end) {
        ev.reminder.suppress();
        return Some(Transition::Suppressed);
    }
    if now >= due {
        ev.reminder.fire();
        return Some(Transition::Fired);
    }
    None
}

/// Live-broadcast rule. Fires once `now` reaches `live_broadcast_at`;
/// later than `grace` past it, the announcement is stale and suppressed.
pub fn broadcast_transition(ev: &mut EventSchedule, now: DateTime<Utc>, grace: Duration) -> Option<Transition> {
    if !ev.live_broadcast.is_pending() {
        return None;
    }
    let at = ev.live_broadcast_at?;
    // a deadline past the representable range never goes stale
    if at.checked_add_signed(grace).is_some_and(|deadline| now > deadline) {
        ev.live_broadcast.suppress();
        return Some(Transition::Suppressed);
    }
    if now >= at {
        ev.live_broadcast.fire();
        return Some(Transition::Fired);
    }
    None
}

#[derive(Debug, Clone, Copy)]
pub struct StateTracker {
    reminder_lead: Duration,
    broadcast_grace: Duration,
}

impl StateTracker {
    pub fn new(reminder_lead: Duration, broadcast_grace: Duration) -> Self {
        Self {
            reminder_lead,
            broadcast_grace,
        }
    }

    pub fn reminder_lead(&self) -> Duration {
        self.reminder_lead
    }

    /// Signals for one category tick in dispatch order: new items (oldest
    /// fetched first), window changes, reminders, broadcasts.
    ///
    /// Items evicted since ingestion produce nothing.
    pub async fn evaluate(&self, store: &CategoryStore, outcome: &IngestOutcome, now: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();

        if !outcome.seeded {
            for it in &outcome.accepted {
                if let Ok(current) = store.get(&it.source_key).await {
                    signals.push(Signal::NewItem(current));
                }
            }
        }

        for ch in &outcome.changed {
            if let Ok(current) = store.get(&ch.item.source_key).await {
                signals.push(Signal::WindowChanged {
                    item: current,
                    previous: ch.previous,
                });
            }
        }

        let mut reminders = Vec::new();
        let mut broadcasts = Vec::new();
        // oldest first, matching the order new items are announced in
        let snapshot = store.list_newest_first().await;
        for it in snapshot.iter().rev().filter(|i| i.event.is_some()) {
            let lead = self.reminder_lead;
            let grace = self.broadcast_grace;
            let res = store
                .update(&it.source_key, |item| match item.event.as_mut() {
                    Some(ev) => (
                        reminder_transition(ev, now, lead),
                        broadcast_transition(ev, now, grace),
                    ),
                    None => (None, None),
                })
                .await;

            match res {
                Ok(((reminder, broadcast), updated)) => {
                    log_transition("reminder", &updated, reminder);
                    log_transition("broadcast", &updated, broadcast);
                    if reminder == Some(Transition::Fired) {
                        reminders.push(Signal::ReminderDue(updated.clone()));
                    }
                    if broadcast == Some(Transition::Fired) {
                        broadcasts.push(Signal::BroadcastDue(updated));
                    }
                }
                // evicted between the snapshot and the update
                Err(e) => tracing::debug!(error = %e, "skipping event evaluation"),
            }
        }

        signals.extend(reminders);
        signals.extend(broadcasts);
        signals
    }
}

fn log_transition(rule: &'static str, item: &NewsItem, t: Option<Transition>) {
    match t {
        Some(Transition::Fired) => tracing::info!(
            category = %item.category,
            source_key = %item.source_key,
            rule,
            "scheduled signal fired"
        ),
        Some(Transition::Suppressed) => tracing::debug!(
            category = %item.category,
            source_key = %item.source_key,
            rule,
            "stale scheduled signal suppressed"
        ),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::FlagState;
    use chrono::TimeZone;

    fn ev(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> EventSchedule {
        EventSchedule {
            nominal_start: Some(start),
            nominal_end: end,
            start_override: None,
            end_override: None,
            live_broadcast_at: None,
            live_broadcast: FlagState::Pending,
            reminder: FlagState::Pending,
        }
    }

    #[test]
    fn reminder_waits_for_lead() {
        let t = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let lead = Duration::hours(1);
        let mut e = ev(t, None);
        assert_eq!(reminder_transition(&mut e, t - Duration::minutes(61), lead), None);
        assert_eq!(
            reminder_transition(&mut e, t - Duration::minutes(60), lead),
            Some(Transition::Fired)
        );
        assert_eq!(reminder_transition(&mut e, t, lead), None);
        assert_eq!(e.reminder, FlagState::Fired);
    }

    #[test]
    fn reminder_for_finished_event_is_suppressed() {
        let t = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let mut e = ev(t, Some(t + Duration::hours(2)));
        let out = reminder_transition(&mut e, t + Duration::hours(3), Duration::hours(1));
        assert_eq!(out, Some(Transition::Suppressed));
        assert_eq!(e.reminder, FlagState::Suppressed);
    }

    #[test]
    fn override_moves_the_reminder() {
        let t = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let mut e = ev(t, None);
        e.start_override = Some(t + Duration::days(1));
        assert_eq!(reminder_transition(&mut e, t, Duration::hours(1)), None);
    }

    #[test]
    fn out_of_range_offsets_do_not_panic() {
        let t = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let huge = Duration::days(100_000_000);
        let mut e = ev(t, None);
        e.live_broadcast_at = Some(t);

        assert_eq!(e.reminder_due_at(huge), None);
        assert_eq!(reminder_transition(&mut e, t, huge), None);
        assert_eq!(e.reminder, FlagState::Pending);
        assert_eq!(broadcast_transition(&mut e, t, huge), Some(Transition::Fired));
    }

    #[test]
    fn broadcast_grace_window() {
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 20, 0, 0).unwrap();
        let mut e = ev(at, None);
        e.live_broadcast_at = Some(at);
        let grace = Duration::hours(2);
        assert_eq!(broadcast_transition(&mut e, at - Duration::seconds(1), grace), None);
        assert_eq!(
            broadcast_transition(&mut e, at + Duration::minutes(5), grace),
            Some(Transition::Fired)
        );

        let mut stale = ev(at, None);
        stale.live_broadcast_at = Some(at);
        assert_eq!(
            broadcast_transition(&mut stale, at + Duration::hours(3), grace),
            Some(Transition::Suppressed)
        );
    }
}
