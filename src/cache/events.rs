//! Bounded cache of in-flight events seen across scan cycles.

use chrono::{DateTime, Duration, Utc};

use super::{BoundedMap, EarliestStartFirst, Scheduled};
use crate::types::{CandidatePick, MarketQuote, MonitoredEvent};

impl Scheduled for MonitoredEvent {
    fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }
}

/// Event id → `MonitoredEvent`, evicting earliest-start entries on overflow.
pub struct EventCache {
    inner: BoundedMap<String, MonitoredEvent, EarliestStartFirst>,
}

impl EventCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedMap::new("monitored_events", capacity, EarliestStartFirst),
        }
    }

    /// Upsert the event behind `pick` and mark its fingerprint as alerted.
    /// Repeating the call with the same pick leaves the cache unchanged
    /// apart from `last_seen`.
    pub fn record_pick(&self, pick: &CandidatePick, now: DateTime<Utc>) {
        let fingerprint = pick.fingerprint();
        self.inner.upsert_with(
            pick.event_id.clone(),
            || MonitoredEvent::from_pick(pick, now),
            |event| {
                event.last_seen = now;
                event.starts_at = pick.event_start;
                event.alerted.insert(fingerprint);
            },
        );
    }

    /// Upsert the event a quote belongs to. Kick-off time follows the
    /// provider, so a rescheduled event moves in the eviction order.
    pub fn observe(&self, quote: &MarketQuote, now: DateTime<Utc>) {
        self.inner.upsert_with(
            quote.event_id.clone(),
            || MonitoredEvent::from_quote(quote, now),
            |event| {
                event.last_seen = now;
                event.starts_at = quote.event_start;
            },
        );
    }

    /// Refresh `last_seen` for an event already being tracked.
    pub fn touch(&self, event_id: &str, now: DateTime<Utc>) -> bool {
        self.inner
            .update(&event_id.to_string(), |event| event.last_seen = now)
    }

    pub fn get(&self, event_id: &str) -> Option<MonitoredEvent> {
        self.inner.get(&event_id.to_string())
    }

    /// Drop events whose start lies more than `grace` in the past.
    pub fn drop_started(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let cutoff = now - grace;
        self.inner.retain(|_, event| event.starts_at > cutoff)
    }

    pub fn compact(&self) -> usize {
        self.inner.compact()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
