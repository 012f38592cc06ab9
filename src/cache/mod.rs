//! Bounded concurrent maps with pluggable eviction.
//!
//! `BoundedMap` wraps a `DashMap` so that mutations of one key are
//! serialized by its shard lock while distinct keys proceed independently.
//! When an insert pushes the map past its capacity, the configured
//! `EvictionPolicy` chooses what to drop. `compact()` runs the same
//! eviction on demand and is idempotent.
//!
//! Two policies are provided:
//! - [`EarliestStartFirst`] drops entries whose scheduled start is earliest.
//! - [`ApproximateOldest`] drops whole insertion generations, oldest first,
//!   until at least a fraction of capacity has been freed. Recency is only
//!   tracked per generation, so the trim is cheap but not exact LRU.

pub mod alerts;
pub mod events;

pub use alerts::AlertCache;
pub use events::EventCache;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::types::CapacityError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_monitored_events: usize,
    pub max_sent_alerts: usize,
    /// Share of the alert cache freed by one trim.
    pub alert_trim_fraction: f64,
    /// Started events are kept this long before cleanup drops them.
    pub event_grace_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_monitored_events: 500,
            max_sent_alerts: 1000,
            alert_trim_fraction: 0.20,
            event_grace_minutes: 0,
        }
    }
}

/// A stored value plus the insertion sequence number the map assigned it.
#[derive(Debug, Clone)]
pub struct Slot<V> {
    pub value: V,
    pub seq: u64,
}

/// Decides which entries to drop once a map is over capacity.
pub trait EvictionPolicy<K, V>: Send + Sync {
    /// Remove entries from `entries` so its length is at most `capacity`.
    /// Returns the number of entries removed.
    fn evict(&self, entries: &DashMap<K, Slot<V>>, capacity: usize) -> usize;
}

/// Values that carry a scheduled start time.
pub trait Scheduled {
    fn starts_at(&self) -> DateTime<Utc>;
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Evicts the entries with the earliest scheduled start. Ties go to the
/// entry inserted first.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarliestStartFirst;

impl<K, V> EvictionPolicy<K, V> for EarliestStartFirst
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Scheduled + Send + Sync,
{
    fn evict(&self, entries: &DashMap<K, Slot<V>>, capacity: usize) -> usize {
        let excess = entries.len().saturating_sub(capacity);
        if excess == 0 {
            return 0;
        }

        let mut ranked: Vec<(DateTime<Utc>, u64, K)> = entries
            .iter()
            .map(|e| (e.value().value.starts_at(), e.value().seq, e.key().clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        ranked
            .into_iter()
            .take(excess)
            .filter(|(_, _, key)| entries.remove(key).is_some())
            .count()
    }
}

/// Generation-bucketed trim. Entries are grouped by insertion sequence
/// into buckets of `ceil(capacity × fraction)`; on overflow the oldest
/// buckets are dropped until at least `max(excess, ceil(capacity × fraction))`
/// entries are gone. One pass per trim, and a trim frees a fixed fraction
/// of capacity, so the cost per insert is amortized O(1).
#[derive(Debug, Clone, Copy)]
pub struct ApproximateOldest {
    fraction: f64,
}

impl ApproximateOldest {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.01, 1.0),
        }
    }

    fn trim_target(&self, capacity: usize) -> usize {
        ((capacity as f64) * self.fraction).ceil().max(1.0) as usize
    }
}

impl Default for ApproximateOldest {
    fn default() -> Self {
        Self::new(0.20)
    }
}

impl<K, V> EvictionPolicy<K, V> for ApproximateOldest
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn evict(&self, entries: &DashMap<K, Slot<V>>, capacity: usize) -> usize {
        let len = entries.len();
        if len <= capacity {
            return 0;
        }

        let bucket = self.trim_target(capacity) as u64;
        let target = (len - capacity).max(self.trim_target(capacity));

        let mut generations: BTreeMap<u64, usize> = BTreeMap::new();
        for e in entries.iter() {
            *generations.entry(e.value().seq / bucket).or_default() += 1;
        }

        let mut freed = 0;
        let mut cutoff = 0;
        for (generation, count) in generations {
            cutoff = generation + 1;
            freed += count;
            if freed >= target {
                break;
            }
        }

        let mut removed = 0;
        entries.retain(|_, slot| {
            let keep = slot.seq / bucket >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

// ---------------------------------------------------------------------------
// BoundedMap
// ---------------------------------------------------------------------------

/// Concurrent map with a hard capacity enforced by an eviction policy.
pub struct BoundedMap<K, V, P> {
    name: &'static str,
    entries: DashMap<K, Slot<V>>,
    capacity: usize,
    policy: P,
    next_seq: AtomicU64,
}

impl<K, V, P> BoundedMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    P: EvictionPolicy<K, V>,
{
    pub fn new(name: &'static str, capacity: usize, policy: P) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity: capacity.max(1),
            policy,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|e| e.value().value.clone())
    }

    /// Insert `value` unless `key` is already present. Returns true when
    /// the value was inserted.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let inserted = match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Slot {
                    value,
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                true
            }
        };
        if inserted {
            self.enforce_capacity();
        }
        inserted
    }

    /// Update the entry for `key` in place, or insert the value built by
    /// `init` and then apply `update` to it. Returns true on insert.
    pub fn upsert_with<I, U>(&self, key: K, init: I, update: U) -> bool
    where
        I: FnOnce() -> V,
        U: FnOnce(&mut V),
    {
        let inserted = match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                update(&mut slot.get_mut().value);
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut value = init();
                update(&mut value);
                slot.insert(Slot {
                    value,
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                true
            }
        };
        if inserted {
            self.enforce_capacity();
        }
        inserted
    }

    /// Apply `f` to the entry for `key`. Returns false when absent.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.get_mut(key) {
            Some(mut e) => {
                f(&mut e.value_mut().value);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Keep only entries matching `keep`. Returns the number removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|k, slot| keep(k, &slot.value));
        before.saturating_sub(self.entries.len())
    }

    /// Snapshot of all values.
    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|e| e.value().value.clone()).collect()
    }

    /// Run the eviction policy if over capacity, then release spare
    /// allocation. Safe to call at any time; a map within capacity is
    /// left untouched. Returns the number of entries evicted.
    pub fn compact(&self) -> usize {
        let evicted = self.enforce_capacity();
        self.entries.shrink_to_fit();
        evicted
    }

    fn enforce_capacity(&self) -> usize {
        let len = self.entries.len();
        if len <= self.capacity {
            return 0;
        }
        let overflow = CapacityError {
            cache: self.name,
            len,
            capacity: self.capacity,
        };
        let evicted = self.policy.evict(&self.entries, self.capacity);
        debug!(%overflow, evicted, remaining = self.entries.len(), "Evicted cache entries");
        evicted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone)]
    struct Ev {
        start: DateTime<Utc>,
    }

    impl Scheduled for Ev {
        fn starts_at(&self) -> DateTime<Utc> {
            self.start
        }
    }

    fn ev(minutes: i64, base: DateTime<Utc>) -> Ev {
        Ev {
            start: base + Duration::minutes(minutes),
        }
    }

    // -- EarliestStartFirst --

    #[test]
    fn test_earliest_start_evicted_first() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 3, EarliestStartFirst);
        map.insert_if_absent("A", ev(10, base));
        map.insert_if_absent("B", ev(5, base));
        map.insert_if_absent("C", ev(1, base));
        map.insert_if_absent("D", ev(20, base));

        assert_eq!(map.len(), 3);
        assert!(!map.contains_key(&"C"));
        assert!(map.contains_key(&"A"));
        assert!(map.contains_key(&"B"));
        assert!(map.contains_key(&"D"));
    }

    #[test]
    fn test_earliest_start_tie_goes_to_first_inserted() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 2, EarliestStartFirst);
        map.insert_if_absent(1, ev(5, base));
        map.insert_if_absent(2, ev(5, base));
        map.insert_if_absent(3, ev(60, base));
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2));
    }

    #[test]
    fn test_new_entry_can_itself_be_evicted() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 2, EarliestStartFirst);
        map.insert_if_absent("late1", ev(30, base));
        map.insert_if_absent("late2", ev(40, base));
        map.insert_if_absent("early", ev(1, base));
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&"early"));
    }

    // -- ApproximateOldest --

    #[test]
    fn test_approximate_trim_frees_a_fifth() {
        let map = BoundedMap::new("alerts", 10, ApproximateOldest::new(0.2));
        for i in 0..10 {
            assert!(map.insert_if_absent(i, ()));
        }
        assert_eq!(map.len(), 10);

        map.insert_if_absent(10, ());
        // Oldest generation (seq 0-1) dropped; the newest survives.
        assert_eq!(map.len(), 9);
        assert!(!map.contains_key(&0));
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&10));
    }

    #[test]
    fn test_approximate_trim_is_bounded_under_churn() {
        let map = BoundedMap::new("alerts", 100, ApproximateOldest::default());
        for i in 0..10_000u32 {
            map.insert_if_absent(i, ());
            assert!(map.len() <= 100);
        }
        assert!(map.contains_key(&9_999));
        assert!(map.len() >= 80);
    }

    #[test]
    fn test_approximate_trim_keeps_newer_generations() {
        let map = BoundedMap::new("alerts", 5, ApproximateOldest::new(0.2));
        for i in 0..6 {
            map.insert_if_absent(i, ());
        }
        for i in 1..6 {
            assert!(map.contains_key(&i), "key {i} should survive");
        }
    }

    #[test]
    fn test_concurrent_inserts_and_trims() {
        let map = std::sync::Arc::new(BoundedMap::new("alerts", 50, ApproximateOldest::default()));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let map = std::sync::Arc::clone(&map);
                std::thread::spawn(move || {
                    for i in 0..2_000u32 {
                        map.insert_if_absent(t * 10_000 + i, ());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        map.compact();
        assert!(map.len() <= 50);
    }

    // -- BoundedMap --

    #[test]
    fn test_insert_if_absent_is_membership_check() {
        let map = BoundedMap::new("alerts", 10, ApproximateOldest::default());
        assert!(map.insert_if_absent("fp", 1));
        assert!(!map.insert_if_absent("fp", 2));
        assert_eq!(map.get(&"fp"), Some(1));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 10, EarliestStartFirst);
        let first = map.upsert_with("ev", || ev(5, base), |_| {});
        let second = map.upsert_with("ev", || ev(99, base), |e| e.start = base);
        assert!(first);
        assert!(!second);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"ev").unwrap().start, base);
    }

    #[test]
    fn test_update_and_remove() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 10, EarliestStartFirst);
        assert!(!map.update(&"x", |_| {}));
        map.insert_if_absent("x", ev(1, base));
        assert!(map.update(&"x", |e| e.start = base));
        assert!(map.remove(&"x").is_some());
        assert!(map.is_empty());
    }

    #[test]
    fn test_retain_counts_removed() {
        let map = BoundedMap::new("alerts", 10, ApproximateOldest::default());
        for i in 0..6 {
            map.insert_if_absent(i, i);
        }
        assert_eq!(map.retain(|_, v| v % 2 == 0), 3);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_compact_is_idempotent() {
        let base = Utc::now();
        let map = BoundedMap::new("events", 3, EarliestStartFirst);
        for i in 0..3 {
            map.insert_if_absent(i, ev(i, base));
        }
        assert_eq!(map.compact(), 0);
        assert_eq!(map.compact(), 0);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let map = BoundedMap::new("alerts", 0, ApproximateOldest::default());
        assert_eq!(map.capacity(), 1);
        map.insert_if_absent(1, ());
        map.insert_if_absent(2, ());
        assert!(map.len() <= 1);
    }
}
