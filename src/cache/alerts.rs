//! Alert dedup cache.
//!
//! Membership means "already handed to the notifier". While a fingerprint
//! stays cached it is never re-notified; once trimmed, the same pick may be
//! delivered again.

use chrono::{DateTime, Utc};

use super::{ApproximateOldest, BoundedMap};
use crate::types::AlertFingerprint;

pub struct AlertCache {
    inner: BoundedMap<AlertFingerprint, DateTime<Utc>, ApproximateOldest>,
}

impl AlertCache {
    pub fn new(capacity: usize, trim_fraction: f64) -> Self {
        Self {
            inner: BoundedMap::new("sent_alerts", capacity, ApproximateOldest::new(trim_fraction)),
        }
    }

    /// Record `fingerprint` as sent. Returns true if it was not already
    /// present, i.e. the caller should dispatch the alert.
    pub fn mark_sent(&self, fingerprint: AlertFingerprint, at: DateTime<Utc>) -> bool {
        self.inner.insert_if_absent(fingerprint, at)
    }

    pub fn contains(&self, fingerprint: &AlertFingerprint) -> bool {
        self.inner.contains_key(fingerprint)
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
