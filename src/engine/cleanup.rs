//! Periodic housekeeping after scan cycles.
//!
//! Steps run in a fixed order: drop started events, enforce the event cache
//! bound, enforce the alert cache bound, prune finalized CLV records and
//! release spare capacity. `ScanEngine::compact` runs them immediately and
//! is safe to call any number of times.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use tracing::info;

use super::ScanEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub events_started: usize,
    pub events_evicted: usize,
    pub alerts_evicted: usize,
    pub clv_pruned: usize,
}

/// Tracks when cleanup last ran. The first check is always due.
pub struct CleanupScheduler {
    interval: Duration,
    grace: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl CleanupScheduler {
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self {
            interval,
            grace: grace.max(Duration::zero()),
            last_run: Mutex::new(None),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run.lock().ok().and_then(|g| *g)
    }

    /// Claim the slot if cleanup is due at `now`.
    pub fn try_claim(&self, now: DateTime<Utc>) -> bool {
        let mut last = match self.last_run.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(at) if now - at < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl ScanEngine {
    /// Run cleanup if the interval has elapsed since the last run.
    pub fn maybe_cleanup(&self, now: DateTime<Utc>) -> Option<CleanupReport> {
        if self.cleanup.try_claim(now) {
            Some(self.compact(now))
        } else {
            None
        }
    }

    /// Run every cleanup step now.
    pub fn compact(&self, now: DateTime<Utc>) -> CleanupReport {
        let report = CleanupReport {
            events_started: self.events.drop_started(now, self.cleanup.grace()),
            events_evicted: self.events.compact(),
            alerts_evicted: self.alerts.compact(),
            clv_pruned: self.clv.prune(now),
        };
        info!(
            events_started = report.events_started,
            events_evicted = report.events_evicted,
            alerts_evicted = report.alerts_evicted,
            clv_pruned = report.clv_pruned,
            events = self.events.len(),
            alerts = self.alerts.len(),
            "Cleanup complete"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
