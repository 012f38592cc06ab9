//! Closing line value tracking.
//!
//! A record is opened the first time an (event, selection) pair is alerted
//! and closed once by the closing pass shortly before kick-off. Events
//! that start before a closing price is captured stay opening-only and are
//! reported as missed.

pub mod stats;

pub use stats::{ClvStats, SharpVerdict};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::types::{odds_in_bounds, CandidatePick, DataError, MarketType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClvConfig {
    /// How long before the start closing prices are captured.
    pub closing_lead_minutes: i64,
    pub closing_pass_interval_secs: u64,
    /// Finalized records are dropped this long after event start.
    pub retention_hours: i64,
}

impl Default for ClvConfig {
    fn default() -> Self {
        Self {
            closing_lead_minutes: 5,
            closing_pass_interval_secs: 60,
            retention_hours: 48,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// `(closing − opening) / opening`
pub fn closing_line_value(opening_odds: f64, closing_odds: f64) -> f64 {
    (closing_odds - opening_odds) / opening_odds
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClvStatus {
    Pending,
    Closed(f64),
    /// Event started without a closing price.
    Missed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClvError {
    #[error("no CLV record for {event_id}/{selection}")]
    NotTracked { event_id: String, selection: String },

    #[error("CLV record for {event_id}/{selection} already closed")]
    AlreadyClosed { event_id: String, selection: String },

    #[error(transparent)]
    InvalidOdds(#[from] DataError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClvRecord {
    pub event_id: String,
    pub selection: String,
    pub sport: String,
    pub market: MarketType,
    pub point: Option<f64>,
    pub event_start: DateTime<Utc>,
    pub opening_odds: f64,
    pub opened_at: DateTime<Utc>,
    pub closing_odds: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub clv: Option<f64>,
}

impl ClvRecord {
    pub fn open(pick: &CandidatePick, at: DateTime<Utc>) -> Self {
        Self {
            event_id: pick.event_id.clone(),
            selection: pick.selection.clone(),
            sport: pick.sport.clone(),
            market: pick.market,
            point: pick.point,
            event_start: pick.event_start,
            opening_odds: pick.odds,
            opened_at: at,
            closing_odds: None,
            closed_at: None,
            clv: None,
        }
    }

    /// Fill the closing price. A record can be closed exactly once.
    pub fn close(&mut self, closing_odds: f64, at: DateTime<Utc>) -> Result<f64, ClvError> {
        if self.closing_odds.is_some() {
            return Err(ClvError::AlreadyClosed {
                event_id: self.event_id.clone(),
                selection: self.selection.clone(),
            });
        }
        if !odds_in_bounds(closing_odds) {
            return Err(DataError::OddsOutOfRange { odds: closing_odds }.into());
        }
        let clv = closing_line_value(self.opening_odds, closing_odds);
        self.closing_odds = Some(closing_odds);
        self.closed_at = Some(at);
        self.clv = Some(clv);
        Ok(clv)
    }

    pub fn status(&self, now: DateTime<Utc>) -> ClvStatus {
        match self.clv {
            Some(clv) => ClvStatus::Closed(clv),
            None if self.event_start <= now => ClvStatus::Missed,
            None => ClvStatus::Pending,
        }
    }

    fn key(&self) -> (String, String) {
        (self.event_id.clone(), self.selection.clone())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// At most one record per (event, selection).
pub struct ClvTracker {
    config: ClvConfig,
    records: DashMap<(String, String), ClvRecord>,
}

impl ClvTracker {
    pub fn new(config: ClvConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ClvConfig {
        &self.config
    }

    /// Open a record for `pick`. Returns the new record, or `None` if the
    /// pair is already tracked.
    pub fn open(&self, pick: &CandidatePick, at: DateTime<Utc>) -> Option<ClvRecord> {
        match self
            .records
            .entry((pick.event_id.clone(), pick.selection.clone()))
        {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let record = ClvRecord::open(pick, at);
                slot.insert(record.clone());
                debug!(event_id = %pick.event_id, selection = %pick.selection, odds = pick.odds, "CLV opened");
                Some(record)
            }
        }
    }

    /// Reload records persisted by a previous run. Existing pairs win.
    pub fn restore(&self, records: Vec<ClvRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.records.entry(record.key()) {
                slot.insert(record);
                restored += 1;
            }
        }
        restored
    }

    pub fn get(&self, event_id: &str, selection: &str) -> Option<ClvRecord> {
        self.records
            .get(&(event_id.to_string(), selection.to_string()))
            .map(|r| r.value().clone())
    }

    /// Pending records whose event starts within the closing lead time.
    pub fn due_for_closing(&self, now: DateTime<Utc>) -> Vec<ClvRecord> {
        let lead = Duration::minutes(self.config.closing_lead_minutes);
        self.records
            .iter()
            .filter(|r| {
                let r = r.value();
                r.status(now) == ClvStatus::Pending && r.event_start - lead <= now
            })
            .map(|r| r.value().clone())
            .collect()
    }

    /// Fill the closing price for a tracked pair and return the CLV.
    pub fn record_closing(
        &self,
        event_id: &str,
        selection: &str,
        closing_odds: f64,
        at: DateTime<Utc>,
    ) -> Result<ClvRecord, ClvError> {
        let mut entry = self
            .records
            .get_mut(&(event_id.to_string(), selection.to_string()))
            .ok_or_else(|| ClvError::NotTracked {
                event_id: event_id.to_string(),
                selection: selection.to_string(),
            })?;
        let clv = entry.value_mut().close(closing_odds, at)?;
        info!(
            event_id,
            selection,
            opening = entry.opening_odds,
            closing = closing_odds,
            clv = format!("{:+.2}%", clv * 100.0),
            "CLV captured"
        );
        Ok(entry.value().clone())
    }

    /// Drop finalized records older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(self.config.retention_hours);
        // Counted in the closure; opens may land while this runs.
        let mut removed = 0;
        self.records.retain(|_, r| {
            let keep = r.status(now) == ClvStatus::Pending || r.event_start > cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn closed_values(&self) -> Vec<(String, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.value().clv.map(|clv| (r.value().sport.clone(), clv)))
            .collect()
    }

    pub fn stats(&self) -> ClvStats {
        let values: Vec<f64> = self.closed_values().into_iter().map(|(_, v)| v).collect();
        ClvStats::from_values(&values)
    }

    pub fn stats_by_sport(&self) -> BTreeMap<String, ClvStats> {
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (sport, clv) in self.closed_values() {
            grouped.entry(sport).or_default().push(clv);
        }
        grouped
            .into_iter()
            .map(|(sport, values)| (sport, ClvStats::from_values(&values)))
            .collect()
    }

    pub fn sharp_verdict(&self) -> SharpVerdict {
        SharpVerdict::from_stats(self.stats())
    }

    /// Records with no CLV data: missed plus still pending.
    pub fn without_clv(&self, now: DateTime<Utc>) -> (usize, usize) {
        self.records.iter().fold((0, 0), |(missed, pending), r| match r.value().status(now) {
            ClvStatus::Missed => (missed + 1, pending),
            ClvStatus::Pending => (missed, pending + 1),
            ClvStatus::Closed(_) => (missed, pending),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
