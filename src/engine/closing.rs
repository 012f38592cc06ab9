//! Closing-line pass.
//!
//! Re-prices every open CLV record whose event starts within the closing
//! lead time and stores the closing odds. Records whose event has already
//! started are left alone and show up as missed.

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ScanEngine;
use crate::clv::ClvRecord;
use crate::storage::WriteOp;
use crate::types::{odds_in_bounds, point_key, MarketQuote, MarketType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosingReport {
    pub due: usize,
    pub closed: usize,
    /// Due records the provider no longer prices.
    pub unpriced: usize,
    /// Events whose fetch failed.
    pub failed_events: usize,
}

/// Best available price for the record's selection on the same market and
/// line.
pub(crate) fn closing_price(record: &ClvRecord, quotes: &[MarketQuote]) -> Option<f64> {
    // Same selection, so the signed point identifies the line.
    let line = record.point.map(point_key);
    quotes
        .iter()
        .filter(|q| {
            q.event_id == record.event_id
                && q.market == record.market
                && q.selection == record.selection
                && q.point.map(point_key) == line
                && odds_in_bounds(q.odds)
        })
        .map(|q| q.odds)
        .max_by(|a, b| a.total_cmp(b))
}

impl ScanEngine {
    pub async fn run_closing_pass(&self) -> ClosingReport {
        let due = self.clv.due_for_closing(Utc::now());
        let mut report = ClosingReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return report;
        }

        let mut by_event: BTreeMap<(String, String), Vec<ClvRecord>> = BTreeMap::new();
        for record in due {
            by_event
                .entry((record.sport.clone(), record.event_id.clone()))
                .or_default()
                .push(record);
        }

        let timeout = Duration::from_secs(self.config.schedule.sport_timeout_secs);
        for ((sport, event_id), records) in by_event {
            let mut markets: Vec<MarketType> = records.iter().map(|r| r.market).collect();
            markets.sort_by_key(|m| m.key());
            markets.dedup();

            let quotes = match tokio::time::timeout(
                timeout,
                self.provider.fetch_event(&sport, &event_id, &markets),
            )
            .await
            {
                Ok(Ok(quotes)) => quotes,
                Ok(Err(err)) => {
                    warn!(%sport, %event_id, %err, "Closing odds unavailable");
                    report.failed_events += 1;
                    continue;
                }
                Err(_) => {
                    warn!(%sport, %event_id, "Closing odds fetch timed out");
                    report.failed_events += 1;
                    continue;
                }
            };

            let now = Utc::now();
            for record in records {
                let Some(odds) = closing_price(&record, &quotes) else {
                    debug!(%event_id, selection = %record.selection, "No closing price");
                    report.unpriced += 1;
                    continue;
                };
                match self.clv.record_closing(&record.event_id, &record.selection, odds, now) {
                    Ok(closed) => {
                        self.outbox.enqueue(WriteOp::CloseClv(closed));
                        report.closed += 1;
                    }
                    Err(err) => {
                        debug!(%event_id, selection = %record.selection, %err, "Closing skipped");
                    }
                }
            }
        }

        info!(
            due = report.due,
            closed = report.closed,
            unpriced = report.unpriced,
            failed_events = report.failed_events,
            "Closing pass complete"
        );
        report
    }
}
