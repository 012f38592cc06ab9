//! Scan engine: the fetch → score → dedup → alert loop.
//!
//! One `run_cycle` call is one scan cycle. Sports are fetched with bounded
//! concurrency, each under its own timeout, and every result is scored and
//! dispatched as soon as it arrives. A sport that fails is skipped until the
//! next cycle. Once the cycle deadline passes no further sports are
//! launched, but calls already in flight are allowed to finish and their
//! picks are still delivered.
//!
//! Writes to the store go through the engine's `Outbox` and are flushed at
//! the end of the cycle when a store is attached.

pub mod cleanup;
pub mod closing;

pub use cleanup::{CleanupReport, CleanupScheduler};
pub use closing::ClosingReport;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{AlertCache, CacheConfig, EventCache};
use crate::clv::{ClvConfig, ClvTracker};
use crate::notifier::{AlertPayload, Notifier};
use crate::provider::OddsProvider;
use crate::staking::StakingEngine;
use crate::storage::{FlushReport, Outbox, Store, WriteOp};
use crate::strategy::value::{ScanSummary, ScannerConfig, ValueScanner};
use crate::types::{CandidatePick, EngineError, MarketQuote, MarketType, ProviderError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scan_interval_secs: u64,
    pub cleanup_interval_minutes: i64,
    /// No new sports are launched once a cycle has run this long.
    pub cycle_timeout_secs: u64,
    pub sport_timeout_secs: u64,
    pub max_concurrent_sports: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            cleanup_interval_minutes: 120,
            cycle_timeout_secs: 120,
            sport_timeout_secs: 30,
            max_concurrent_sports: 4,
        }
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub sports: Vec<String>,
    pub markets: Vec<MarketType>,
    pub scanner: ScannerConfig,
    pub caches: CacheConfig,
    pub schedule: ScheduleConfig,
    pub clv: ClvConfig,
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub sports_scanned: usize,
    pub sports_failed: Vec<(String, ProviderError)>,
    /// Sports never launched because the cycle deadline passed.
    pub sports_skipped: Vec<String>,
    pub summary: ScanSummary,
    pub alerts_sent: usize,
    pub duplicates_suppressed: usize,
    pub notify_failures: usize,
    pub events_cached: usize,
    pub alerts_cached: usize,
    pub cleanup: Option<CleanupReport>,
    pub flush: Option<FlushReport>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} sports ok, {} failed, {} skipped, {} alerts",
            self.cycle,
            self.sports_scanned,
            self.sports_failed.len(),
            self.sports_skipped.len(),
            self.alerts_sent,
        )
    }
}

/// Clears the running flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ScanEngine {
    config: EngineConfig,
    scanner: ValueScanner,
    events: EventCache,
    alerts: AlertCache,
    clv: ClvTracker,
    outbox: Outbox,
    cleanup: CleanupScheduler,
    provider: Arc<dyn OddsProvider>,
    notifier: Arc<dyn Notifier>,
    store: Option<Arc<dyn Store>>,
    staking: Option<Arc<StakingEngine>>,
    running: AtomicBool,
    cycles: AtomicU64,
}

impl ScanEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn OddsProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let caches = &config.caches;
        Self {
            scanner: ValueScanner::new(config.scanner.clone()),
            events: EventCache::new(caches.max_monitored_events),
            alerts: AlertCache::new(caches.max_sent_alerts, caches.alert_trim_fraction),
            clv: ClvTracker::new(config.clv.clone()),
            outbox: Outbox::default(),
            cleanup: CleanupScheduler::new(
                chrono::Duration::minutes(config.schedule.cleanup_interval_minutes),
                chrono::Duration::minutes(caches.event_grace_minutes),
            ),
            provider,
            notifier,
            store: None,
            staking: None,
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            config,
        }
    }

    /// Attach a store; queued writes are flushed to it after each cycle.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the user registry; each new alert then goes to the premium
    /// users with daily quota left.
    pub fn with_staking(mut self, staking: Arc<StakingEngine>) -> Self {
        self.staking = Some(staking);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventCache {
        &self.events
    }

    pub fn alerts(&self) -> &AlertCache {
        &self.alerts
    }

    pub fn clv(&self) -> &ClvTracker {
        &self.clv
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Run one scan cycle. Returns `CycleInProgress` without doing anything
    /// if another cycle is still running.
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Scan trigger skipped: previous cycle still running");
            return Err(EngineError::CycleInProgress);
        }
        let _guard = CycleGuard(&self.running);

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        let schedule = &self.config.schedule;
        let deadline = Instant::now() + Duration::from_secs(schedule.cycle_timeout_secs);
        let max_in_flight = schedule.max_concurrent_sports.max(1);

        info!(cycle, sports = self.config.sports.len(), "Starting scan cycle");

        let mut queued = self.config.sports.iter();
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < max_in_flight && Instant::now() < deadline {
                match queued.next() {
                    Some(sport) => in_flight.push(self.fetch_sport(sport)),
                    None => break,
                }
            }
            let Some((sport, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(quotes) => {
                    report.sports_scanned += 1;
                    self.process_quotes(&sport, &quotes, &mut report);
                }
                Err(source) => {
                    let err = EngineError::Provider { sport: sport.clone(), source: source.clone() };
                    warn!(%err, "Sport skipped this cycle");
                    report.sports_failed.push((sport, source));
                }
            }
        }
        report.sports_skipped = queued.cloned().collect();
        if !report.sports_skipped.is_empty() {
            warn!(
                skipped = report.sports_skipped.len(),
                "Cycle deadline reached, remaining sports deferred"
            );
        }

        report.cleanup = self.maybe_cleanup(Utc::now());
        report.flush = self.flush().await;
        report.events_cached = self.events.len();
        report.alerts_cached = self.alerts.len();

        info!(
            cycle,
            scanned = report.sports_scanned,
            failed = report.sports_failed.len(),
            skipped = report.sports_skipped.len(),
            quotes = report.summary.quotes_in,
            candidates = report.summary.candidates,
            alerts = report.alerts_sent,
            suppressed = report.duplicates_suppressed,
            events_cached = report.events_cached,
            alerts_cached = report.alerts_cached,
            pending_writes = self.outbox.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    async fn fetch_sport(&self, sport: &str) -> (String, Result<Vec<MarketQuote>, ProviderError>) {
        let timeout = Duration::from_secs(self.config.schedule.sport_timeout_secs);
        let result = match tokio::time::timeout(
            timeout,
            self.provider.fetch(sport, &self.config.markets),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };
        (sport.to_string(), result)
    }

    fn process_quotes(&self, sport: &str, quotes: &[MarketQuote], report: &mut CycleReport) {
        let now = Utc::now();
        let (candidates, summary) = self.scanner.scan(quotes, now);
        debug!(sport, %summary, "Sport scanned");
        report.summary.merge(&summary);

        let mut seen = HashSet::new();
        for quote in quotes.iter().filter(|q| q.event_start > now) {
            if seen.insert(quote.event_id.as_str()) {
                self.events.observe(quote, now);
            }
        }

        for pick in candidates {
            self.dispatch(pick, now, report);
        }
    }

    /// Dedup, record and hand off one candidate. Returns `true` when it
    /// was new.
    fn dispatch(&self, pick: CandidatePick, now: DateTime<Utc>, report: &mut CycleReport) -> bool {
        let fingerprint = pick.fingerprint();
        if !self.alerts.mark_sent(fingerprint.clone(), now) {
            debug!(%fingerprint, "Duplicate pick suppressed");
            report.duplicates_suppressed += 1;
            return false;
        }

        self.events.record_pick(&pick, now);
        self.outbox.enqueue(WriteOp::InsertPrediction(pick.clone()));
        if let Some(record) = self.clv.open(&pick, now) {
            self.outbox.enqueue(WriteOp::OpenClv(record));
        }

        let mut payload = AlertPayload::new(pick);
        if let Some(staking) = &self.staking {
            let recipients = staking.reserve_alert_recipients(now);
            if recipients.is_empty() {
                debug!(%fingerprint, "No user has alert quota left");
            }
            let ids = recipients.iter().map(|u| u.user_id.clone()).collect();
            for user in recipients {
                self.outbox.enqueue(WriteOp::UpsertUser(user));
            }
            payload = payload.with_recipients(ids);
        }

        match self.notifier.notify(payload) {
            Ok(()) => report.alerts_sent += 1,
            Err(err) => {
                // The pick stays marked as sent.
                warn!(%fingerprint, notifier = self.notifier.name(), %err, "Alert hand-off failed");
                report.notify_failures += 1;
            }
        }
        true
    }

    /// Flush queued writes to the attached store, if any.
    pub async fn flush(&self) -> Option<FlushReport> {
        let store = self.store.as_ref()?;
        Some(self.outbox.flush(store.as_ref()).await)
    }

    /// Roll every user whose week has ended and queue the updated state.
    pub fn weekly_rollover(&self, staking: &StakingEngine, now: DateTime<Utc>) -> usize {
        let rolled = staking.rollover_all(now);
        for (user, summary) in &rolled {
            info!(
                user_id = %user.user_id,
                week_profit = %summary.week_profit,
                fee_due = %summary.fee_due,
                state = ?summary.state,
                "Weekly rollover"
            );
            self.outbox.enqueue(WriteOp::UpsertUser(user.clone()));
        }
        rolled.len()
    }
}
