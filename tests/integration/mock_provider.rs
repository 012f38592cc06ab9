//! Mock odds provider and notifier for integration testing.
//!
//! `MockProvider` serves in-memory quotes per sport and can be told to fail
//! or stall for a given sport. `RecordingNotifier` keeps every payload it
//! is handed.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use valuescan::notifier::{AlertPayload, Notifier, NotifyError};
use valuescan::provider::OddsProvider;
use valuescan::types::{MarketQuote, MarketType, ProviderError};

#[derive(Default)]
pub struct MockProvider {
    quotes: Mutex<HashMap<String, Vec<MarketQuote>>>,
    errors: Mutex<HashMap<String, ProviderError>>,
    delays: Mutex<HashMap<String, std::time::Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the quotes served for `sport`.
    pub fn set_quotes(&self, sport: &str, quotes: Vec<MarketQuote>) {
        self.quotes.lock().unwrap().insert(sport.to_string(), quotes);
    }

    /// Make every fetch for `sport` fail with `err`.
    pub fn set_error(&self, sport: &str, err: ProviderError) {
        self.errors.lock().unwrap().insert(sport.to_string(), err);
    }

    /// Make every fetch for `sport` take at least `delay`.
    pub fn set_delay(&self, sport: &str, delay: std::time::Duration) {
        self.delays.lock().unwrap().insert(sport.to_string(), delay);
    }

    /// Sports fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OddsProvider for MockProvider {
    async fn fetch(
        &self,
        sport: &str,
        markets: &[MarketType],
    ) -> Result<Vec<MarketQuote>, ProviderError> {
        self.calls.lock().unwrap().push(sport.to_string());

        let delay = self.delays.lock().unwrap().get(sport).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.errors.lock().unwrap().get(sport) {
            return Err(err.clone());
        }
        Ok(self
            .quotes
            .lock()
            .unwrap()
            .get(sport)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|q| markets.contains(&q.market))
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Keeps every payload; optionally rejects them all.
#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<AlertPayload>>,
    reject: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn received(&self) -> Vec<AlertPayload> {
        self.received.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(&self, payload: AlertPayload) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(payload);
        if self.reject {
            Err(NotifyError::QueueFull)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Quote builders
// ---------------------------------------------------------------------------

pub fn quote(
    sport: &str,
    event_id: &str,
    selection: &str,
    bookmaker: &str,
    odds: f64,
    start_in: Duration,
) -> MarketQuote {
    let now = Utc::now();
    MarketQuote {
        sport: sport.to_string(),
        event_id: event_id.to_string(),
        home: "Home".to_string(),
        away: "Away".to_string(),
        event_start: now + start_in,
        market: MarketType::Head2Head,
        selection: selection.to_string(),
        point: None,
        participant: None,
        bookmaker: bookmaker.to_string(),
        odds,
        observed_at: now,
    }
}

/// A head-to-head market priced 1.90/1.90 by one bookmaker, with a second
/// bookmaker offering `soft_home` on Home only.
///
/// Modeled probability for Home is 0.5, so Home is a candidate whenever
/// `0.5 × soft_home − 1` clears the edge threshold; Away never is.
pub fn value_market(sport: &str, event_id: &str, soft_home: f64, start_in: Duration) -> Vec<MarketQuote> {
    vec![
        quote(sport, event_id, "Home", "sharp", 1.90, start_in),
        quote(sport, event_id, "Away", "sharp", 1.90, start_in),
        quote(sport, event_id, "Home", "soft", soft_home, start_in),
    ]
}
