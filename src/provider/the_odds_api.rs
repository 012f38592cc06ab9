//! The Odds API integration (v4).
//!
//! API docs: https://the-odds-api.com/liveapi/guides/v4/
//! Base URL: https://api.the-odds-api.com/v4
//! Auth: `apiKey` query parameter.
//!
//! Full-game markets (`h2h`, `spreads`, `totals`) come from the sport
//! endpoint in one request. Quarter, half and player markets are only
//! served per event, so those are fetched event by event and merged.
//! Only events starting inside the lookahead window are fetched that way.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::OddsProvider;
use crate::types::{MarketQuote, MarketType, ProviderError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com/v4";
const PROVIDER_NAME: &str = "the_odds_api";
const DEFAULT_REGIONS: &str = "eu,us,au";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOOKAHEAD_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ApiEvent {
    id: String,
    sport_key: String,
    commence_time: DateTime<Utc>,
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct ApiBookmaker {
    key: String,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    key: String,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiOutcome {
    /// Team name, "Draw", "Over" or "Under".
    name: String,
    price: f64,
    #[serde(default)]
    point: Option<f64>,
    /// Player name on prop markets.
    #[serde(default)]
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TheOddsApiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    regions: String,
    lookahead: chrono::Duration,
}

impl TheOddsApiClient {
    pub fn new(api_key: SecretString) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_REGIONS)
    }

    pub fn with_base_url(
        api_key: SecretString,
        base_url: &str,
        regions: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("valuescan/0.1.0 (odds-scanner)")
            .build()
            .context("Failed to build HTTP client for The Odds API")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            regions: regions.to_string(),
            lookahead: chrono::Duration::hours(DEFAULT_LOOKAHEAD_HOURS),
        })
    }

    /// Limit per-event requests to events starting within `hours`.
    pub fn with_lookahead_hours(mut self, hours: i64) -> Self {
        self.lookahead = chrono::Duration::hours(hours.max(0));
        self
    }

    fn market_param(markets: &[MarketType]) -> String {
        markets
            .iter()
            .map(|m| m.key())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn query(&self, markets: &[MarketType]) -> String {
        format!(
            "apiKey={}&regions={}&markets={}&oddsFormat=decimal",
            urlencoding::encode(self.api_key.expose_secret()),
            urlencoding::encode(&self.regions),
            urlencoding::encode(&Self::market_param(markets)),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let resp = self.http.get(url).send().await.map_err(map_transport)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http(format!("{status}: {body}")));
        }

        if let Some(remaining) = resp
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!(remaining, "Odds API quota");
        }

        let body = resp.text().await.map_err(map_transport)?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn sport_odds(
        &self,
        sport: &str,
        markets: &[MarketType],
    ) -> Result<Vec<ApiEvent>, ProviderError> {
        let url = format!(
            "{}/sports/{}/odds/?{}",
            self.base_url,
            urlencoding::encode(sport),
            self.query(markets),
        );
        debug!(sport, markets = %Self::market_param(markets), "Fetching sport odds");
        self.get_json(&url).await
    }

    /// Upcoming events without odds. Does not count against the quota.
    async fn list_events(&self, sport: &str) -> Result<Vec<ApiEvent>, ProviderError> {
        let url = format!(
            "{}/sports/{}/events?apiKey={}",
            self.base_url,
            urlencoding::encode(sport),
            urlencoding::encode(self.api_key.expose_secret()),
        );
        self.get_json(&url).await
    }

    async fn event_odds(
        &self,
        sport: &str,
        event_id: &str,
        markets: &[MarketType],
    ) -> Result<ApiEvent, ProviderError> {
        let url = format!(
            "{}/sports/{}/events/{}/odds/?{}",
            self.base_url,
            urlencoding::encode(sport),
            urlencoding::encode(event_id),
            self.query(markets),
        );
        debug!(sport, event_id, "Fetching event odds");
        self.get_json(&url).await
    }
}

fn map_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Http(err.to_string())
    }
}

/// Events not yet started and starting no later than `now + lookahead`.
fn events_in_window(
    events: &[ApiEvent],
    now: DateTime<Utc>,
    lookahead: chrono::Duration,
) -> Vec<&ApiEvent> {
    let horizon = now + lookahead;
    events
        .iter()
        .filter(|e| e.commence_time > now && e.commence_time <= horizon)
        .collect()
}

/// Markets the sport endpoint serves directly.
fn is_featured(market: &MarketType) -> bool {
    matches!(
        market,
        MarketType::Head2Head | MarketType::Spread | MarketType::Total
    )
}

#[async_trait]
impl OddsProvider for TheOddsApiClient {
    async fn fetch(
        &self,
        sport: &str,
        markets: &[MarketType],
    ) -> Result<Vec<MarketQuote>, ProviderError> {
        let (featured, additional): (Vec<MarketType>, Vec<MarketType>) =
            markets.iter().copied().partition(is_featured);

        let observed_at = Utc::now();
        let events = if featured.is_empty() {
            self.list_events(sport).await?
        } else {
            self.sport_odds(sport, &featured).await?
        };
        let mut quotes = parse_events(&events, observed_at);

        if !additional.is_empty() {
            let upcoming = events_in_window(&events, observed_at, self.lookahead);
            debug!(sport, events = events.len(), upcoming = upcoming.len(), "Fetching event markets");
            for event in upcoming {
                match self.event_odds(sport, &event.id, &additional).await {
                    Ok(detail) => {
                        quotes.extend(parse_events(std::slice::from_ref(&detail), observed_at))
                    }
                    // A rate limit applies to every remaining event too.
                    Err(ProviderError::RateLimited) => return Err(ProviderError::RateLimited),
                    Err(err) => {
                        warn!(sport, event_id = %event.id, %err, "Event markets unavailable");
                    }
                }
            }
        }

        debug!(sport, events = events.len(), quotes = quotes.len(), "Odds fetched");
        Ok(quotes)
    }

    async fn fetch_event(
        &self,
        sport: &str,
        event_id: &str,
        markets: &[MarketType],
    ) -> Result<Vec<MarketQuote>, ProviderError> {
        let event = self.event_odds(sport, event_id, markets).await?;
        Ok(parse_events(std::slice::from_ref(&event), Utc::now()))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Flatten events into one quote per (bookmaker, market, outcome).
/// Unknown market keys are skipped.
pub(crate) fn parse_events(events: &[ApiEvent], observed_at: DateTime<Utc>) -> Vec<MarketQuote> {
    let mut quotes = Vec::new();
    for event in events {
        for book in &event.bookmakers {
            for market in &book.markets {
                let market_type: MarketType = match market.key.parse() {
                    Ok(m) => m,
                    Err(err) => {
                        debug!(event_id = %event.id, %err, "Skipping market");
                        continue;
                    }
                };
                let seen = market.last_update.or(book.last_update).unwrap_or(observed_at);

                for outcome in &market.outcomes {
                    let participant = match market_type {
                        MarketType::PlayerProp(_) => outcome.description.clone(),
                        _ => None,
                    };
                    let selection = match &participant {
                        Some(player) => format!("{player} {}", outcome.name),
                        None => outcome.name.clone(),
                    };
                    quotes.push(MarketQuote {
                        sport: event.sport_key.clone(),
                        event_id: event.id.clone(),
                        home: event.home_team.clone(),
                        away: event.away_team.clone(),
                        event_start: event.commence_time,
                        market: market_type,
                        selection,
                        point: outcome.point,
                        participant,
                        bookmaker: book.key.clone(),
                        odds: outcome.price,
                        observed_at: seen,
                    });
                }
            }
        }
    }
    quotes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
