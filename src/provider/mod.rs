//! Odds sources.
//!
//! Defines the `OddsProvider` trait and the HTTP adapter for The Odds API.
//! The scan engine only sees `MarketQuote`s and `ProviderError`s; how a
//! provider pages, authenticates or merges endpoints stays behind the trait.

pub mod the_odds_api;

pub use the_odds_api::TheOddsApiClient;

use async_trait::async_trait;

use crate::types::{MarketQuote, MarketType, ProviderError};

/// Abstraction over bookmaker odds feeds.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Current quotes for every upcoming event of `sport`, restricted to
    /// `markets`.
    async fn fetch(
        &self,
        sport: &str,
        markets: &[MarketType],
    ) -> Result<Vec<MarketQuote>, ProviderError>;

    /// Current quotes for a single event. Used by the closing-line pass.
    ///
    /// The default filters a full sport fetch.
    async fn fetch_event(
        &self,
        sport: &str,
        event_id: &str,
        markets: &[MarketType],
    ) -> Result<Vec<MarketQuote>, ProviderError> {
        let quotes = self.fetch(sport, markets).await?;
        Ok(quotes.into_iter().filter(|q| q.event_id == event_id).collect())
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}
