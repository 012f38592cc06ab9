//! Shared types for the value scanner.
//!
//! These types form the data model used across all modules: quotes coming
//! in from odds providers, scored candidate picks going out to the
//! notifier, the dedup fingerprint, and the error taxonomy. They are kept
//! free of engine logic so that strategy, cache, and storage modules can
//! depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Lowest decimal odds accepted anywhere in the system.
pub const MIN_VALID_ODDS: f64 = 1.01;

/// Highest decimal odds accepted anywhere in the system.
pub const MAX_VALID_ODDS: f64 = 1000.0;

/// Integer key for a handicap or total line, in hundredths.
pub fn point_key(point: f64) -> i64 {
    (point * 100.0).round() as i64
}

/// Whether decimal odds lie within the valid bound `[1.01, 1000]`.
pub fn odds_in_bounds(odds: f64) -> bool {
    odds.is_finite() && (MIN_VALID_ODDS..=MAX_VALID_ODDS).contains(&odds)
}

// ---------------------------------------------------------------------------
// Market types
// ---------------------------------------------------------------------------

/// Full-game market families that can also be offered per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseMarket {
    Head2Head,
    Spread,
    Total,
}

impl BaseMarket {
    fn key(&self) -> &'static str {
        match self {
            BaseMarket::Head2Head => "h2h",
            BaseMarket::Spread => "spreads",
            BaseMarket::Total => "totals",
        }
    }
}

/// A sub-period of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Quarter(u8),
    Half(u8),
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Quarter(n) => write!(f, "Q{n}"),
            Period::Half(n) => write!(f, "H{n}"),
        }
    }
}

/// Player statistic a prop market is written on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerStat {
    Points,
    Assists,
    Rebounds,
    Threes,
    Blocks,
    Steals,
}

impl PlayerStat {
    fn key(&self) -> &'static str {
        match self {
            PlayerStat::Points => "points",
            PlayerStat::Assists => "assists",
            PlayerStat::Rebounds => "rebounds",
            PlayerStat::Threes => "threes",
            PlayerStat::Blocks => "blocks",
            PlayerStat::Steals => "steals",
        }
    }
}

/// Closed set of market types the scanner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Head2Head,
    Spread,
    Total,
    PeriodVariant { base: BaseMarket, period: Period },
    PlayerProp(PlayerStat),
}

/// Variance class used by the probability model to pick a heuristic offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceClass {
    FullGame,
    SubPeriod,
    PlayerProp,
}

impl MarketType {
    /// Provider key for this market (`h2h`, `spreads_q1`, `player_points`, ...).
    pub fn key(&self) -> String {
        match self {
            MarketType::Head2Head => "h2h".to_string(),
            MarketType::Spread => "spreads".to_string(),
            MarketType::Total => "totals".to_string(),
            MarketType::PeriodVariant { base, period } => {
                format!("{}_{}", base.key(), period.to_string().to_lowercase())
            }
            MarketType::PlayerProp(stat) => format!("player_{}", stat.key()),
        }
    }

    /// The full-game family this market belongs to, if any.
    pub fn base(&self) -> Option<BaseMarket> {
        match self {
            MarketType::Head2Head => Some(BaseMarket::Head2Head),
            MarketType::Spread => Some(BaseMarket::Spread),
            MarketType::Total => Some(BaseMarket::Total),
            MarketType::PeriodVariant { base, .. } => Some(*base),
            MarketType::PlayerProp(_) => None,
        }
    }

    /// Number of outcomes a complete market must show before it can be
    /// de-vigged. Soccer match-winner markets carry a draw.
    pub fn required_sides(&self, sport: &str) -> usize {
        match self.base() {
            Some(BaseMarket::Head2Head) if sport.starts_with("soccer") => 3,
            Some(_) => 2,
            None => 2,
        }
    }

    pub fn variance_class(&self) -> VarianceClass {
        match self {
            MarketType::Head2Head | MarketType::Spread | MarketType::Total => {
                VarianceClass::FullGame
            }
            MarketType::PeriodVariant { .. } => VarianceClass::SubPeriod,
            MarketType::PlayerProp(_) => VarianceClass::PlayerProp,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for MarketType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let unknown = || DataError::UnknownMarket(s.to_string());

        if let Some(stat) = key.strip_prefix("player_") {
            let stat = match stat {
                "points" => PlayerStat::Points,
                "assists" => PlayerStat::Assists,
                "rebounds" => PlayerStat::Rebounds,
                "threes" => PlayerStat::Threes,
                "blocks" => PlayerStat::Blocks,
                "steals" => PlayerStat::Steals,
                _ => return Err(unknown()),
            };
            return Ok(MarketType::PlayerProp(stat));
        }

        let (base_key, period_key) = match key.split_once('_') {
            Some((b, p)) => (b, Some(p)),
            None => (key.as_str(), None),
        };

        let base = match base_key {
            "h2h" => BaseMarket::Head2Head,
            "spreads" => BaseMarket::Spread,
            "totals" => BaseMarket::Total,
            _ => return Err(unknown()),
        };

        let Some(period_key) = period_key else {
            return Ok(match base {
                BaseMarket::Head2Head => MarketType::Head2Head,
                BaseMarket::Spread => MarketType::Spread,
                BaseMarket::Total => MarketType::Total,
            });
        };

        let mut chars = period_key.chars();
        let period = match (chars.next(), chars.as_str().parse::<u8>()) {
            (Some('q'), Ok(n @ 1..=4)) => Period::Quarter(n),
            (Some('h'), Ok(n @ 1..=2)) => Period::Half(n),
            _ => return Err(unknown()),
        };

        Ok(MarketType::PeriodVariant { base, period })
    }
}

// ---------------------------------------------------------------------------
// Quotes and picks
// ---------------------------------------------------------------------------

/// One bookmaker price for one selection, as observed by an odds provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    /// Provider sport key, e.g. `basketball_nba`.
    pub sport: String,
    pub event_id: String,
    pub home: String,
    pub away: String,
    /// Scheduled start of the event.
    pub event_start: DateTime<Utc>,
    pub market: MarketType,
    pub selection: String,
    /// Handicap or total line, when the market has one.
    pub point: Option<f64>,
    /// Player a prop market is written on.
    pub participant: Option<String>,
    pub bookmaker: String,
    /// Decimal odds.
    pub odds: f64,
    pub observed_at: DateTime<Utc>,
}

impl MarketQuote {
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.odds
    }

    /// Line identity shared by both sides of a market.
    ///
    /// Spreads are keyed on the home side's handicap, so `Home -1.5 / Away
    /// +1.5` and `Home +1.5 / Away -1.5` are two different markets. Totals
    /// and props share one unsigned line.
    pub fn line_key(&self) -> Option<i64> {
        let point = self.point?;
        let line = match self.market.base() {
            Some(BaseMarket::Spread) if self.selection == self.home => point,
            Some(BaseMarket::Spread) => -point,
            _ => point.abs(),
        };
        Some(point_key(line))
    }
}

/// A scored pick produced by the value scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePick {
    pub sport: String,
    pub event_id: String,
    pub home: String,
    pub away: String,
    pub event_start: DateTime<Utc>,
    pub market: MarketType,
    pub selection: String,
    pub point: Option<f64>,
    /// Bookmaker offering the best price for the selection.
    pub bookmaker: String,
    pub odds: f64,
    /// Modeled win probability, strictly inside (0, 1).
    pub probability: f64,
    /// `probability × odds − 1`
    pub value: f64,
    pub generated_at: DateTime<Utc>,
}

impl CandidatePick {
    pub fn fingerprint(&self) -> AlertFingerprint {
        AlertFingerprint {
            event_id: self.event_id.clone(),
            selection: self.selection.clone(),
            market: self.market,
        }
    }

    pub fn event_name(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }
}

impl fmt::Display for CandidatePick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | {} {} @ {:.2} ({}) | p={:.1}% value={:+.1}%",
            self.sport,
            self.event_name(),
            self.market,
            self.selection,
            self.odds,
            self.bookmaker,
            self.probability * 100.0,
            self.value * 100.0,
        )
    }
}

/// Composite key identifying a unique deliverable pick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertFingerprint {
    pub event_id: String,
    pub selection: String,
    pub market: MarketType,
}

impl fmt::Display for AlertFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.event_id, self.market, self.selection)
    }
}

/// An in-flight event tracked across scan cycles.
#[derive(Debug, Clone)]
pub struct MonitoredEvent {
    pub event_id: String,
    pub sport: String,
    pub home: String,
    pub away: String,
    pub starts_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Fingerprints already alerted for this event.
    pub alerted: HashSet<AlertFingerprint>,
}

impl MonitoredEvent {
    pub fn from_pick(pick: &CandidatePick, seen_at: DateTime<Utc>) -> Self {
        Self {
            event_id: pick.event_id.clone(),
            sport: pick.sport.clone(),
            home: pick.home.clone(),
            away: pick.away.clone(),
            starts_at: pick.event_start,
            last_seen: seen_at,
            alerted: HashSet::new(),
        }
    }

    pub fn from_quote(quote: &MarketQuote, seen_at: DateTime<Utc>) -> Self {
        Self {
            event_id: quote.event_id.clone(),
            sport: quote.sport.clone(),
            home: quote.home.clone(),
            away: quote.away.clone(),
            starts_at: quote.event_start,
            last_seen: seen_at,
            alerted: HashSet::new(),
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure talking to an odds provider. Always transient: the affected
/// sport is skipped for the current cycle and retried on the next one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by odds provider")]
    RateLimited,

    #[error("odds provider timed out")]
    Timeout,

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("odds provider HTTP error: {0}")]
    Http(String),
}

/// A quote or market that cannot be scored. The affected candidate is
/// dropped; the cycle continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("odds {odds} outside valid range [{MIN_VALID_ODDS}, {MAX_VALID_ODDS}]")]
    OddsOutOfRange { odds: f64 },

    #[error("market {market} for event {event_id} shows {seen} of {required} sides")]
    MissingSide {
        event_id: String,
        market: String,
        seen: usize,
        required: usize,
    },

    #[error("superseded duplicate quote for {selection} in event {event_id}")]
    DuplicateQuote { event_id: String, selection: String },

    #[error("unknown market type: {0}")]
    UnknownMarket(String),
}

/// A bounded cache grew past its limit. Resolved internally by eviction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{cache} holds {len} entries, capacity {capacity}")]
pub struct CapacityError {
    pub cache: &'static str,
    pub len: usize,
    pub capacity: usize,
}

/// A write to the persistence store failed. In-memory state stays valid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError(e.to_string())
    }
}

/// Errors surfaced by the scan engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error ({sport}): {source}")]
    Provider {
        sport: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("scan cycle already running")]
    CycleInProgress,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
