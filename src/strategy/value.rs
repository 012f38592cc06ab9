//! Value detection.
//!
//! Scores every priced selection as `probability × odds − 1` against the
//! best available price and keeps those at or above the minimum edge.
//! Bad quotes (out-of-range odds, superseded duplicates, incomplete
//! markets) are dropped and counted, never raised.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use super::probability::{ProbabilityConfig, ProbabilityModel};
use crate::types::{
    odds_in_bounds, CandidatePick, DataError, MarketQuote, MarketType, MAX_VALID_ODDS,
    MIN_VALID_ODDS,
};

/// Tolerance for comparing a value score against the threshold.
const VALUE_EPSILON: f64 = 1e-9;

/// `probability × decimal_odds − 1`
pub fn value_score(probability: f64, odds: f64) -> f64 {
    probability * odds - 1.0
}

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Minimum value score for a selection to become a candidate.
    pub min_edge: f64,
    /// Per-sport minimum value score, keyed by sport-key prefix
    /// (`basketball`, `soccer_epl`). The longest matching prefix wins;
    /// sports without a match use `min_edge`.
    pub sport_thresholds: BTreeMap<String, f64>,
    /// Selections modeled below this probability are dropped.
    pub min_probability: f64,
    /// Narrower odds window for candidates, inside the valid bound.
    pub min_odds: f64,
    pub max_odds: f64,
    /// Events starting later than this are ignored.
    pub lookahead_hours: i64,
    /// Keep only the best N candidates per scan (`None` = no limit).
    pub max_candidates_per_cycle: Option<usize>,
    #[serde(flatten)]
    pub probability: ProbabilityConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_edge: 0.05,
            sport_thresholds: BTreeMap::new(),
            min_probability: 0.0,
            min_odds: MIN_VALID_ODDS,
            max_odds: MAX_VALID_ODDS,
            lookahead_hours: 24,
            max_candidates_per_cycle: None,
            probability: ProbabilityConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Minimum value score applied to `sport`.
    pub fn min_edge_for(&self, sport: &str) -> f64 {
        self.sport_thresholds
            .iter()
            .filter(|(prefix, _)| sport.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, edge)| *edge)
            .unwrap_or(self.min_edge)
    }
}

// ---------------------------------------------------------------------------
// Scan summary
// ---------------------------------------------------------------------------

/// Counts of quotes and markets dropped during one scan, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub quotes_in: usize,
    pub out_of_window: usize,
    pub odds_out_of_range: usize,
    pub duplicates: usize,
    pub markets: usize,
    pub missing_side: usize,
    pub below_probability: usize,
    pub below_edge: usize,
    pub candidates: usize,
}

impl ScanSummary {
    pub fn merge(&mut self, other: &ScanSummary) {
        self.quotes_in += other.quotes_in;
        self.out_of_window += other.out_of_window;
        self.odds_out_of_range += other.odds_out_of_range;
        self.duplicates += other.duplicates;
        self.markets += other.markets;
        self.missing_side += other.missing_side;
        self.below_probability += other.below_probability;
        self.below_edge += other.below_edge;
        self.candidates += other.candidates;
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quotes={} markets={} candidates={} dropped(window={} odds={} dup={} sides={} prob={} edge={})",
            self.quotes_in,
            self.markets,
            self.candidates,
            self.out_of_window,
            self.odds_out_of_range,
            self.duplicates,
            self.missing_side,
            self.below_probability,
            self.below_edge,
        )
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Quotes for one market: event, market type, line and player.
type MarketKey = (String, MarketType, Option<i64>, Option<String>);

/// Dedup identity of a single quote.
type QuoteKey = (String, MarketType, Option<i64>, String, String);

pub struct ValueScanner {
    config: ScannerConfig,
    model: ProbabilityModel,
}

impl ValueScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let model = ProbabilityModel::new(config.probability.clone());
        Self { config, model }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Score the quotes gathered for one sport in one cycle.
    ///
    /// Candidates come back ordered by value descending, ties broken by
    /// earliest scheduled start.
    pub fn scan(
        &self,
        quotes: &[MarketQuote],
        now: DateTime<Utc>,
    ) -> (Vec<CandidatePick>, ScanSummary) {
        let mut summary = ScanSummary {
            quotes_in: quotes.len(),
            ..Default::default()
        };
        let horizon = now + Duration::hours(self.config.lookahead_hours);

        // Step 1 – validate and keep the most recent quote per identity
        let mut latest: HashMap<QuoteKey, &MarketQuote> = HashMap::new();
        for q in quotes {
            if q.event_start <= now || q.event_start > horizon {
                summary.out_of_window += 1;
                continue;
            }
            if !odds_in_bounds(q.odds) {
                let err = DataError::OddsOutOfRange { odds: q.odds };
                debug!(event_id = %q.event_id, bookmaker = %q.bookmaker, %err, "Quote dropped");
                summary.odds_out_of_range += 1;
                continue;
            }
            let key = (
                q.event_id.clone(),
                q.market,
                q.line_key(),
                q.selection.clone(),
                q.bookmaker.clone(),
            );
            match latest.get(&key) {
                Some(existing) => {
                    summary.duplicates += 1;
                    if q.observed_at > existing.observed_at {
                        latest.insert(key, q);
                    }
                }
                None => {
                    latest.insert(key, q);
                }
            }
        }

        // Step 2 – group by market
        let mut markets: HashMap<MarketKey, Vec<MarketQuote>> = HashMap::new();
        for ((event_id, market, line, _, _), q) in latest {
            markets
                .entry((event_id, market, line, q.participant.clone()))
                .or_default()
                .push(q.clone());
        }
        summary.markets = markets.len();

        // Step 3 – model and score each market
        let mut candidates = Vec::new();
        for group in markets.values() {
            let Some(first) = group.first() else { continue };
            let min_edge = self.config.min_edge_for(&first.sport);
            let required = first.market.required_sides(&first.sport);
            let estimate = match self.model.estimate(group, required) {
                Ok(estimate) => estimate,
                Err(err) => {
                    debug!(%err, "Market skipped");
                    summary.missing_side += 1;
                    continue;
                }
            };

            for (selection, probability) in &estimate.probabilities {
                if *probability + VALUE_EPSILON < self.config.min_probability {
                    summary.below_probability += 1;
                    continue;
                }
                let Some(best) = group
                    .iter()
                    .filter(|q| &q.selection == selection)
                    .max_by(|a, b| a.odds.total_cmp(&b.odds))
                else {
                    continue;
                };

                let value = value_score(*probability, best.odds);
                let in_window = best.odds >= self.config.min_odds && best.odds <= self.config.max_odds;
                if !in_window || value + VALUE_EPSILON < min_edge {
                    summary.below_edge += 1;
                    continue;
                }

                debug!(
                    event_id = %best.event_id,
                    market = %best.market,
                    selection = %selection,
                    odds = best.odds,
                    probability = format!("{:.1}%", probability * 100.0),
                    value = format!("{:+.1}%", value * 100.0),
                    derivation = ?estimate.derivation,
                    "Value detected"
                );

                candidates.push(CandidatePick {
                    sport: best.sport.clone(),
                    event_id: best.event_id.clone(),
                    home: best.home.clone(),
                    away: best.away.clone(),
                    event_start: best.event_start,
                    market: best.market,
                    selection: selection.clone(),
                    point: best.point,
                    bookmaker: best.bookmaker.clone(),
                    odds: best.odds,
                    probability: *probability,
                    value,
                    generated_at: now,
                });
            }
        }

        // Step 4 – rank
        candidates.sort_by(|a, b| {
            b.value
                .total_cmp(&a.value)
                .then_with(|| a.event_start.cmp(&b.event_start))
        });
        if let Some(limit) = self.config.max_candidates_per_cycle {
            candidates.truncate(limit);
        }
        summary.candidates = candidates.len();

        (candidates, summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_quote(
        event_id: &str,
        market: MarketType,
        selection: &str,
        bookmaker: &str,
        odds: f64,
        start_in: Duration,
    ) -> MarketQuote {
        let now = Utc::now();
        MarketQuote {
            sport: "basketball_nba".into(),
            event_id: event_id.into(),
            home: "Home".into(),
            away: "Away".into(),
            event_start: now + start_in,
            market,
            selection: selection.into(),
            point: None,
            participant: None,
            bookmaker: bookmaker.into(),
            odds,
            observed_at: now,
        }
    }

    fn h2h(event_id: &str, home: f64, away: f64, start_in: Duration) -> Vec<MarketQuote> {
        vec![
            make_quote(event_id, MarketType::Head2Head, "Home", "sharp", home, start_in),
            make_quote(event_id, MarketType::Head2Head, "Away", "sharp", away, start_in),
        ]
    }

    fn scanner(min_edge: f64) -> ValueScanner {
        ValueScanner::new(ScannerConfig {
            min_edge,
            ..Default::default()
        })
    }

    #[test]
    fn test_value_score_example() {
        assert!((value_score(0.55, 2.10) - 0.155).abs() < 1e-10);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let now = Utc::now();
        let mut quotes = h2h("ev1", 1.818_181_818_181_818_2, 2.222_222_222_222_222, Duration::hours(2));
        // Soft book posts 2.10 on Home; fair Home probability is 0.55.
        quotes.push(make_quote("ev1", MarketType::Head2Head, "Home", "soft", 2.10, Duration::hours(2)));

        let (at_edge, _) = scanner(0.155).scan(&quotes, now);
        assert_eq!(at_edge.len(), 1);
        assert!((at_edge[0].value - 0.155).abs() < 1e-9);
        assert_eq!(at_edge[0].bookmaker, "soft");

        let (above_edge, summary) = scanner(0.16).scan(&quotes, now);
        assert!(above_edge.is_empty());
        assert!(summary.below_edge >= 1);
    }

    #[test]
    fn test_fair_market_has_no_value() {
        let (picks, summary) = scanner(0.01).scan(&h2h("ev1", 1.90, 1.90, Duration::hours(2)), Utc::now());
        assert!(picks.is_empty());
        assert_eq!(summary.markets, 1);
        assert_eq!(summary.below_edge, 2);
    }

    #[test]
    fn test_sorted_by_value_then_start() {
        let now = Utc::now();
        let mut quotes = Vec::new();
        // Same fair price and soft price on two events; the earlier one ranks first.
        for (id, start) in [("late", Duration::hours(5)), ("early", Duration::hours(1))] {
            quotes.extend(h2h(id, 2.0, 2.0, start));
            quotes.push(make_quote(id, MarketType::Head2Head, "Home", "soft", 2.4, start));
        }
        // A bigger edge elsewhere ranks above both.
        quotes.extend(h2h("best", 2.0, 2.0, Duration::hours(3)));
        quotes.push(make_quote("best", MarketType::Head2Head, "Away", "soft", 3.0, Duration::hours(3)));

        let (picks, _) = scanner(0.05).scan(&quotes, now);
        let ids: Vec<_> = picks.iter().map(|p| p.event_id.as_str()).collect();
        assert_eq!(ids, vec!["best", "early", "late"]);
    }

    #[test]
    fn test_out_of_range_odds_excluded() {
        let now = Utc::now();
        let quotes = vec![
            make_quote("ev1", MarketType::Total, "Over", "a", 1.0, Duration::hours(2)),
            make_quote("ev1", MarketType::Total, "Under", "a", 1500.0, Duration::hours(2)),
        ];
        let (picks, summary) = scanner(0.0).scan(&quotes, now);
        assert!(picks.is_empty());
        assert_eq!(summary.odds_out_of_range, 2);
    }

    #[test]
    fn test_started_and_far_events_skipped() {
        let now = Utc::now();
        let mut quotes = h2h("started", 3.0, 3.0, Duration::minutes(-5));
        quotes.extend(h2h("far", 3.0, 3.0, Duration::hours(30)));
        let (picks, summary) = scanner(0.0).scan(&quotes, now);
        assert!(picks.is_empty());
        assert_eq!(summary.out_of_window, 4);
    }

    #[test]
    fn test_duplicate_quote_keeps_most_recent() {
        let now = Utc::now();
        let mut quotes = h2h("ev1", 2.0, 2.0, Duration::hours(2));
        let mut stale = make_quote("ev1", MarketType::Head2Head, "Home", "soft", 3.0, Duration::hours(2));
        stale.observed_at = now - Duration::minutes(10);
        let fresh = make_quote("ev1", MarketType::Head2Head, "Home", "soft", 2.2, Duration::hours(2));
        quotes.push(fresh);
        quotes.push(stale);

        let (picks, summary) = scanner(0.05).scan(&quotes, now);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(picks.len(), 1);
        assert!((picks[0].odds - 2.2).abs() < 1e-10);
    }

    #[test]
    fn test_incomplete_soccer_market_excluded() {
        let now = Utc::now();
        let mut quotes = h2h("ev1", 2.5, 2.8, Duration::hours(2));
        for q in &mut quotes {
            q.sport = "soccer_epl".into();
        }
        let (picks, summary) = scanner(0.0).scan(&quotes, now);
        assert!(picks.is_empty());
        assert_eq!(summary.missing_side, 1);
    }

    #[test]
    fn test_single_side_uses_heuristic() {
        let now = Utc::now();
        let quotes = vec![make_quote("ev1", MarketType::Spread, "Home", "a", 2.5, Duration::hours(2))];
        // p = 0.4 + 0.1 × 0.1 = 0.41 ⇒ value = 0.41 × 2.5 − 1 = 0.025
        let (picks, _) = scanner(0.02).scan(&quotes, now);
        assert_eq!(picks.len(), 1);
        assert!((picks[0].probability - 0.41).abs() < 1e-10);
        assert!((picks[0].value - 0.025).abs() < 1e-10);
    }

    #[test]
    fn test_opposite_spreads_are_separate_markets() {
        let now = Utc::now();
        let spread = |selection: &str, point: f64, bookmaker: &str, odds: f64| {
            let mut q = make_quote("ev1", MarketType::Spread, selection, bookmaker, odds, Duration::hours(2));
            q.point = Some(point);
            q
        };
        let quotes = vec![
            spread("Home", -1.5, "a", 2.30),
            spread("Away", 1.5, "a", 1.65),
            spread("Home", 1.5, "b", 1.60),
            spread("Away", -1.5, "b", 2.35),
        ];

        let (picks, summary) = scanner(0.0).scan(&quotes, now);
        assert_eq!(summary.markets, 2);
        // Each line is fairly priced on its own book.
        assert!(picks.is_empty(), "unexpected picks: {picks:?}");
    }

    #[test]
    fn test_max_candidates_truncates() {
        let now = Utc::now();
        let quotes: Vec<_> = (0..5)
            .map(|i| make_quote(&format!("ev{i}"), MarketType::Total, "Over", "a", 4.0, Duration::hours(2)))
            .collect();
        let s = ValueScanner::new(ScannerConfig {
            min_edge: 0.0,
            max_candidates_per_cycle: Some(2),
            ..Default::default()
        });
        let (picks, summary) = s.scan(&quotes, now);
        assert_eq!(picks.len(), 2);
        assert_eq!(summary.candidates, 2);
    }

    #[test]
    fn test_odds_window_narrows_candidates() {
        let now = Utc::now();
        let quotes = vec![make_quote("ev1", MarketType::Total, "Over", "a", 8.0, Duration::hours(2))];
        let s = ValueScanner::new(ScannerConfig {
            min_edge: 0.0,
            max_odds: 5.0,
            ..Default::default()
        });
        assert!(s.scan(&quotes, now).0.is_empty());
    }

    #[test]
    fn test_sport_threshold_overrides_min_edge() {
        let now = Utc::now();
        // Fair Home probability 0.5, soft price 2.24 ⇒ value 0.12.
        let mut quotes = h2h("ev1", 2.0, 2.0, Duration::hours(2));
        quotes.push(make_quote("ev1", MarketType::Head2Head, "Home", "soft", 2.24, Duration::hours(2)));

        let mut config = ScannerConfig {
            min_edge: 0.05,
            ..Default::default()
        };
        config.sport_thresholds.insert("basketball".into(), 0.15);
        assert!(ValueScanner::new(config.clone()).scan(&quotes, now).0.is_empty());

        // A longer prefix is more specific.
        config.sport_thresholds.insert("basketball_nba".into(), 0.10);
        assert_eq!(ValueScanner::new(config.clone()).scan(&quotes, now).0.len(), 1);

        assert!((config.min_edge_for("basketball_euroleague") - 0.15).abs() < 1e-12);
        assert!((config.min_edge_for("icehockey_nhl") - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_min_probability_filters_longshots() {
        let now = Utc::now();
        // Away is modeled at 0.25 and priced well above fair.
        let mut quotes = h2h("ev1", 1.3333333333333333, 4.0, Duration::hours(2));
        quotes.push(make_quote("ev1", MarketType::Head2Head, "Away", "soft", 5.0, Duration::hours(2)));

        let s = ValueScanner::new(ScannerConfig {
            min_edge: 0.05,
            min_probability: 0.5,
            ..Default::default()
        });
        let (picks, summary) = s.scan(&quotes, now);
        assert!(picks.is_empty());
        assert_eq!(summary.below_probability, 1);

        assert_eq!(scanner(0.05).scan(&quotes, now).0.len(), 1);
    }

    #[test]
    fn test_summary_merge() {
        let mut a = ScanSummary { quotes_in: 2, candidates: 1, ..Default::default() };
        let b = ScanSummary { quotes_in: 3, duplicates: 1, ..Default::default() };
        a.merge(&b);
        assert_eq!(a.quotes_in, 5);
        assert_eq!(a.duplicates, 1);
        assert_eq!(a.candidates, 1);
    }
}
