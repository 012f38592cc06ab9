//! Win-probability model.
//!
//! Converts bookmaker prices into a modeled probability per selection.
//! When every side of a market is priced, implied probabilities are
//! normalized so they sum to 1 (removing the bookmaker margin). When only
//! one side is visible, the implied probability is pulled toward 50% by an
//! offset that grows with the market's variance class.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DataError, MarketQuote, VarianceClass};

/// Smallest distance from 0 or 1 a modeled probability may take.
const PROBABILITY_FLOOR: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Heuristic offsets toward 50% applied to single-sided markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityConfig {
    /// Full-game markets.
    pub single_side_offset: f64,
    /// Quarter and half markets.
    pub period_offset: f64,
    /// Player props.
    pub player_prop_offset: f64,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            single_side_offset: 0.10,
            period_offset: 0.20,
            player_prop_offset: 0.25,
        }
    }
}

impl ProbabilityConfig {
    pub fn offset_for(&self, class: VarianceClass) -> f64 {
        let offset = match class {
            VarianceClass::FullGame => self.single_side_offset,
            VarianceClass::SubPeriod => self.period_offset,
            VarianceClass::PlayerProp => self.player_prop_offset,
        };
        offset.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// How a market's probabilities were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Mean of per-bookmaker de-vigged probabilities.
    BookDevig { books: usize },
    /// De-vig of the best price per side, taken across bookmakers.
    CrossBookDevig,
    /// One visible side; heuristic offset toward 50%.
    SingleSide,
}

/// Modeled probabilities for every priced selection of one market.
#[derive(Debug, Clone)]
pub struct MarketEstimate {
    pub probabilities: BTreeMap<String, f64>,
    pub derivation: Derivation,
}

pub struct ProbabilityModel {
    config: ProbabilityConfig,
}

impl ProbabilityModel {
    pub fn new(config: ProbabilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbabilityConfig {
        &self.config
    }

    /// Normalize implied probabilities so they sum to 1.
    pub fn devig(implied: &[f64]) -> Vec<f64> {
        let total: f64 = implied.iter().sum();
        if total <= 0.0 {
            return vec![0.0; implied.len()];
        }
        implied.iter().map(|p| clamp_open(p / total)).collect()
    }

    /// Single-sided estimate: `implied + offset × (0.5 − implied)`.
    pub fn single_side(&self, implied: f64, class: VarianceClass) -> f64 {
        let offset = self.config.offset_for(class);
        clamp_open(implied + offset * (0.5 - implied))
    }

    /// Estimate probabilities for one market (one event, market type and
    /// line). Quotes must already be validated and deduplicated.
    pub fn estimate(
        &self,
        quotes: &[MarketQuote],
        required_sides: usize,
    ) -> Result<MarketEstimate, DataError> {
        let Some(first) = quotes.first() else {
            return Err(DataError::MissingSide {
                event_id: String::new(),
                market: String::new(),
                seen: 0,
                required: required_sides,
            });
        };

        // bookmaker -> selection -> implied probability
        let mut books: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
        for q in quotes {
            books
                .entry(q.bookmaker.as_str())
                .or_default()
                .insert(q.selection.as_str(), q.implied_probability());
        }

        let complete: Vec<_> = books
            .values()
            .filter(|sides| sides.len() >= required_sides)
            .collect();

        if !complete.is_empty() {
            let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for sides in &complete {
                let implied: Vec<f64> = sides.values().copied().collect();
                for (selection, p) in sides.keys().zip(Self::devig(&implied)) {
                    let entry = sums.entry(selection.to_string()).or_insert((0.0, 0));
                    entry.0 += p;
                    entry.1 += 1;
                }
            }
            let probabilities = sums
                .into_iter()
                .map(|(selection, (sum, n))| (selection, clamp_open(sum / n as f64)))
                .collect();
            return Ok(MarketEstimate {
                probabilities,
                derivation: Derivation::BookDevig {
                    books: complete.len(),
                },
            });
        }

        // No single book prices every side: fall back to the best price per
        // selection across all books.
        let mut best: BTreeMap<&str, f64> = BTreeMap::new();
        for sides in books.values() {
            for (&selection, &implied) in sides {
                let slot = best.entry(selection).or_insert(implied);
                if implied < *slot {
                    *slot = implied;
                }
            }
        }
        let visible: BTreeSet<&str> = best.keys().copied().collect();

        if visible.len() >= required_sides {
            let implied: Vec<f64> = best.values().copied().collect();
            let probabilities = best
                .keys()
                .map(|s| s.to_string())
                .zip(Self::devig(&implied))
                .collect();
            return Ok(MarketEstimate {
                probabilities,
                derivation: Derivation::CrossBookDevig,
            });
        }

        if let (1, Some(&selection)) = (visible.len(), visible.iter().next()) {
            // Average the lone side's implied probability across books.
            let implied: Vec<f64> = books
                .values()
                .filter_map(|sides| sides.get(selection))
                .copied()
                .collect();
            let mean = implied.iter().sum::<f64>() / implied.len().max(1) as f64;
            let mut probabilities = BTreeMap::new();
            probabilities.insert(
                selection.to_string(),
                self.single_side(mean, first.market.variance_class()),
            );
            return Ok(MarketEstimate {
                probabilities,
                derivation: Derivation::SingleSide,
            });
        }

        Err(DataError::MissingSide {
            event_id: first.event_id.clone(),
            market: first.market.key(),
            seen: visible.len(),
            required: required_sides,
        })
    }
}

fn clamp_open(p: f64) -> f64 {
    p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
