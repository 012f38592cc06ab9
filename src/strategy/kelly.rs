//! Kelly criterion stake sizing.
//!
//! Computes a recommended stake from modeled probability and decimal odds
//! using fractional Kelly, a cap relative to the bank and a minimum stake.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
    /// Maximum stake as a fraction of the bank.
    pub max_stake_pct: f64,
    /// Smallest stake worth recommending.
    pub min_stake: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            max_stake_pct: 0.10,
            min_stake: dec!(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

/// Sized stake recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeRecommendation {
    /// Raw Kelly fraction.
    pub kelly: f64,
    /// After multiplier and cap.
    pub stake_fraction: f64,
    pub stake: Decimal,
}

pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Raw Kelly fraction for decimal odds: `(p·o − 1) / (o − 1)`.
    pub fn kelly_fraction(probability: f64, odds: f64) -> f64 {
        if odds <= 1.0 {
            return 0.0;
        }
        (probability * odds - 1.0) / (odds - 1.0)
    }

    /// Size a stake against `bank`. Returns `None` when the edge is not
    /// positive or the bank is empty.
    pub fn size_stake(&self, probability: f64, odds: f64, bank: Decimal) -> Option<StakeRecommendation> {
        if bank <= Decimal::ZERO {
            return None;
        }

        let kelly = Self::kelly_fraction(probability, odds);
        if kelly <= 0.0 {
            debug!(probability, odds, kelly, "Negative Kelly, no stake");
            return None;
        }

        let stake_fraction = (kelly * self.config.kelly_fraction).min(self.config.max_stake_pct);
        let raw = Decimal::from_f64(stake_fraction).unwrap_or_default() * bank;
        let stake = raw.max(self.config.min_stake).min(bank).round_dp(2);

        debug!(
            raw_kelly = format!("{:.2}%", kelly * 100.0),
            fractional = format!("{:.2}%", stake_fraction * 100.0),
            stake = %stake,
            "Stake sized"
        );

        Some(StakeRecommendation {
            kelly,
            stake_fraction,
            stake,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
