//! Weekly fee tier table.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::bankroll::SubscriptionTier;

/// Fee rate applied to weekly profit at or above `min_profit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_profit: Decimal,
    pub rate: Decimal,
}

/// Tier table, kept sorted by `min_profit` however it was listed. The
/// highest tier whose `min_profit` does not exceed the week's profit
/// applies to the whole profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<FeeTier>", into = "Vec<FeeTier>")]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
}

impl From<Vec<FeeTier>> for FeeSchedule {
    fn from(tiers: Vec<FeeTier>) -> Self {
        Self::new(tiers)
    }
}

impl From<FeeSchedule> for Vec<FeeTier> {
    fn from(schedule: FeeSchedule) -> Self {
        schedule.tiers
    }
}

impl FeeSchedule {
    pub fn new(mut tiers: Vec<FeeTier>) -> Self {
        tiers.sort_by(|a, b| a.min_profit.cmp(&b.min_profit));
        Self { tiers }
    }

    /// A single rate applied to any positive profit.
    pub fn flat(rate: Decimal) -> Self {
        Self::new(vec![FeeTier {
            min_profit: Decimal::ZERO,
            rate,
        }])
    }

    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// Fee owed on `weekly_profit`. Zero for non-positive profit and for
    /// free-tier users.
    pub fn fee_for(&self, weekly_profit: Decimal, tier: SubscriptionTier) -> Decimal {
        if weekly_profit <= Decimal::ZERO || tier == SubscriptionTier::Free {
            return Decimal::ZERO;
        }
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_profit <= weekly_profit)
            .map(|t| (weekly_profit * t.rate).round_dp(2))
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::flat(dec!(0.20))
    }
}
