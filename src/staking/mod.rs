//! Staking engine: per-user bankrolls, weekly fees, stake sizing.
//!
//! Each user's state lives behind its own map entry, so a settlement for
//! one user never waits on another. Operations on the same user are
//! serialized by the entry lock.
//!
//! Alerts go to premium users only, up to `max_daily_alerts` per alert
//! day. The alert day starts at `alert_reset_hour_utc`.

pub mod bankroll;
pub mod fees;

pub use bankroll::{
    BetOutcome, BetRecord, BetSettlement, RolloverSummary, SubscriptionTier, UserBankrollState,
    UserStats, WeekState,
};
pub use fees::{FeeSchedule, FeeTier};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::strategy::kelly::{KellyCalculator, KellyConfig};
use crate::types::CandidatePick;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    pub default_bankroll: Decimal,
    /// Value the dynamic bank starts from and is reset to every week.
    pub dynamic_bank_baseline: Decimal,
    #[serde(flatten)]
    pub kelly: KellyConfig,
    pub fee_tiers: FeeSchedule,
    pub max_daily_alerts: u32,
    pub alert_reset_hour_utc: u32,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            default_bankroll: dec!(1000),
            dynamic_bank_baseline: dec!(1000),
            kelly: KellyConfig::default(),
            fee_tiers: FeeSchedule::default(),
            max_daily_alerts: 5,
            alert_reset_hour_utc: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StakingError {
    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("stake must be positive, got {0}")]
    InvalidStake(Decimal),

    #[error("odds {0} outside valid range")]
    InvalidOdds(Decimal),

    #[error("no weekly fee due for {user_id} (state {state:?})")]
    FeeNotDue { user_id: String, state: WeekState },

    #[error("amount overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct StakingEngine {
    config: StakingConfig,
    kelly: KellyCalculator,
    users: DashMap<String, UserBankrollState>,
}

impl StakingEngine {
    pub fn new(config: StakingConfig) -> Self {
        let kelly = KellyCalculator::new(config.kelly.clone());
        Self {
            config,
            kelly,
            users: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    /// Register a user, or return the existing state unchanged.
    pub fn register(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        bankroll: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> UserBankrollState {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let mut user = UserBankrollState::new(
                    user_id,
                    tier,
                    bankroll.unwrap_or(self.config.default_bankroll),
                    now,
                );
                user.dynamic_bank = self.config.dynamic_bank_baseline;
                user.alerts_day = self.alert_day(now);
                user
            })
            .value()
            .clone()
    }

    /// Load persisted users, replacing any in-memory state.
    pub fn restore(&self, users: Vec<UserBankrollState>) -> usize {
        let n = users.len();
        for user in users {
            self.users.insert(user.user_id.clone(), user);
        }
        n
    }

    pub fn get(&self, user_id: &str) -> Option<UserBankrollState> {
        self.users.get(user_id).map(|u| u.value().clone())
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.users.iter().map(|u| u.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Settle a bet for `user_id`. Returns the updated state.
    pub fn settle(
        &self,
        user_id: &str,
        bet: BetSettlement,
        now: DateTime<Utc>,
    ) -> Result<UserBankrollState, StakingError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StakingError::UnknownUser(user_id.to_string()))?;
        user.settle(bet, now)?;
        Ok(user.clone())
    }

    pub fn pay_fee(&self, user_id: &str) -> Result<UserBankrollState, StakingError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StakingError::UnknownUser(user_id.to_string()))?;
        user.pay_fee()?;
        Ok(user.clone())
    }

    /// Roll every user whose week has ended. Returns the updated states.
    pub fn rollover_all(&self, now: DateTime<Utc>) -> Vec<(UserBankrollState, RolloverSummary)> {
        let mut rolled = Vec::new();
        for mut user in self.users.iter_mut() {
            if let Some(summary) =
                user.rollover(now, &self.config.fee_tiers, self.config.dynamic_bank_baseline)
            {
                rolled.push((user.clone(), summary));
            }
        }
        rolled
    }

    /// Alert day containing `now`.
    pub fn alert_day(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - Duration::hours(i64::from(self.config.alert_reset_hour_utc.min(23)))).date_naive()
    }

    pub fn remaining_alerts(&self, user_id: &str, now: DateTime<Utc>) -> Result<u32, StakingError> {
        let user = self
            .users
            .get(user_id)
            .ok_or_else(|| StakingError::UnknownUser(user_id.to_string()))?;
        Ok(user.remaining_alerts(self.alert_day(now), self.config.max_daily_alerts))
    }

    /// Take one alert slot from every premium user with quota left today.
    /// Returns the recipients' updated states.
    pub fn reserve_alert_recipients(&self, now: DateTime<Utc>) -> Vec<UserBankrollState> {
        let day = self.alert_day(now);
        let mut recipients = Vec::new();
        for mut user in self.users.iter_mut() {
            if user.reserve_alert(day, self.config.max_daily_alerts) {
                recipients.push(user.clone());
            }
        }
        recipients.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        recipients
    }

    /// Recommended stake for `pick` from the user's dynamic bank. Zero for
    /// free-tier users and for picks without a positive Kelly edge.
    pub fn recommend_stake(&self, user_id: &str, pick: &CandidatePick) -> Result<Decimal, StakingError> {
        let user = self
            .users
            .get(user_id)
            .ok_or_else(|| StakingError::UnknownUser(user_id.to_string()))?;
        if user.tier == SubscriptionTier::Free {
            return Ok(Decimal::ZERO);
        }
        Ok(self
            .kelly
            .size_stake(pick.probability, pick.odds, user.dynamic_bank)
            .map(|rec| rec.stake)
            .unwrap_or(Decimal::ZERO))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
