//! Per-user bankroll and weekly fee state machine.
//!
//! ```text
//!   WeekOpen ──rollover(fee > 0)──▶ WeekClosedPendingFee ──pay_fee──▶ FeePaid
//!      ▲  └──rollover(fee = 0)──┐                                        │
//!      └────────────────────────┴──────────────rollover──────────────────┘
//! ```
//!
//! Settlement is accepted in every state. Weeks start Monday 00:00 UTC.
//! Each rollover also resets the dynamic bank to the configured baseline.
//!
//! Premium users additionally carry a daily alert quota.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

use super::fees::FeeSchedule;
use super::StakingError;
use crate::types::{MAX_VALID_ODDS, MIN_VALID_ODDS};

/// Settled bets kept per user.
pub const BET_HISTORY_CAPACITY: usize = 100;

/// Start of the week containing `now` (Monday 00:00 UTC).
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now.date_naive() - Duration::days(days_since_monday);
    monday.and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekState {
    WeekOpen,
    WeekClosedPendingFee,
    FeePaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetOutcome {
    Won,
    Lost,
}

/// A bet to settle against a user's bankroll.
#[derive(Debug, Clone)]
pub struct BetSettlement {
    pub event: String,
    pub selection: String,
    pub stake: Decimal,
    pub odds: Decimal,
    pub outcome: BetOutcome,
}

/// One settled bet in the user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub event: String,
    pub selection: String,
    pub stake: Decimal,
    pub odds: Decimal,
    pub outcome: BetOutcome,
    pub profit: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// What a weekly rollover did.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloverSummary {
    pub week_profit: Decimal,
    pub fee_due: Decimal,
    pub state: WeekState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total_bets: u32,
    pub won_bets: u32,
    pub lost_bets: u32,
    pub win_rate: f64,
    pub total_profit: Decimal,
    /// Total profit relative to the initial bankroll, in percent.
    pub roi: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBankrollState {
    pub user_id: String,
    pub tier: SubscriptionTier,
    pub bankroll: Decimal,
    /// Fixed baseline for cumulative ROI.
    pub initial_bankroll: Decimal,
    /// Stake-sizing baseline, reset every week.
    pub dynamic_bank: Decimal,
    pub week_start_bank: Decimal,
    pub week_start: DateTime<Utc>,
    pub weekly_profit: Decimal,
    pub weekly_fee_due: Decimal,
    pub weekly_fee_paid: bool,
    pub state: WeekState,
    pub total_profit: Decimal,
    pub won_bets: u32,
    pub lost_bets: u32,
    pub bet_history: VecDeque<BetRecord>,
    pub alerts_sent_today: u32,
    /// Alert day the counter belongs to.
    pub alerts_day: NaiveDate,
}

impl UserBankrollState {
    pub fn new(user_id: impl Into<String>, tier: SubscriptionTier, bankroll: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
            bankroll,
            initial_bankroll: bankroll,
            dynamic_bank: bankroll,
            week_start_bank: bankroll,
            week_start: week_start(now),
            weekly_profit: Decimal::ZERO,
            weekly_fee_due: Decimal::ZERO,
            weekly_fee_paid: false,
            state: WeekState::WeekOpen,
            total_profit: Decimal::ZERO,
            won_bets: 0,
            lost_bets: 0,
            bet_history: VecDeque::with_capacity(BET_HISTORY_CAPACITY),
            alerts_sent_today: 0,
            alerts_day: now.date_naive(),
        }
    }

    /// Apply a settled bet. Returns the profit (negative on a loss).
    pub fn settle(&mut self, bet: BetSettlement, now: DateTime<Utc>) -> Result<Decimal, StakingError> {
        if bet.stake <= Decimal::ZERO {
            return Err(StakingError::InvalidStake(bet.stake));
        }
        let min = Decimal::try_from(MIN_VALID_ODDS).unwrap_or(Decimal::ONE);
        let max = Decimal::try_from(MAX_VALID_ODDS).unwrap_or(Decimal::MAX);
        if bet.odds < min || bet.odds > max {
            return Err(StakingError::InvalidOdds(bet.odds));
        }

        let profit = match bet.outcome {
            BetOutcome::Won => bet.stake.checked_mul(bet.odds - Decimal::ONE),
            BetOutcome::Lost => Some(-bet.stake),
        }
        .ok_or(StakingError::Overflow)?;

        let bankroll = self.bankroll.checked_add(profit).ok_or(StakingError::Overflow)?;
        let dynamic_bank = self.dynamic_bank.checked_add(profit).ok_or(StakingError::Overflow)?;
        let weekly_profit = self.weekly_profit.checked_add(profit).ok_or(StakingError::Overflow)?;
        let total_profit = self.total_profit.checked_add(profit).ok_or(StakingError::Overflow)?;

        match bet.outcome {
            BetOutcome::Won => self.won_bets += 1,
            BetOutcome::Lost => self.lost_bets += 1,
        }
        self.bankroll = bankroll;
        self.dynamic_bank = dynamic_bank;
        self.weekly_profit = weekly_profit;
        self.total_profit = total_profit;

        self.bet_history.push_back(BetRecord {
            event: bet.event,
            selection: bet.selection,
            stake: bet.stake,
            odds: bet.odds,
            outcome: bet.outcome,
            profit,
            settled_at: now,
        });
        while self.bet_history.len() > BET_HISTORY_CAPACITY {
            self.bet_history.pop_front();
        }

        Ok(profit)
    }

    /// Whether `now` lies in a later week than the current one.
    pub fn rollover_due(&self, now: DateTime<Utc>) -> bool {
        week_start(now) > self.week_start
    }

    /// Close the current week if a boundary has passed. Skipped weeks
    /// collapse into a single rollover aligned to the current week.
    /// An unpaid fee from the previous week carries forward, and the
    /// dynamic bank restarts from `dynamic_bank_baseline`.
    pub fn rollover(
        &mut self,
        now: DateTime<Utc>,
        fees: &FeeSchedule,
        dynamic_bank_baseline: Decimal,
    ) -> Option<RolloverSummary> {
        if !self.rollover_due(now) {
            return None;
        }

        let week_profit = self.weekly_profit;
        let carried = if self.state == WeekState::WeekClosedPendingFee {
            self.weekly_fee_due
        } else {
            Decimal::ZERO
        };

        self.weekly_fee_due = carried + fees.fee_for(week_profit, self.tier);
        self.weekly_fee_paid = false;
        self.week_start_bank = self.dynamic_bank;
        self.dynamic_bank = dynamic_bank_baseline;
        self.weekly_profit = Decimal::ZERO;
        self.week_start = week_start(now);
        self.state = if self.weekly_fee_due > Decimal::ZERO {
            WeekState::WeekClosedPendingFee
        } else {
            WeekState::WeekOpen
        };

        info!(
            user_id = %self.user_id,
            week_profit = %week_profit,
            fee_due = %self.weekly_fee_due,
            state = ?self.state,
            "Weekly rollover"
        );

        Some(RolloverSummary {
            week_profit,
            fee_due: self.weekly_fee_due,
            state: self.state,
        })
    }

    /// Mark the outstanding weekly fee as paid. The fee is collected
    /// outside the bankroll, so no balance changes.
    pub fn pay_fee(&mut self) -> Result<Decimal, StakingError> {
        if self.state != WeekState::WeekClosedPendingFee {
            return Err(StakingError::FeeNotDue {
                user_id: self.user_id.clone(),
                state: self.state,
            });
        }
        self.weekly_fee_paid = true;
        self.state = WeekState::FeePaid;
        Ok(self.weekly_fee_due)
    }

    /// Alerts the user can still receive on `day`. Free-tier users
    /// receive none.
    pub fn remaining_alerts(&self, day: NaiveDate, max_daily: u32) -> u32 {
        match self.tier {
            SubscriptionTier::Free => 0,
            SubscriptionTier::Premium if day != self.alerts_day => max_daily,
            SubscriptionTier::Premium => max_daily.saturating_sub(self.alerts_sent_today),
        }
    }

    /// Count one alert against the quota for `day`. Returns `false` when
    /// nothing is left.
    pub fn reserve_alert(&mut self, day: NaiveDate, max_daily: u32) -> bool {
        if self.remaining_alerts(day, max_daily) == 0 {
            return false;
        }
        if day != self.alerts_day {
            self.alerts_day = day;
            self.alerts_sent_today = 0;
        }
        self.alerts_sent_today += 1;
        true
    }

    pub fn stats(&self) -> UserStats {
        let total_bets = self.won_bets + self.lost_bets;
        let win_rate = if total_bets > 0 {
            self.won_bets as f64 / total_bets as f64
        } else {
            0.0
        };
        let roi = if self.initial_bankroll > Decimal::ZERO {
            (self.total_profit / self.initial_bankroll * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };
        UserStats {
            total_bets,
            won_bets: self.won_bets,
            lost_bets: self.lost_bets,
            win_rate,
            total_profit: self.total_profit,
            roi,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
