//! SQLite implementation of [`Store`].
//!
//! Timestamps are stored as RFC 3339 text and money as decimal text so no
//! precision is lost. Bet history is kept as a JSON array on the user row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::{Store, Verification};
use crate::clv::ClvRecord;
use crate::staking::UserBankrollState;
use crate::types::{CandidatePick, MarketType, PersistenceError};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        user_id          TEXT PRIMARY KEY,
        tier             TEXT NOT NULL,
        bankroll         TEXT NOT NULL,
        initial_bankroll TEXT NOT NULL,
        dynamic_bank     TEXT NOT NULL,
        week_start_bank  TEXT NOT NULL,
        week_start       TEXT NOT NULL,
        weekly_profit    TEXT NOT NULL,
        weekly_fee_due   TEXT NOT NULL,
        weekly_fee_paid  INTEGER NOT NULL,
        state            TEXT NOT NULL,
        total_profit     TEXT NOT NULL,
        won_bets         INTEGER NOT NULL,
        lost_bets        INTEGER NOT NULL,
        bet_history      TEXT NOT NULL,
        alerts_sent_today INTEGER NOT NULL,
        alerts_day       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS predictions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id      TEXT NOT NULL,
        sport         TEXT NOT NULL,
        market        TEXT NOT NULL,
        selection     TEXT NOT NULL,
        point         REAL,
        bookmaker     TEXT NOT NULL,
        odds          REAL NOT NULL,
        probability   REAL NOT NULL,
        value         REAL NOT NULL,
        event_start   TEXT NOT NULL,
        created_at    TEXT NOT NULL,
        actual_result TEXT,
        correct       INTEGER,
        profit_loss   TEXT,
        verified_at   TEXT,
        UNIQUE(event_id, market, selection)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS clv_tracking (
        event_id     TEXT NOT NULL,
        selection    TEXT NOT NULL,
        sport        TEXT NOT NULL,
        market       TEXT NOT NULL,
        point        REAL,
        event_start  TEXT NOT NULL,
        opening_odds REAL NOT NULL,
        opened_at    TEXT NOT NULL,
        closing_odds REAL,
        closed_at    TEXT,
        clv          REAL,
        UNIQUE(event_id, selection)
    )
    ",
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create tables if needed.
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(database_url, "SQLite store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Verification columns for a stored prediction, if it exists.
    pub async fn prediction_verification(
        &self,
        event_id: &str,
        market: MarketType,
        selection: &str,
    ) -> Result<Option<(Option<String>, Option<bool>)>, PersistenceError> {
        let row = sqlx::query(
            "SELECT actual_result, correct FROM predictions WHERE event_id = ?1 AND market = ?2 AND selection = ?3",
        )
        .bind(event_id)
        .bind(market.key())
        .bind(selection)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<_, PersistenceError> {
            let result: Option<String> = r.try_get("actual_result")?;
            let correct: Option<i64> = r.try_get("correct")?;
            Ok((result, correct.map(|c| c != 0)))
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn malformed(what: &str, detail: impl std::fmt::Display) -> PersistenceError {
    PersistenceError(format!("malformed {what}: {detail}"))
}

fn encode_enum<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn decode_enum<T: DeserializeOwned>(raw: String) -> Result<T, PersistenceError> {
    serde_json::from_value(serde_json::Value::String(raw.clone())).map_err(|e| malformed(&raw, e))
}

fn decode_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, PersistenceError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| malformed(column, e))
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed("timestamp", e))
}

fn decode_time_col(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, PersistenceError> {
    let raw: String = row.try_get(column)?;
    decode_time(&raw)
}

fn decode_user(row: &SqliteRow) -> Result<UserBankrollState, PersistenceError> {
    let history: String = row.try_get("bet_history")?;
    let alerts_day: String = row.try_get("alerts_day")?;
    Ok(UserBankrollState {
        user_id: row.try_get("user_id")?,
        tier: decode_enum(row.try_get("tier")?)?,
        bankroll: decode_decimal(row, "bankroll")?,
        initial_bankroll: decode_decimal(row, "initial_bankroll")?,
        dynamic_bank: decode_decimal(row, "dynamic_bank")?,
        week_start_bank: decode_decimal(row, "week_start_bank")?,
        week_start: decode_time_col(row, "week_start")?,
        weekly_profit: decode_decimal(row, "weekly_profit")?,
        weekly_fee_due: decode_decimal(row, "weekly_fee_due")?,
        weekly_fee_paid: row.try_get::<i64, _>("weekly_fee_paid")? != 0,
        state: decode_enum(row.try_get("state")?)?,
        total_profit: decode_decimal(row, "total_profit")?,
        won_bets: row.try_get::<i64, _>("won_bets")? as u32,
        lost_bets: row.try_get::<i64, _>("lost_bets")? as u32,
        bet_history: serde_json::from_str(&history).map_err(|e| malformed("bet_history", e))?,
        alerts_sent_today: row.try_get::<i64, _>("alerts_sent_today")? as u32,
        alerts_day: NaiveDate::from_str(&alerts_day).map_err(|e| malformed("alerts_day", e))?,
    })
}

fn decode_clv(row: &SqliteRow) -> Result<ClvRecord, PersistenceError> {
    let market: String = row.try_get("market")?;
    let closed_at: Option<String> = row.try_get("closed_at")?;
    Ok(ClvRecord {
        event_id: row.try_get("event_id")?,
        selection: row.try_get("selection")?,
        sport: row.try_get("sport")?,
        market: MarketType::from_str(&market).map_err(|e| malformed("market", e))?,
        point: row.try_get("point")?,
        event_start: decode_time_col(row, "event_start")?,
        opening_odds: row.try_get("opening_odds")?,
        opened_at: decode_time_col(row, "opened_at")?,
        closing_odds: row.try_get("closing_odds")?,
        closed_at: closed_at.as_deref().map(decode_time).transpose()?,
        clv: row.try_get("clv")?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_user(&self, user: &UserBankrollState) -> Result<(), PersistenceError> {
        let history = serde_json::to_string(&user.bet_history).map_err(|e| malformed("bet_history", e))?;

        sqlx::query(
            r"
            INSERT INTO users (
                user_id, tier, bankroll, initial_bankroll, dynamic_bank, week_start_bank,
                week_start, weekly_profit, weekly_fee_due, weekly_fee_paid, state,
                total_profit, won_bets, lost_bets, bet_history, alerts_sent_today,
                alerts_day, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(user_id) DO UPDATE SET
                tier = excluded.tier,
                bankroll = excluded.bankroll,
                initial_bankroll = excluded.initial_bankroll,
                dynamic_bank = excluded.dynamic_bank,
                week_start_bank = excluded.week_start_bank,
                week_start = excluded.week_start,
                weekly_profit = excluded.weekly_profit,
                weekly_fee_due = excluded.weekly_fee_due,
                weekly_fee_paid = excluded.weekly_fee_paid,
                state = excluded.state,
                total_profit = excluded.total_profit,
                won_bets = excluded.won_bets,
                lost_bets = excluded.lost_bets,
                bet_history = excluded.bet_history,
                alerts_sent_today = excluded.alerts_sent_today,
                alerts_day = excluded.alerts_day,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&user.user_id)
        .bind(encode_enum(&user.tier))
        .bind(user.bankroll.to_string())
        .bind(user.initial_bankroll.to_string())
        .bind(user.dynamic_bank.to_string())
        .bind(user.week_start_bank.to_string())
        .bind(user.week_start.to_rfc3339())
        .bind(user.weekly_profit.to_string())
        .bind(user.weekly_fee_due.to_string())
        .bind(user.weekly_fee_paid as i64)
        .bind(encode_enum(&user.state))
        .bind(user.total_profit.to_string())
        .bind(user.won_bets as i64)
        .bind(user.lost_bets as i64)
        .bind(history)
        .bind(user.alerts_sent_today as i64)
        .bind(user.alerts_day.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_users(&self) -> Result<Vec<UserBankrollState>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_user).collect()
    }

    async fn insert_prediction(&self, pick: &CandidatePick) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO predictions (
                event_id, sport, market, selection, point, bookmaker, odds,
                probability, value, event_start, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
        )
        .bind(&pick.event_id)
        .bind(&pick.sport)
        .bind(pick.market.key())
        .bind(&pick.selection)
        .bind(pick.point)
        .bind(&pick.bookmaker)
        .bind(pick.odds)
        .bind(pick.probability)
        .bind(pick.value)
        .bind(pick.event_start.to_rfc3339())
        .bind(pick.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_verification(&self, v: &Verification) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r"
            UPDATE predictions
            SET actual_result = ?1, correct = ?2, profit_loss = ?3, verified_at = ?4
            WHERE event_id = ?5 AND market = ?6 AND selection = ?7
            ",
        )
        .bind(&v.actual_result)
        .bind(v.correct as i64)
        .bind(v.profit_loss.to_string())
        .bind(v.verified_at.to_rfc3339())
        .bind(&v.event_id)
        .bind(v.market.key())
        .bind(&v.selection)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError(format!(
                "no prediction for {}/{}/{}",
                v.event_id, v.market, v.selection
            )));
        }
        Ok(())
    }

    async fn open_clv(&self, record: &ClvRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO clv_tracking (
                event_id, selection, sport, market, point, event_start, opening_odds, opened_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(&record.event_id)
        .bind(&record.selection)
        .bind(&record.sport)
        .bind(record.market.key())
        .bind(record.point)
        .bind(record.event_start.to_rfc3339())
        .bind(record.opening_odds)
        .bind(record.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close_clv(&self, record: &ClvRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            UPDATE clv_tracking
            SET closing_odds = ?1, closed_at = ?2, clv = ?3
            WHERE event_id = ?4 AND selection = ?5 AND closing_odds IS NULL
            ",
        )
        .bind(record.closing_odds)
        .bind(record.closed_at.map(|t| t.to_rfc3339()))
        .bind(record.clv)
        .bind(&record.event_id)
        .bind(&record.selection)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_open_clv(&self) -> Result<Vec<ClvRecord>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM clv_tracking WHERE closing_odds IS NULL")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_clv).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
