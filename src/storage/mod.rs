//! Persistence layer.
//!
//! The `Store` trait is the boundary to the relational store. The scan
//! engine never writes to it directly: writes are queued in an `Outbox`
//! and flushed after each cycle, so a slow or failing database can't hold
//! up alert delivery. Failed writes stay queued in order and are retried
//! on the next flush.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::clv::ClvRecord;
use crate::staking::UserBankrollState;
use crate::types::{CandidatePick, MarketType, PersistenceError};

/// Outcome of a prediction, filled in by an external settlement pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub event_id: String,
    pub market: MarketType,
    pub selection: String,
    pub actual_result: String,
    pub correct: bool,
    pub profit_loss: Decimal,
    pub verified_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_user(&self, user: &UserBankrollState) -> Result<(), PersistenceError>;

    async fn load_users(&self) -> Result<Vec<UserBankrollState>, PersistenceError>;

    async fn insert_prediction(&self, pick: &CandidatePick) -> Result<(), PersistenceError>;

    async fn record_verification(&self, verification: &Verification) -> Result<(), PersistenceError>;

    /// Insert a CLV record. A second insert for the same (event, selection)
    /// is ignored.
    async fn open_clv(&self, record: &ClvRecord) -> Result<(), PersistenceError>;

    async fn close_clv(&self, record: &ClvRecord) -> Result<(), PersistenceError>;

    /// CLV records still waiting for a closing price.
    async fn load_open_clv(&self) -> Result<Vec<ClvRecord>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// A queued write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertUser(UserBankrollState),
    InsertPrediction(CandidatePick),
    OpenClv(ClvRecord),
    CloseClv(ClvRecord),
}

impl WriteOp {
    fn kind(&self) -> &'static str {
        match self {
            WriteOp::UpsertUser(_) => "upsert_user",
            WriteOp::InsertPrediction(_) => "insert_prediction",
            WriteOp::OpenClv(_) => "open_clv",
            WriteOp::CloseClv(_) => "close_clv",
        }
    }

    async fn apply(&self, store: &dyn Store) -> Result<(), PersistenceError> {
        match self {
            WriteOp::UpsertUser(user) => store.upsert_user(user).await,
            WriteOp::InsertPrediction(pick) => store.insert_prediction(pick).await,
            WriteOp::OpenClv(record) => store.open_clv(record).await,
            WriteOp::CloseClv(record) => store.close_clv(record).await,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: bool,
    pub pending: usize,
    pub dropped: usize,
}

/// In-memory FIFO of pending writes.
pub struct Outbox {
    queue: Mutex<VecDeque<WriteOp>>,
    max_pending: usize,
    dropped: std::sync::atomic::AtomicUsize,
}

impl Outbox {
    pub fn new(max_pending: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_pending: max_pending.max(1),
            dropped: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Queue a write. When the queue is full the oldest write is dropped.
    pub fn enqueue(&self, op: WriteOp) {
        let mut queue = match self.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.push_back(op);
        while queue.len() > self.max_pending {
            if let Some(old) = queue.pop_front() {
                warn!(kind = old.kind(), "Outbox full, dropping oldest write");
                self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_all(&self) -> VecDeque<WriteOp> {
        let mut queue = match self.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *queue)
    }

    fn requeue_front(&self, mut remaining: VecDeque<WriteOp>) {
        let mut queue = match self.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Writes queued during the flush go after the retried ones.
        remaining.extend(queue.drain(..));
        *queue = remaining;
    }

    /// Write queued operations in order. Stops at the first failure and
    /// keeps that write and everything after it for the next flush.
    pub async fn flush(&self, store: &dyn Store) -> FlushReport {
        let mut pending = self.take_all();
        let mut report = FlushReport {
            dropped: self.dropped.swap(0, std::sync::atomic::Ordering::Relaxed),
            ..Default::default()
        };

        while let Some(op) = pending.pop_front() {
            match op.apply(store).await {
                Ok(()) => report.written += 1,
                Err(err) => {
                    warn!(kind = op.kind(), %err, "Store write failed, will retry");
                    pending.push_front(op);
                    report.failed = true;
                    break;
                }
            }
        }

        if !pending.is_empty() {
            self.requeue_front(pending);
        }
        report.pending = self.len();
        debug!(written = report.written, pending = report.pending, "Outbox flushed");
        report
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(10_000)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
