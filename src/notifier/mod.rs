//! Alert hand-off.
//!
//! The engine hands each newly deduplicated pick to a `Notifier` and moves
//! on. Hand-off is synchronous and never awaited; delivery to end users
//! happens elsewhere (a task draining a `ChannelNotifier`, for instance).
//! A failed hand-off is logged and the pick still counts as sent.

pub mod format;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::types::{AlertFingerprint, CandidatePick};

/// One formatted alert ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    /// Unique per hand-off, for tracing a delivery end to end.
    pub id: Uuid,
    pub fingerprint: AlertFingerprint,
    pub pick: CandidatePick,
    pub text: String,
    /// Users this alert counts against. `None` when the engine runs without
    /// a staking engine and delivery is not per user.
    pub recipients: Option<Vec<String>>,
}

impl AlertPayload {
    pub fn new(pick: CandidatePick) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: pick.fingerprint(),
            text: format::render_alert(&pick),
            pick,
            recipients: None,
        }
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = Some(recipients);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery queue full")]
    QueueFull,

    #[error("delivery channel closed")]
    Closed,
}

pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Hand `payload` off for delivery.
    fn notify(&self, payload: AlertPayload) -> Result<(), NotifyError>;
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, payload: AlertPayload) -> Result<(), NotifyError> {
        info!(
            alert_id = %payload.id,
            fingerprint = %payload.fingerprint,
            value = format!("{:+.1}%", payload.pick.value * 100.0),
            recipients = ?payload.recipients.as_ref().map(Vec::len),
            "ALERT\n{}",
            payload.text
        );
        Ok(())
    }
}

/// Forwards alerts over a bounded channel to a delivery task.
pub struct ChannelNotifier {
    tx: mpsc::Sender<AlertPayload>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AlertPayload>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    fn notify(&self, payload: AlertPayload) -> Result<(), NotifyError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketType;
    use chrono::{Duration, Utc};

    fn make_pick(event_id: &str) -> CandidatePick {
        CandidatePick {
            sport: "soccer_epl".into(),
            event_id: event_id.into(),
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            event_start: Utc::now() + Duration::hours(4),
            market: MarketType::Head2Head,
            selection: "Draw".into(),
            point: None,
            bookmaker: "bet365".into(),
            odds: 3.6,
            probability: 0.31,
            value: 0.116,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_carries_fingerprint_and_text() {
        let payload = AlertPayload::new(make_pick("ev1"));
        assert_eq!(payload.fingerprint.event_id, "ev1");
        assert_ne!(payload.id, AlertPayload::new(make_pick("ev1")).id);
        assert!(payload.text.contains("Premier League"));
        assert!(payload.text.contains("Winner: Draw"));
    }

    #[test]
    fn test_log_notifier_accepts() {
        assert!(LogNotifier.notify(AlertPayload::new(make_pick("ev1"))).is_ok());
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new(4);
        notifier.notify(AlertPayload::new(make_pick("ev1"))).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.pick.event_id, "ev1");
    }

    #[test]
    fn test_channel_notifier_full_and_closed() {
        let (notifier, rx) = ChannelNotifier::new(1);
        notifier.notify(AlertPayload::new(make_pick("a"))).unwrap();
        assert_eq!(
            notifier.notify(AlertPayload::new(make_pick("b"))),
            Err(NotifyError::QueueFull)
        );
        drop(rx);
        assert_eq!(
            notifier.notify(AlertPayload::new(make_pick("c"))),
            Err(NotifyError::Closed)
        );
    }
}
