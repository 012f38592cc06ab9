//! End-to-end scan cycles against the mock provider.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use valuescan::cache::CacheConfig;
use valuescan::engine::{EngineConfig, ScanEngine, ScheduleConfig};
use valuescan::staking::{BetOutcome, BetSettlement, StakingConfig, StakingEngine, SubscriptionTier};
use valuescan::storage::{SqliteStore, Store};
use valuescan::types::{EngineError, MarketType, ProviderError};

use crate::mock_provider::{value_market, MockProvider, RecordingNotifier};

const NBA: &str = "basketball_nba";
const NHL: &str = "icehockey_nhl";

fn make_config(sports: &[&str]) -> EngineConfig {
    EngineConfig {
        sports: sports.iter().map(|s| s.to_string()).collect(),
        markets: vec![MarketType::Head2Head],
        schedule: ScheduleConfig {
            sport_timeout_secs: 5,
            cycle_timeout_secs: 30,
            max_concurrent_sports: 4,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn make_engine(
    config: EngineConfig,
) -> (ScanEngine, Arc<MockProvider>, Arc<RecordingNotifier>) {
    let provider = Arc::new(MockProvider::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = ScanEngine::new(config, provider.clone(), notifier.clone());
    (engine, provider, notifier)
}

#[tokio::test]
async fn test_cycle_produces_alerts() {
    let (engine, provider, notifier) = make_engine(make_config(&[NBA, NHL]));
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::hours(3)));
    provider.set_quotes(NHL, value_market(NHL, "nhl-1", 2.40, Duration::hours(5)));

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.cycle, 1);
    assert_eq!(report.sports_scanned, 2);
    assert!(report.sports_failed.is_empty());
    assert_eq!(report.alerts_sent, 2);
    assert_eq!(report.summary.candidates, 2);

    let received = notifier.received();
    assert_eq!(received.len(), 2);
    for payload in &received {
        assert_eq!(payload.pick.selection, "Home");
        assert!(payload.pick.value >= 0.05);
        assert!(payload.text.contains("Winner: Home"));
    }

    assert!(engine.events().get("nba-1").is_some());
    assert_eq!(engine.alerts().len(), 2);
    assert!(engine.clv().get("nhl-1", "Home").is_some());
    // one prediction and one CLV record per alert, no store attached
    assert_eq!(engine.outbox().len(), 4);
    assert!(report.flush.is_none());
}

#[tokio::test]
async fn test_same_pick_twice_notifies_once() {
    let (engine, provider, notifier) = make_engine(make_config(&[NBA]));
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::hours(3)));

    let first = engine.run_cycle().await.unwrap();
    let second = engine.run_cycle().await.unwrap();

    assert_eq!(first.alerts_sent, 1);
    assert_eq!(second.alerts_sent, 0);
    assert_eq!(second.duplicates_suppressed, 1);
    assert_eq!(notifier.received().len(), 1);
    assert_eq!(engine.clv().len(), 1);
}

#[tokio::test]
async fn test_failed_hand_off_still_counts_as_sent() {
    let provider = Arc::new(MockProvider::new());
    let notifier = Arc::new(RecordingNotifier::rejecting());
    let engine = ScanEngine::new(make_config(&[NBA]), provider.clone(), notifier.clone());
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::hours(3)));

    let first = engine.run_cycle().await.unwrap();
    assert_eq!(first.alerts_sent, 0);
    assert_eq!(first.notify_failures, 1);

    let second = engine.run_cycle().await.unwrap();
    assert_eq!(second.duplicates_suppressed, 1);
    assert_eq!(notifier.received().len(), 1);
}

#[tokio::test]
async fn test_failing_sport_does_not_block_others() {
    let (engine, provider, notifier) = make_engine(make_config(&[NBA, NHL]));
    provider.set_error(NBA, ProviderError::RateLimited);
    provider.set_quotes(NHL, value_market(NHL, "nhl-1", 2.40, Duration::hours(5)));

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.sports_scanned, 1);
    assert_eq!(
        report.sports_failed,
        vec![(NBA.to_string(), ProviderError::RateLimited)]
    );
    assert_eq!(notifier.received().len(), 1);
    assert_eq!(notifier.received()[0].pick.sport, NHL);

    // Retried on the next cycle.
    let next = engine.run_cycle().await.unwrap();
    assert_eq!(next.sports_failed.len(), 1);
    assert_eq!(provider.calls().iter().filter(|s| *s == NBA).count(), 2);
}

#[tokio::test]
async fn test_slow_sport_times_out_others_still_alert() {
    let mut config = make_config(&["slow", NHL]);
    config.schedule.sport_timeout_secs = 1;
    let (engine, provider, notifier) = make_engine(config);
    provider.set_quotes("slow", value_market("slow", "slow-1", 2.30, Duration::hours(3)));
    provider.set_delay("slow", std::time::Duration::from_secs(3));
    provider.set_quotes(NHL, value_market(NHL, "nhl-1", 2.40, Duration::hours(5)));

    let report = engine.run_cycle().await.unwrap();

    assert_eq!(
        report.sports_failed,
        vec![("slow".to_string(), ProviderError::Timeout)]
    );
    assert_eq!(report.alerts_sent, 1);
    assert_eq!(notifier.received()[0].pick.event_id, "nhl-1");
}

#[tokio::test]
async fn test_cycle_deadline_keeps_in_flight_results() {
    let mut config = make_config(&["slow", NHL]);
    config.schedule.cycle_timeout_secs = 1;
    config.schedule.max_concurrent_sports = 1;
    let (engine, provider, notifier) = make_engine(config);
    provider.set_quotes("slow", value_market("slow", "slow-1", 2.30, Duration::hours(3)));
    provider.set_delay("slow", std::time::Duration::from_millis(1500));
    provider.set_quotes(NHL, value_market(NHL, "nhl-1", 2.40, Duration::hours(5)));

    let report = engine.run_cycle().await.unwrap();

    // The call already running finishes and its pick is delivered; the
    // sport queued behind it waits for the next cycle.
    assert_eq!(provider.calls(), vec!["slow".to_string()]);
    assert_eq!(report.sports_skipped, vec![NHL.to_string()]);
    assert_eq!(report.alerts_sent, 1);
    assert_eq!(notifier.received()[0].pick.event_id, "slow-1");
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped() {
    let (engine, provider, _notifier) = make_engine(make_config(&[NBA]));
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::hours(3)));
    provider.set_delay(NBA, std::time::Duration::from_millis(300));

    let (first, second) = tokio::join!(engine.run_cycle(), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.run_cycle().await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(EngineError::CycleInProgress)));

    // The guard is released once the cycle ends.
    assert!(engine.run_cycle().await.is_ok());
}

#[tokio::test]
async fn test_closing_pass_records_clv() {
    let (engine, provider, _notifier) = make_engine(make_config(&[NBA]));
    // Starts inside the default five-minute closing lead.
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::minutes(3)));
    engine.run_cycle().await.unwrap();

    let record = engine.clv().get("nba-1", "Home").unwrap();
    assert!((record.opening_odds - 2.30).abs() < 1e-10);
    assert!(record.clv.is_none());

    // The soft price has moved in.
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.00, Duration::minutes(3)));
    let report = engine.run_closing_pass().await;

    assert_eq!(report.due, 1);
    assert_eq!(report.closed, 1);
    let record = engine.clv().get("nba-1", "Home").unwrap();
    assert_eq!(record.closing_odds, Some(2.00));
    let clv = record.clv.unwrap();
    assert!((clv - (2.00 - 2.30) / 2.30).abs() < 1e-10);

    // Closed records are not re-priced.
    assert_eq!(engine.run_closing_pass().await.due, 0);
}

#[tokio::test]
async fn test_cache_bounds_hold_after_cleanup() {
    let mut config = make_config(&[NBA]);
    config.caches = CacheConfig {
        max_monitored_events: 3,
        max_sent_alerts: 4,
        ..Default::default()
    };
    let (engine, provider, _notifier) = make_engine(config);

    let quotes = (0..10)
        .flat_map(|i| {
            value_market(NBA, &format!("nba-{i}"), 2.30, Duration::hours(1 + i as i64))
        })
        .collect();
    provider.set_quotes(NBA, quotes);

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.alerts_sent, 10);
    assert!(engine.events().len() <= 3);
    assert!(engine.alerts().len() <= 4);

    let now = Utc::now();
    engine.compact(now);
    assert!(engine.events().len() <= 3);
    assert!(engine.alerts().len() <= 4);

    // Idempotent.
    let again = engine.compact(now);
    assert_eq!(again.events_evicted, 0);
    assert_eq!(again.alerts_evicted, 0);

    // The latest-starting events survive.
    assert!(engine.events().get("nba-9").is_some());
    assert!(engine.events().get("nba-0").is_none());
}

#[tokio::test]
async fn test_writes_flushed_to_store() {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let (engine, provider, _notifier) = make_engine(make_config(&[NBA]));
    let engine = engine.with_store(store.clone());
    provider.set_quotes(NBA, value_market(NBA, "nba-1", 2.30, Duration::hours(3)));

    let report = engine.run_cycle().await.unwrap();

    let flush = report.flush.unwrap();
    assert_eq!(flush.written, 2);
    assert_eq!(flush.pending, 0);
    assert!(engine.outbox().is_empty());

    let open = store.load_open_clv().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].event_id, "nba-1");
}

#[tokio::test]
async fn test_weekly_rollover_queues_users() {
    let (engine, _provider, _notifier) = make_engine(make_config(&[NBA]));
    let staking = StakingEngine::new(StakingConfig::default());
    let last_week = Utc::now() - Duration::days(8);

    staking.register("premium", SubscriptionTier::Premium, Some(dec!(1000)), last_week);
    staking
        .settle(
            "premium",
            BetSettlement {
                event: "nba-1".into(),
                selection: "Home".into(),
                stake: dec!(50),
                odds: dec!(3.0),
                outcome: BetOutcome::Won,
            },
            last_week,
        )
        .unwrap();

    assert_eq!(engine.weekly_rollover(&staking, Utc::now()), 1);
    assert_eq!(engine.outbox().len(), 1);

    let user = staking.get("premium").unwrap();
    assert_eq!(user.weekly_profit, dec!(0));
    assert_eq!(user.weekly_fee_due, dec!(20));

    // Nothing more to roll until next week.
    assert_eq!(engine.weekly_rollover(&staking, Utc::now()), 0);
}

#[tokio::test]
async fn test_alerts_go_to_premium_users_within_quota() {
    let staking = Arc::new(StakingEngine::new(StakingConfig {
        max_daily_alerts: 2,
        ..Default::default()
    }));
    let now = Utc::now();
    staking.register("premium", SubscriptionTier::Premium, None, now);
    staking.register("free", SubscriptionTier::Free, None, now);

    let (engine, provider, notifier) = make_engine(make_config(&[NBA]));
    let engine = engine.with_staking(staking.clone());
    let quotes = (0..3)
        .flat_map(|i| value_market(NBA, &format!("nba-{i}"), 2.30, Duration::hours(1 + i as i64)))
        .collect();
    provider.set_quotes(NBA, quotes);

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.alerts_sent, 3);

    let received = notifier.received();
    let delivered = received
        .iter()
        .filter(|p| p.recipients.as_deref() == Some(&["premium".to_string()][..]))
        .count();
    let unrouted = received
        .iter()
        .filter(|p| p.recipients.as_ref().is_some_and(|r| r.is_empty()))
        .count();
    assert_eq!(delivered, 2);
    assert_eq!(unrouted, 1);
    assert_eq!(staking.remaining_alerts("premium", now).unwrap(), 0);
    // Prediction and CLV per alert, plus a user upsert per delivery.
    assert_eq!(engine.outbox().len(), 3 * 2 + 2);
}
