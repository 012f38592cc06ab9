//! valuescan: value-bet odds scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores users and open CLV records from the store, and runs the scan,
//! closing-line and weekly rollover timers until Ctrl+C.

use anyhow::{Context, Result};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use valuescan::config::AppConfig;
use valuescan::engine::{CycleReport, ScanEngine};
use valuescan::notifier::{ChannelNotifier, LogNotifier, Notifier};
use valuescan::provider::TheOddsApiClient;
use valuescan::staking::StakingEngine;
use valuescan::storage::{SqliteStore, Store};
use valuescan::types::EngineError;

const BANNER: &str = r#"
             __
 _  ______ _/ /_  _____  ______________ _____
| |/ / __ `/ / / / / _ \/ ___/ ___/ __ `/ __ \
| / / /_/ / / /_/ /  __(__  ) /__/ /_/ / / / /
|__/\__,_/_/\__,_/\___/____/\___/\__,_/_/ /_/

  Value-bet odds scanner
  v0.1.0
"#;

/// Alerts buffered between the engine and the delivery task.
const DELIVERY_BUFFER: usize = 256;

/// How often users are checked for a weekly rollover.
const ROLLOVER_CHECK_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        sports = ?cfg.provider.sports,
        markets = ?cfg.provider.markets,
        min_edge = cfg.scanner.min_edge,
        scan_interval_secs = cfg.schedule.scan_interval_secs,
        "valuescan starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let api_key = AppConfig::resolve_env(&cfg.provider.api_key_env)?;
    let provider = Arc::new(TheOddsApiClient::with_base_url(
        SecretString::new(api_key),
        &cfg.provider.base_url,
        &cfg.provider.regions,
    )?
    .with_lookahead_hours(cfg.scanner.lookahead_hours));

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url)
            .await
            .with_context(|| format!("Failed to open store at {}", cfg.storage.database_url))?,
    );

    let (notifier, mut deliveries) = ChannelNotifier::new(DELIVERY_BUFFER);
    let delivery = tokio::spawn(async move {
        let sink = LogNotifier;
        while let Some(payload) = deliveries.recv().await {
            if let Err(e) = sink.notify(payload) {
                warn!(error = %e, "Alert delivery failed");
            }
        }
    });

    // -- Restore state ---------------------------------------------------

    let staking = Arc::new(StakingEngine::new(cfg.staking.clone()));
    let users = store.load_users().await.context("Failed to load users")?;
    info!(users = staking.restore(users), "Users restored");

    let engine = ScanEngine::new(cfg.engine_config()?, provider, Arc::new(notifier))
        .with_store(store.clone())
        .with_staking(staking.clone());
    let open_clv = store.load_open_clv().await.context("Failed to load CLV records")?;
    info!(records = engine.clv().restore(open_clv), "Open CLV records restored");

    // -- Main loop -------------------------------------------------------

    let mut scan = tokio::time::interval(Duration::from_secs(cfg.schedule.scan_interval_secs.max(1)));
    let mut closing =
        tokio::time::interval(Duration::from_secs(cfg.clv.closing_pass_interval_secs.max(1)));
    let mut rollover = tokio::time::interval(Duration::from_secs(ROLLOVER_CHECK_SECS));
    for timer in [&mut scan, &mut closing, &mut rollover] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = scan.tick() => {
                match engine.run_cycle().await {
                    Ok(report) => log_cycle_report(&report),
                    Err(EngineError::CycleInProgress) => {}
                    Err(e) => error!(error = %e, "Cycle failed, continuing to next"),
                }
            }
            _ = closing.tick() => {
                let report = engine.run_closing_pass().await;
                if report.closed > 0 {
                    engine.flush().await;
                }
            }
            _ = rollover.tick() => {
                if engine.weekly_rollover(&staking, Utc::now()) > 0 {
                    engine.flush().await;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Final flush
    if let Some(flush) = engine.flush().await {
        if flush.pending > 0 {
            warn!(pending = flush.pending, "Writes still pending at shutdown");
        }
    }

    let verdict = engine.clv().sharp_verdict();
    let (missed, pending) = engine.clv().without_clv(Utc::now());
    info!(
        closed = verdict.stats.total,
        average_clv = format!("{:+.2}%", verdict.stats.average * 100.0),
        positive_rate = format!("{:.1}%", verdict.stats.positive_rate * 100.0),
        missed,
        pending,
        verdict = verdict.label(),
        "valuescan shut down cleanly."
    );

    // Dropping the engine closes the channel so the delivery task drains and exits.
    drop(engine);
    let _ = delivery.await;
    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    for (sport, err) in &report.sports_failed {
        warn!(sport = %sport, error = %err, "Sport will be retried next cycle");
    }
    if let Some(flush) = &report.flush {
        if flush.failed {
            warn!(pending = flush.pending, "Store unavailable, writes kept for retry");
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("valuescan=info"));

    let json_logging = std::env::var("VALUESCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
