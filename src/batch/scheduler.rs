//! Interval-driven runner for the batch jobs.
//!
//! Stands in for the external scheduler collaborator: each job gets its own
//! tokio task with a fixed-interval ticker, fire-and-forget per tick. The
//! jobs themselves are idempotent, so a tick that overlaps a restart or a
//! missed tick is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::batch::{CreditScoringEngine, IdleCashScanner};
use crate::config::Config;
use crate::ledger::LedgerStore;

/// Spawn both batch loops; returns the handles so callers can abort them on
/// shutdown.
pub fn spawn_batch_jobs(store: Arc<LedgerStore>, config: &Config) -> Vec<JoinHandle<()>> {
    let scoring = CreditScoringEngine::new(store.clone());
    let scanner = IdleCashScanner::new(store, config.idle_cash_threshold_days);

    let scoring_every = Duration::from_secs(config.credit_score_interval_secs);
    let scan_every = Duration::from_secs(config.idle_cash_interval_secs);

    info!(
        credit_score_interval_secs = config.credit_score_interval_secs,
        idle_cash_interval_secs = config.idle_cash_interval_secs,
        "starting batch jobs"
    );

    let scoring_task = tokio::spawn(async move {
        let mut ticker = interval(scoring_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; an initial pass on boot is fine
        // because the job is a pure overwrite.
        loop {
            ticker.tick().await;
            if let Err(e) = scoring.run().await {
                warn!(error = %e, "credit scoring run failed; retrying next tick");
            }
        }
    });

    let scan_task = tokio::spawn(async move {
        let mut ticker = interval(scan_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = scanner.run().await {
                warn!(error = %e, "idle cash scan failed; retrying next tick");
            }
        }
    });

    vec![scoring_task, scan_task]
}
