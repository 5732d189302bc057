//! Idle Cash Scanner.
//!
//! Flags funds that have sat unmoved past a configurable window: per group,
//! the sum of confirmed contributions older than the threshold is written to
//! `groups.idle_cash`. Purely informational for downstream liquidity
//! decisions; never touches the live balance.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::ledger::{LedgerResult, LedgerStore};
use crate::money::Amount;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub groups_scanned: usize,
    pub groups_failed: usize,
    pub total_idle: Amount,
}

pub struct IdleCashScanner {
    store: Arc<LedgerStore>,
    threshold_days: i64,
}

impl IdleCashScanner {
    pub fn new(store: Arc<LedgerStore>, threshold_days: i64) -> Self {
        Self { store, threshold_days }
    }

    /// One scan over all groups. Per-group failures are logged and skipped.
    pub async fn run(&self) -> LedgerResult<ScanSummary> {
        let cutoff = Utc::now() - ChronoDuration::days(self.threshold_days);
        let groups = self.store.list_groups().await?;
        let mut summary = ScanSummary::default();

        for group in &groups {
            let result: LedgerResult<Amount> = async {
                let idle = self
                    .store
                    .confirmed_contributions_before(group.id, cutoff)
                    .await?;
                self.store.set_idle_cash(group.id, idle).await?;
                Ok(idle)
            }
            .await;

            match result {
                Ok(idle) => {
                    summary.groups_scanned += 1;
                    summary.total_idle += idle;
                    if idle > 0 {
                        info!(group_id = group.id, idle_cash = idle, "idle cash flagged");
                    }
                }
                Err(e) => {
                    summary.groups_failed += 1;
                    warn!(group_id = group.id, error = %e, "idle cash scan failed for group");
                }
            }
        }

        info!(
            scanned = summary.groups_scanned,
            failed = summary.groups_failed,
            "idle cash pass done"
        );
        Ok(summary)
    }
}
