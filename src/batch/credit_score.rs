//! Credit Scoring Engine.
//!
//! One pass per member over ledger history:
//!
//! `score = clamp(0, 100, round(regularity*40 + repayment*30 + attendance*20 + tenure*10))`
//!
//! Each factor is normalized to [0, 1] before weighting. The math stays in
//! integer permille; no floats touch the score. Writes are idempotent
//! overwrites of `members.credit_score` and run outside any live financial
//! transaction; a stale score until the next pass is accepted.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::ledger::{LedgerResult, LedgerStore};
use crate::models::Member;
use crate::money::Amount;

const PERMILLE: i64 = 1_000;

/// Normalized inputs for one member's score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    pub confirmed_contributions: u32,
    /// One expected contribution per month of tenure, minimum one.
    pub expected_contributions: u32,
    pub repaid_total: Amount,
    pub scheduled_total: Amount,
    pub meetings_attended: u32,
    pub meetings_held: u32,
    pub tenure_months: u32,
}

/// Weighted score on integer arithmetic. A member with no loan history or
/// no meetings held gets full marks on those factors rather than a penalty
/// for missing data.
pub fn compute_score(inputs: &ScoreInputs) -> u8 {
    let regularity = ratio_permille(
        inputs.confirmed_contributions as i64,
        inputs.expected_contributions.max(1) as i64,
    );
    let repayment = if inputs.scheduled_total == 0 {
        PERMILLE
    } else {
        ratio_permille(inputs.repaid_total, inputs.scheduled_total)
    };
    let attendance = if inputs.meetings_held == 0 {
        PERMILLE
    } else {
        ratio_permille(inputs.meetings_attended as i64, inputs.meetings_held as i64)
    };
    // Two years of tenure earns the full tenure component.
    let tenure = ratio_permille(inputs.tenure_months as i64, 24);

    let total = regularity * 40 + repayment * 30 + attendance * 20 + tenure * 10;
    let score = (total + PERMILLE / 2) / PERMILLE;
    score.clamp(0, 100) as u8
}

fn ratio_permille(num: i64, den: i64) -> i64 {
    if den <= 0 || num <= 0 {
        return 0;
    }
    ((num as i128 * PERMILLE as i128 / den as i128) as i64).min(PERMILLE)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringRunSummary {
    pub scored: usize,
    pub failed: usize,
}

pub struct CreditScoringEngine {
    store: Arc<LedgerStore>,
}

impl CreditScoringEngine {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Score every active member. Per-member failures are logged and
    /// skipped; the stored score is overwritten idempotently.
    pub async fn run(&self) -> LedgerResult<ScoringRunSummary> {
        let members = self.store.list_all_members().await?;
        let mut summary = ScoringRunSummary::default();

        for member in members.iter().filter(|m| m.active) {
            match self.score_member(member).await {
                Ok(score) => {
                    summary.scored += 1;
                    if score != member.credit_score {
                        info!(member_id = member.id, score, "credit score updated");
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(member_id = member.id, error = %e, "credit scoring failed for member");
                }
            }
        }

        info!(scored = summary.scored, failed = summary.failed, "credit scoring pass done");
        Ok(summary)
    }

    async fn score_member(&self, member: &Member) -> LedgerResult<u8> {
        let confirmed = self.store.confirmed_contribution_count(member.id).await?;
        let (repaid_total, scheduled_total) = self.store.repayment_history(member.id).await?;
        let tenure_months = (Utc::now() - member.joined_at).num_days().max(0) as u32 / 30;

        let score = compute_score(&ScoreInputs {
            confirmed_contributions: confirmed,
            expected_contributions: tenure_months.max(1),
            repaid_total,
            scheduled_total,
            meetings_attended: member.meetings_attended,
            meetings_held: member.meetings_held,
            tenure_months,
        });
        self.store.set_credit_score(member.id, score).await?;
        Ok(score)
    }
}
