//! Contribution Processor.
//!
//! Takes validated payment events from the (out-of-scope) gateway webhook
//! and applies them to the ledger. `confirm` is the at-least-once entry
//! point: replays are absorbed, partial failures roll back whole.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tracing::info;

use crate::events::{DomainEventKind, EventBus};
use crate::ledger::{self, LedgerError, LedgerResult, LedgerStore, OpKind};
use crate::models::ContributionStatus;
use crate::money::Amount;
use crate::shares;

/// Result of a confirm call. An already-confirmed contribution is a normal
/// outcome for the upstream notifier, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed { new_balance: Amount },
    AlreadyConfirmed,
}

pub struct ContributionProcessor {
    store: Arc<LedgerStore>,
    events: EventBus,
}

impl ContributionProcessor {
    pub fn new(store: Arc<LedgerStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Confirm a pending contribution as one atomic unit: flip the status,
    /// bump the member's running total, credit the group balance, and
    /// recompute shares. Emits `ContributionConfirmed` after commit.
    pub async fn confirm(&self, contribution_id: i64) -> LedgerResult<ConfirmOutcome> {
        let group_id = self.store.get_contribution(contribution_id).await?.group_id;

        let applied = self
            .store
            .with_group_tx(group_id, |tx| {
                let contribution = ledger::contribution_tx(tx, contribution_id)?;
                match contribution.status {
                    ContributionStatus::Pending => {}
                    ContributionStatus::Confirmed => return Ok(None),
                    other => return Err(LedgerError::InvalidContributionState(other)),
                }

                let member = ledger::member_tx(tx, contribution.member_id)?;
                if !member.active {
                    return Err(LedgerError::MemberRetired(member.id));
                }

                let new_balance = LedgerStore::apply_balance_delta_tx(
                    tx,
                    group_id,
                    contribution.amount,
                    OpKind::ContributionConfirm,
                    &contribution.payment_reference,
                )?;

                tx.execute(
                    "UPDATE contributions SET status = 'confirmed', confirmed_at = ?1
                     WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), contribution_id],
                )?;
                tx.execute(
                    "UPDATE members SET total_contributed = total_contributed + ?1
                     WHERE id = ?2",
                    params![contribution.amount, member.id],
                )?;
                shares::recalculate_tx(tx, group_id)?;

                Ok(Some((member.id, contribution.amount, new_balance)))
            })
            .await?;

        match applied {
            Some((member_id, amount, new_balance)) => {
                info!(contribution_id, group_id, amount, new_balance, "contribution confirmed");
                self.events.emit(DomainEventKind::ContributionConfirmed {
                    contribution_id,
                    group_id,
                    member_id,
                    amount,
                    new_balance,
                });
                Ok(ConfirmOutcome::Confirmed { new_balance })
            }
            None => Ok(ConfirmOutcome::AlreadyConfirmed),
        }
    }

    /// Explicit correction path: a confirmed contribution flips to Reversed
    /// with a compensating balance delta and share recompute. History is
    /// never deleted. Fails with `InsufficientFunds` if the group has since
    /// spent below the reversal amount.
    pub async fn reverse(&self, contribution_id: i64) -> LedgerResult<Amount> {
        let group_id = self.store.get_contribution(contribution_id).await?.group_id;

        let (member_id, amount, new_balance) = self
            .store
            .with_group_tx(group_id, |tx| {
                let contribution = ledger::contribution_tx(tx, contribution_id)?;
                if contribution.status != ContributionStatus::Confirmed {
                    return Err(LedgerError::InvalidContributionState(contribution.status));
                }

                let key = format!("reversal:{}", contribution.payment_reference);
                let new_balance = LedgerStore::apply_balance_delta_tx(
                    tx,
                    group_id,
                    -contribution.amount,
                    OpKind::ContributionReverse,
                    &key,
                )?;

                tx.execute(
                    "UPDATE contributions SET status = 'reversed' WHERE id = ?1",
                    [contribution_id],
                )?;
                // The one sanctioned decrement of total_contributed: the
                // contribution it counted is being unwound.
                tx.execute(
                    "UPDATE members SET total_contributed = total_contributed - ?1
                     WHERE id = ?2",
                    params![contribution.amount, contribution.member_id],
                )?;
                shares::recalculate_tx(tx, group_id)?;

                Ok((contribution.member_id, contribution.amount, new_balance))
            })
            .await?;

        info!(contribution_id, group_id, amount, new_balance, "contribution reversed");
        self.events.emit(DomainEventKind::ContributionReversed {
            contribution_id,
            group_id,
            member_id,
            amount,
            new_balance,
        });
        Ok(new_balance)
    }
}
