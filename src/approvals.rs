//! Multi-signature Approval Workflow.
//!
//! A disbursement (expense payout or loan release) stays Pending until a
//! quorum of independent signatures approves it. The signature insert, the
//! count increment, and the threshold check happen inside one per-group
//! transaction, so concurrent signers cannot both observe the pre-quorum
//! count: the quorum transition and its disbursement side effect fire
//! exactly once.
//!
//! A decision of `false` counts toward participation but not toward the
//! quorum. Auto-rejection on an explicit majority-no vote is configurable;
//! the record is never rejected merely for non-unanimity.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tracing::info;

use crate::events::{DomainEventKind, EventBus};
use crate::ledger::{self, LedgerError, LedgerResult, LedgerStore, OpKind};
use crate::loans;
use crate::models::{ApprovalStatus, DisbursementApproval, DisbursementKind, LoanStatus};
use crate::money::Amount;

#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Reject the record once explicit no-votes exceed half the group's
    /// active members. Off means records stay Pending until quorum or
    /// manual intervention.
    pub auto_reject_on_majority: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_reject_on_majority: true,
        }
    }
}

/// Outcome of a sign call. Duplicate and late signatures are outcomes, not
/// errors: the upstream caller retried or lost a race, both expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    /// Signature stored; quorum not yet reached.
    SignatureRecorded,
    /// This signature reached the quorum; the disbursement fired.
    QuorumReached { new_balance: Amount },
    /// This no-vote tipped an explicit majority against; record rejected.
    Rejected,
    /// The (approval, signer) pair already has a signature.
    AlreadySigned,
    /// The record was already terminal before this signature.
    AlreadyFinalized(ApprovalStatus),
}

pub struct ApprovalWorkflow {
    store: Arc<LedgerStore>,
    events: EventBus,
    config: ApprovalConfig,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<LedgerStore>, events: EventBus, config: ApprovalConfig) -> Self {
        Self { store, events, config }
    }

    /// Open an expense disbursement request.
    pub async fn request_expense(
        &self,
        group_id: i64,
        description: &str,
        amount: Amount,
        required_approvals: u32,
    ) -> LedgerResult<DisbursementApproval> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if required_approvals == 0 {
            return Err(LedgerError::InvalidQuorum(required_approvals));
        }
        let description = description.to_string();
        self.store
            .with_group_tx(group_id, move |tx| {
                ledger::group_tx(tx, group_id)?;
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO approvals
                         (group_id, kind, loan_id, description, amount,
                          required_approvals, approvals_count, status, created_at)
                     VALUES (?1, 'expense', NULL, ?2, ?3, ?4, 0, 'pending', ?5)",
                    params![group_id, &description, amount, required_approvals, now.to_rfc3339()],
                )?;
                Ok(DisbursementApproval {
                    id: tx.last_insert_rowid(),
                    group_id,
                    kind: DisbursementKind::Expense,
                    loan_id: None,
                    description,
                    amount,
                    required_approvals,
                    approvals_count: 0,
                    status: ApprovalStatus::Pending,
                    created_at: now,
                })
            })
            .await
    }

    /// Open a disbursement request for a pending loan. Quorum releases the
    /// principal to the borrower.
    pub async fn request_loan_disbursement(
        &self,
        loan_id: i64,
        required_approvals: u32,
    ) -> LedgerResult<DisbursementApproval> {
        if required_approvals == 0 {
            return Err(LedgerError::InvalidQuorum(required_approvals));
        }
        let loan = self.store.get_loan(loan_id).await?;
        if loan.status != LoanStatus::Pending {
            return Err(LedgerError::InvalidLoanState(loan.status));
        }
        let group_id = loan.group_id;
        self.store
            .with_group_tx(group_id, move |tx| {
                let loan = ledger::loan_tx(tx, loan_id)?;
                if loan.status != LoanStatus::Pending {
                    return Err(LedgerError::InvalidLoanState(loan.status));
                }
                let description = format!("loan {} disbursement", loan_id);
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO approvals
                         (group_id, kind, loan_id, description, amount,
                          required_approvals, approvals_count, status, created_at)
                     VALUES (?1, 'loan', ?2, ?3, ?4, ?5, 0, 'pending', ?6)",
                    params![group_id, loan_id, &description, loan.principal, required_approvals, now.to_rfc3339()],
                )?;
                Ok(DisbursementApproval {
                    id: tx.last_insert_rowid(),
                    group_id,
                    kind: DisbursementKind::Loan,
                    loan_id: Some(loan_id),
                    description,
                    amount: loan.principal,
                    required_approvals,
                    approvals_count: 0,
                    status: ApprovalStatus::Pending,
                    created_at: now,
                })
            })
            .await
    }

    /// Record one signer's decision. Safe under concurrent signers; see the
    /// module docs for the atomicity argument.
    pub async fn sign(
        &self,
        approval_id: i64,
        signer_id: i64,
        decision: bool,
    ) -> LedgerResult<SignOutcome> {
        let group_id = self.store.get_approval(approval_id).await?.group_id;
        let auto_reject = self.config.auto_reject_on_majority;

        let (outcome, loan_event) = self
            .store
            .with_group_tx(group_id, move |tx| {
                let approval = ledger::approval_tx(tx, approval_id)?;
                if approval.status.is_terminal() {
                    return Ok((SignOutcome::AlreadyFinalized(approval.status), None));
                }

                let signer = ledger::member_tx(tx, signer_id)?;
                if signer.group_id != approval.group_id {
                    return Err(LedgerError::SignerNotInGroup { approval_id, signer_id });
                }
                if !signer.active {
                    return Err(LedgerError::MemberRetired(signer_id));
                }

                // The UNIQUE (approval_id, signer_id) constraint makes the
                // double-sign check and the insert one step.
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO approval_signatures
                         (approval_id, signer_id, approved, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![approval_id, signer_id, decision as i64, Utc::now().to_rfc3339()],
                )?;
                if inserted == 0 {
                    return Ok((SignOutcome::AlreadySigned, None));
                }

                if decision {
                    // Locked read-modify-write: increment and threshold check
                    // under the group lock, in the same transaction.
                    let new_count = approval.approvals_count + 1;
                    tx.execute(
                        "UPDATE approvals SET approvals_count = ?1 WHERE id = ?2",
                        params![new_count, approval_id],
                    )?;
                    if new_count >= approval.required_approvals {
                        tx.execute(
                            "UPDATE approvals SET status = 'approved' WHERE id = ?1",
                            [approval_id],
                        )?;
                        let (new_balance, loan_event) =
                            disburse_tx(tx, &approval)?;
                        return Ok((SignOutcome::QuorumReached { new_balance }, loan_event));
                    }
                    return Ok((SignOutcome::SignatureRecorded, None));
                }

                // No-vote: participation only. Optionally finalize once an
                // explicit majority of active members has voted no.
                if auto_reject {
                    let reject_votes: u32 = tx.query_row(
                        "SELECT COUNT(*) FROM approval_signatures
                         WHERE approval_id = ?1 AND approved = 0",
                        [approval_id],
                        |row| row.get(0),
                    )?;
                    let eligible: u32 = tx.query_row(
                        "SELECT COUNT(*) FROM members WHERE group_id = ?1 AND active = 1",
                        [approval.group_id],
                        |row| row.get(0),
                    )?;
                    if 2 * reject_votes > eligible {
                        tx.execute(
                            "UPDATE approvals SET status = 'rejected' WHERE id = ?1",
                            [approval_id],
                        )?;
                        if let (DisbursementKind::Loan, Some(loan_id)) =
                            (approval.kind, approval.loan_id)
                        {
                            loans::reject_loan_tx(tx, loan_id)?;
                        }
                        return Ok((SignOutcome::Rejected, None));
                    }
                }
                Ok((SignOutcome::SignatureRecorded, None))
            })
            .await?;

        match outcome {
            SignOutcome::QuorumReached { .. } => {
                let approval = self.store.get_approval(approval_id).await?;
                info!(approval_id, group_id, "approval reached quorum");
                self.events.emit(DomainEventKind::ApprovalReachedQuorum {
                    approval_id,
                    group_id,
                    approvals_count: approval.approvals_count,
                });
                if let Some((loan_id, amount, new_balance)) = loan_event {
                    self.events.emit(DomainEventKind::LoanDisbursed {
                        loan_id,
                        group_id,
                        amount,
                        new_balance,
                    });
                }
            }
            SignOutcome::Rejected => {
                info!(approval_id, group_id, "approval rejected by majority vote");
                self.events.emit(DomainEventKind::ApprovalRejected { approval_id, group_id });
            }
            _ => {}
        }
        Ok(outcome)
    }
}

/// Fire the disbursement side effect for a freshly approved record.
/// Expense: debit the group balance. Loan: release the principal through
/// the loan engine's transition.
fn disburse_tx(
    tx: &rusqlite::Transaction<'_>,
    approval: &DisbursementApproval,
) -> LedgerResult<(Amount, Option<(i64, Amount, Amount)>)> {
    match (approval.kind, approval.loan_id) {
        (DisbursementKind::Loan, Some(loan_id)) => {
            loans::approve_loan_tx(tx, loan_id)?;
            let (amount, new_balance) = loans::disburse_loan_tx(tx, loan_id)?;
            Ok((new_balance, Some((loan_id, amount, new_balance))))
        }
        _ => {
            let key = format!("expense_disburse:{}", approval.id);
            let new_balance = LedgerStore::apply_balance_delta_tx(
                tx,
                approval.group_id,
                -approval.amount,
                OpKind::ExpenseDisburse,
                &key,
            )?;
            Ok((new_balance, None))
        }
    }
}
