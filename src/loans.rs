//! Loan Engine.
//!
//! Amortization terms are fixed at application time and never recalculated.
//! Status flow: Pending -> Approved -> Disbursed -> Active -> Completed,
//! with Rejected and Defaulted as terminal exits. Pending -> Approved ->
//! Disbursed is driven by the multi-signature approval workflow; repayment
//! completion drives Active -> Completed.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Transaction};
use tracing::info;

use crate::events::{DomainEventKind, EventBus};
use crate::ledger::{self, LedgerError, LedgerResult, LedgerStore, OpKind};
use crate::models::{Loan, LoanStatus};
use crate::money::{amortize, Amount, RateBps};

pub struct LoanEngine {
    store: Arc<LedgerStore>,
    events: EventBus,
}

impl LoanEngine {
    pub fn new(store: Arc<LedgerStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// File a loan application. Computes the full amortization schedule up
    /// front; `outstanding_balance` starts at the total amount due.
    pub async fn apply(
        &self,
        group_id: i64,
        borrower_id: i64,
        principal: Amount,
        rate_bps: RateBps,
        duration_months: u32,
    ) -> LedgerResult<Loan> {
        if principal <= 0 {
            return Err(LedgerError::InvalidAmount(principal));
        }
        if duration_months == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }

        let terms = amortize(principal, rate_bps, duration_months);

        self.store
            .with_group_tx(group_id, move |tx| {
                ledger::group_tx(tx, group_id)?;
                let borrower = ledger::member_tx(tx, borrower_id)?;
                if borrower.group_id != group_id {
                    return Err(LedgerError::UnknownMember(borrower_id));
                }
                if !borrower.active {
                    return Err(LedgerError::MemberRetired(borrower_id));
                }

                let now = Utc::now();
                tx.execute(
                    "INSERT INTO loans
                         (group_id, borrower_id, principal, interest_rate_bps, duration_months,
                          total_amount_due, monthly_payment, outstanding_balance, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
                    params![
                        group_id,
                        borrower_id,
                        principal,
                        rate_bps,
                        duration_months,
                        terms.total_amount_due,
                        terms.monthly_payment,
                        terms.total_amount_due,
                        now.to_rfc3339(),
                    ],
                )?;
                Ok(Loan {
                    id: tx.last_insert_rowid(),
                    group_id,
                    borrower_id,
                    principal,
                    interest_rate_bps: rate_bps,
                    duration_months,
                    total_amount_due: terms.total_amount_due,
                    monthly_payment: terms.monthly_payment,
                    outstanding_balance: terms.total_amount_due,
                    status: LoanStatus::Pending,
                    created_at: now,
                })
            })
            .await
    }

    /// Apply a completed repayment, idempotent on `idempotency_key`.
    ///
    /// Overpayment is rejected outright, never clamped: callers split a
    /// payment that exceeds the outstanding balance. Reaching zero flips the
    /// loan to Completed and emits `LoanCompleted`.
    pub async fn repay(
        &self,
        loan_id: i64,
        amount: Amount,
        idempotency_key: &str,
    ) -> LedgerResult<Amount> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let group_id = self.store.get_loan(loan_id).await?.group_id;
        let key = idempotency_key.to_string();

        let (new_outstanding, completed) = self
            .store
            .with_group_tx(group_id, move |tx| {
                let loan = ledger::loan_tx(tx, loan_id)?;

                // Replay: the delta was already applied; report the loan's
                // standing without touching anything.
                if LedgerStore::applied_key_tx(tx, OpKind::LoanRepay, &key)?.is_some() {
                    return Ok((loan.outstanding_balance, false));
                }

                if !loan.status.accepts_repayment() {
                    return Err(LedgerError::InvalidLoanState(loan.status));
                }
                if amount > loan.outstanding_balance {
                    return Err(LedgerError::OverpaymentRejected {
                        loan_id,
                        outstanding: loan.outstanding_balance,
                        offered: amount,
                    });
                }

                // Repayments flow back into the pool.
                LedgerStore::apply_balance_delta_tx(
                    tx,
                    group_id,
                    amount,
                    OpKind::LoanRepay,
                    &key,
                )?;

                tx.execute(
                    "INSERT INTO loan_repayments (loan_id, amount, status, created_at)
                     VALUES (?1, ?2, 'completed', ?3)",
                    params![loan_id, amount, Utc::now().to_rfc3339()],
                )?;

                let new_outstanding = loan.outstanding_balance - amount;
                let new_status = if new_outstanding == 0 {
                    LoanStatus::Completed
                } else {
                    LoanStatus::Active
                };
                tx.execute(
                    "UPDATE loans SET outstanding_balance = ?1, status = ?2 WHERE id = ?3",
                    params![new_outstanding, new_status.as_str(), loan_id],
                )?;

                Ok((new_outstanding, new_outstanding == 0))
            })
            .await?;

        if completed {
            info!(loan_id, group_id, "loan repaid in full");
            self.events.emit(DomainEventKind::LoanCompleted { loan_id, group_id });
        }
        Ok(new_outstanding)
    }

    /// Terminal default transition. No further repayments are accepted.
    pub async fn mark_defaulted(&self, loan_id: i64) -> LedgerResult<()> {
        let group_id = self.store.get_loan(loan_id).await?.group_id;
        self.store
            .with_group_tx(group_id, |tx| {
                let loan = ledger::loan_tx(tx, loan_id)?;
                if !loan.status.accepts_repayment() {
                    return Err(LedgerError::InvalidLoanState(loan.status));
                }
                tx.execute(
                    "UPDATE loans SET status = 'defaulted' WHERE id = ?1",
                    [loan_id],
                )?;
                Ok(())
            })
            .await?;
        info!(loan_id, group_id, "loan marked defaulted");
        self.events.emit(DomainEventKind::LoanDefaulted { loan_id, group_id });
        Ok(())
    }
}

// =============================================================================
// TX-SCOPED TRANSITIONS DRIVEN BY THE APPROVAL WORKFLOW
// =============================================================================

/// Quorum transition: Pending -> Approved. The approval workflow records
/// this before releasing funds, in the same transaction.
pub fn approve_loan_tx(tx: &Transaction<'_>, loan_id: i64) -> LedgerResult<()> {
    let loan = ledger::loan_tx(tx, loan_id)?;
    if loan.status != LoanStatus::Pending {
        return Err(LedgerError::InvalidLoanState(loan.status));
    }
    tx.execute(
        "UPDATE loans SET status = 'approved' WHERE id = ?1",
        [loan_id],
    )?;
    Ok(())
}

/// Disbursement side effect: Approved -> Disbursed, debiting the group
/// balance. Runs inside the approval's transaction so it fires exactly once.
pub fn disburse_loan_tx(tx: &Transaction<'_>, loan_id: i64) -> LedgerResult<(Amount, Amount)> {
    let loan = ledger::loan_tx(tx, loan_id)?;
    if loan.status != LoanStatus::Approved {
        return Err(LedgerError::InvalidLoanState(loan.status));
    }

    // The borrower receives the principal; interest exists only in the
    // repayment schedule.
    let key = format!("loan_disburse:{}", loan_id);
    let new_balance = LedgerStore::apply_balance_delta_tx(
        tx,
        loan.group_id,
        -loan.principal,
        OpKind::LoanDisburse,
        &key,
    )?;
    tx.execute(
        "UPDATE loans SET status = 'disbursed' WHERE id = ?1",
        [loan_id],
    )?;
    Ok((loan.principal, new_balance))
}

/// Rejection via the approval workflow; terminal. Only a still-pending loan
/// can be rejected: approval and disbursement commit together.
pub fn reject_loan_tx(tx: &Transaction<'_>, loan_id: i64) -> LedgerResult<()> {
    let loan = ledger::loan_tx(tx, loan_id)?;
    if loan.status != LoanStatus::Pending {
        return Err(LedgerError::InvalidLoanState(loan.status));
    }
    tx.execute(
        "UPDATE loans SET status = 'rejected' WHERE id = ?1",
        [loan_id],
    )?;
    Ok(())
}
