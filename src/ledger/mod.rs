//! Ledger Store: durable, serialized storage for group balances, members,
//! contributions, loans, and disbursement approvals.
//!
//! # Design
//!
//! 1. **Single source of truth**: `groups.balance` and
//!    `loans.outstanding_balance` change only through this module. Engines
//!    request mutations inside `with_group_tx`; nothing writes balances
//!    directly.
//! 2. **Serialization**: one async mutex per group gates every
//!    balance-affecting transaction for that group. Acquisition is bounded;
//!    a timeout surfaces as retryable `LockContention`, never an indefinite
//!    block.
//! 3. **Idempotency**: applied keys are persisted per operation kind; a
//!    replay returns the recorded result instead of double-applying.
//! 4. **Append-only journal**: every balance delta lands in
//!    `ledger_entries`. History is never deleted; corrections are explicit
//!    reversal operations.

pub mod error;


use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{
    ApprovalSignature, ApprovalStatus, Contribution, ContributionStatus, DisbursementApproval,
    DisbursementKind, Group, Loan, LoanRepayment, LoanStatus, Member, MemberRole, RepaymentStatus,
};
use crate::money::Amount;

pub use error::{LedgerError, LedgerResult};

/// Mutating operation kinds, used to namespace idempotency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    ContributionConfirm,
    ContributionReverse,
    LoanDisburse,
    LoanRepay,
    ExpenseDisburse,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::ContributionConfirm => "contribution_confirm",
            OpKind::ContributionReverse => "contribution_reverse",
            OpKind::LoanDisburse => "loan_disburse",
            OpKind::LoanRepay => "loan_repay",
            OpKind::ExpenseDisburse => "expense_disburse",
        }
    }
}

pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
    group_locks: SyncMutex<HashMap<i64, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl LedgerStore {
    pub fn new(db_path: &str, lock_timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        Self::init_schema(&conn).context("init ledger schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            group_locks: SyncMutex::new(HashMap::new()),
            lock_timeout,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory(lock_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            group_locks: SyncMutex::new(HashMap::new()),
            lock_timeout,
        })
    }

    /// Test hook: run raw SQL against the live connection, e.g. to install
    /// a fault-raising trigger.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> LedgerResult<usize> {
        let conn = self.conn.lock().await;
        Ok(conn.execute(sql, [])?)
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                idle_cash INTEGER NOT NULL DEFAULT 0,
                contribution_amount INTEGER NOT NULL,
                max_members INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES groups(id),
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                contribution_share INTEGER NOT NULL DEFAULT 0,
                total_contributed INTEGER NOT NULL DEFAULT 0,
                credit_score INTEGER NOT NULL DEFAULT 0,
                meetings_attended INTEGER NOT NULL DEFAULT 0,
                meetings_held INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                joined_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS contributions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id INTEGER NOT NULL REFERENCES members(id),
                group_id INTEGER NOT NULL REFERENCES groups(id),
                amount INTEGER NOT NULL CHECK (amount > 0),
                status TEXT NOT NULL DEFAULT 'pending',
                payment_reference TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL,
                confirmed_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_contributions_group_status
             ON contributions(group_id, status)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS loans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES groups(id),
                borrower_id INTEGER NOT NULL REFERENCES members(id),
                principal INTEGER NOT NULL CHECK (principal > 0),
                interest_rate_bps INTEGER NOT NULL,
                duration_months INTEGER NOT NULL CHECK (duration_months >= 1),
                total_amount_due INTEGER NOT NULL,
                monthly_payment INTEGER NOT NULL,
                outstanding_balance INTEGER NOT NULL CHECK (outstanding_balance >= 0),
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS loan_repayments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                loan_id INTEGER NOT NULL REFERENCES loans(id),
                amount INTEGER NOT NULL CHECK (amount > 0),
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS approvals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES groups(id),
                kind TEXT NOT NULL,
                loan_id INTEGER REFERENCES loans(id),
                description TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                required_approvals INTEGER NOT NULL CHECK (required_approvals >= 1),
                approvals_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                CHECK (approvals_count <= required_approvals OR status != 'pending')
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS approval_signatures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                approval_id INTEGER NOT NULL REFERENCES approvals(id),
                signer_id INTEGER NOT NULL REFERENCES members(id),
                approved INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (approval_id, signer_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS idempotency_keys (
                op_kind TEXT NOT NULL,
                key TEXT NOT NULL,
                result INTEGER NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (op_kind, key)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL REFERENCES groups(id),
                delta INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                op_kind TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_entries_group
             ON ledger_entries(group_id, id)",
            [],
        )?;
        Ok(())
    }

    fn group_lock(&self, group_id: i64) -> Arc<Mutex<()>> {
        self.group_locks
            .lock()
            .entry(group_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` inside the group's exclusive lock and a SQLite transaction.
    /// The only path to balance mutation. Returns `LockContention` (retryable)
    /// when the lock cannot be acquired within the configured timeout.
    pub async fn with_group_tx<T, F>(&self, group_id: i64, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> LedgerResult<T>,
    {
        let lock = self.group_lock(group_id);
        let _guard = tokio::time::timeout(self.lock_timeout, lock.lock())
            .await
            .map_err(|_| LedgerError::LockContention { group_id })?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(out) => {
                tx.commit()?;
                Ok(out)
            }
            Err(e) => {
                // Drop rolls the transaction back; no partial state survives.
                Err(e)
            }
        }
    }

    // =========================================================================
    // BALANCE MUTATION (tx-scoped)
    // =========================================================================

    /// Apply a balance delta to a group, idempotent on `(op, key)`.
    ///
    /// Rejects a delta that would take the balance negative. On a replayed
    /// key, returns the previously recorded balance without re-applying.
    pub fn apply_balance_delta_tx(
        tx: &Transaction<'_>,
        group_id: i64,
        delta: Amount,
        op: OpKind,
        key: &str,
    ) -> LedgerResult<Amount> {
        if let Some(prior) = Self::applied_key_tx(tx, op, key)? {
            debug!(op = op.as_str(), key, prior, "idempotency key replayed");
            return Ok(prior);
        }

        let balance: Amount = tx
            .query_row(
                "SELECT balance FROM groups WHERE id = ?1",
                [group_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(LedgerError::UnknownGroup(group_id))?;

        let new_balance = balance + delta;
        if new_balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                group_id,
                balance,
                requested: -delta,
            });
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE groups SET balance = ?1 WHERE id = ?2",
            params![new_balance, group_id],
        )?;
        tx.execute(
            "INSERT INTO idempotency_keys (op_kind, key, result, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![op.as_str(), key, new_balance, &now],
        )?;
        tx.execute(
            "INSERT INTO ledger_entries (group_id, delta, balance_after, op_kind, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![group_id, delta, new_balance, op.as_str(), key, &now],
        )?;
        Ok(new_balance)
    }

    /// Recorded result for an already-applied idempotency key, if any.
    pub fn applied_key_tx(
        tx: &Transaction<'_>,
        op: OpKind,
        key: &str,
    ) -> LedgerResult<Option<Amount>> {
        let prior = tx
            .query_row(
                "SELECT result FROM idempotency_keys WHERE op_kind = ?1 AND key = ?2",
                params![op.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(prior)
    }

    /// Public narrow interface for a standalone balance delta, for callers
    /// that need nothing else in the transaction.
    pub async fn apply_balance_delta(
        &self,
        group_id: i64,
        delta: Amount,
        op: OpKind,
        key: &str,
    ) -> LedgerResult<Amount> {
        self.with_group_tx(group_id, |tx| {
            Self::apply_balance_delta_tx(tx, group_id, delta, op, key)
        })
        .await
    }

    // =========================================================================
    // GROUPS & MEMBERS
    // =========================================================================

    pub async fn create_group(
        &self,
        name: &str,
        contribution_amount: Amount,
        max_members: u32,
    ) -> LedgerResult<Group> {
        if contribution_amount <= 0 {
            return Err(LedgerError::InvalidAmount(contribution_amount));
        }
        let conn = self.conn.lock().await;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO groups (name, balance, idle_cash, contribution_amount, max_members, created_at)
             VALUES (?1, 0, 0, ?2, ?3, ?4)",
            params![name, contribution_amount, max_members, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(group_id = id, name, "group created");
        Ok(Group {
            id,
            name: name.to_string(),
            balance: 0,
            idle_cash: 0,
            contribution_amount,
            max_members,
            created_at: now,
        })
    }

    /// Add a member, enforcing the group's capacity against its active
    /// member count.
    pub async fn add_member(
        &self,
        group_id: i64,
        name: &str,
        role: MemberRole,
    ) -> LedgerResult<Member> {
        let name = name.to_string();
        self.with_group_tx(group_id, move |tx| {
            let group = group_tx(tx, group_id)?;
            let active: u32 = tx.query_row(
                "SELECT COUNT(*) FROM members WHERE group_id = ?1 AND active = 1",
                [group_id],
                |row| row.get(0),
            )?;
            if active >= group.max_members {
                return Err(LedgerError::GroupFull {
                    group_id,
                    max_members: group.max_members,
                });
            }
            let now = Utc::now();
            tx.execute(
                "INSERT INTO members (group_id, name, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group_id, &name, role.as_str(), now.to_rfc3339()],
            )?;
            let id = tx.last_insert_rowid();
            Ok(Member {
                id,
                group_id,
                name,
                role,
                contribution_share: 0,
                total_contributed: 0,
                credit_score: 0,
                meetings_attended: 0,
                meetings_held: 0,
                active: true,
                joined_at: now,
            })
        })
        .await
    }

    /// Soft-retire a member. History stays; the member drops out of share
    /// recomputation, signing, and borrowing. Remaining active members'
    /// shares are recomputed in the same transaction.
    pub async fn retire_member(&self, member_id: i64) -> LedgerResult<()> {
        let group_id = self.member_group_id(member_id).await?;
        self.with_group_tx(group_id, |tx| {
            tx.execute(
                "UPDATE members SET active = 0, contribution_share = 0 WHERE id = ?1",
                [member_id],
            )?;
            crate::shares::recalculate_tx(tx, group_id)?;
            Ok(())
        })
        .await
    }

    /// Hard delete is allowed only for members with no history at all.
    /// Contributions and approval signatures both count: every vote inside
    /// `approvals_count` must stay backed by a live signature row, so anyone
    /// who has signed is retired instead.
    pub async fn delete_member(&self, member_id: i64) -> LedgerResult<()> {
        let group_id = self.member_group_id(member_id).await?;
        self.with_group_tx(group_id, |tx| {
            let member = member_tx(tx, member_id)?;
            let signatures: u32 = tx.query_row(
                "SELECT COUNT(*) FROM approval_signatures WHERE signer_id = ?1",
                [member_id],
                |row| row.get(0),
            )?;
            if member.total_contributed > 0 || signatures > 0 {
                return Err(LedgerError::MemberHasHistory {
                    member_id,
                    total_contributed: member.total_contributed,
                    signatures,
                });
            }
            tx.execute("DELETE FROM members WHERE id = ?1", [member_id])?;
            Ok(())
        })
        .await
    }

    async fn member_group_id(&self, member_id: i64) -> LedgerResult<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT group_id FROM members WHERE id = ?1",
            [member_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(LedgerError::UnknownMember(member_id))
    }

    pub async fn get_group(&self, group_id: i64) -> LedgerResult<Group> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, balance, idle_cash, contribution_amount, max_members, created_at
             FROM groups WHERE id = ?1",
            [group_id],
            row_to_group,
        )
        .optional()?
        .ok_or(LedgerError::UnknownGroup(group_id))
    }

    pub async fn list_groups(&self) -> LedgerResult<Vec<Group>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, balance, idle_cash, contribution_amount, max_members, created_at
             FROM groups ORDER BY id ASC",
        )?;
        let groups = stmt
            .query_map([], row_to_group)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    pub async fn get_member(&self, member_id: i64) -> LedgerResult<Member> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, group_id, name, role, contribution_share, total_contributed,
                    credit_score, meetings_attended, meetings_held, active, joined_at
             FROM members WHERE id = ?1",
            [member_id],
            row_to_member,
        )
        .optional()?
        .ok_or(LedgerError::UnknownMember(member_id))
    }

    pub async fn list_active_members(&self, group_id: i64) -> LedgerResult<Vec<Member>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_id, name, role, contribution_share, total_contributed,
                    credit_score, meetings_attended, meetings_held, active, joined_at
             FROM members WHERE group_id = ?1 AND active = 1 ORDER BY id ASC",
        )?;
        let members = stmt
            .query_map([group_id], row_to_member)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    pub async fn list_all_members(&self) -> LedgerResult<Vec<Member>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_id, name, role, contribution_share, total_contributed,
                    credit_score, meetings_attended, meetings_held, active, joined_at
             FROM members ORDER BY id ASC",
        )?;
        let members = stmt
            .query_map([], row_to_member)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    /// Meeting attendance is written by the (out-of-scope) meetings
    /// component; the credit scorer only reads it.
    pub async fn record_attendance(&self, member_id: i64, attended: bool) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE members SET meetings_held = meetings_held + 1,
                    meetings_attended = meetings_attended + ?1
             WHERE id = ?2",
            params![attended as i64, member_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::UnknownMember(member_id));
        }
        Ok(())
    }

    // =========================================================================
    // CONTRIBUTIONS
    // =========================================================================

    /// Record a pending contribution from a payment-gateway notification.
    /// The external payment reference is the uniqueness anchor; a duplicate
    /// reference is rejected here, before any state exists.
    pub async fn record_contribution(
        &self,
        member_id: i64,
        amount: Amount,
        payment_reference: &str,
    ) -> LedgerResult<Contribution> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let group_id = self.member_group_id(member_id).await?;
        let reference = payment_reference.trim().to_string();
        self.with_group_tx(group_id, move |tx| {
            let member = member_tx(tx, member_id)?;
            if !member.active {
                return Err(LedgerError::MemberRetired(member_id));
            }
            let now = Utc::now();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO contributions
                     (member_id, group_id, amount, status, payment_reference, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
                params![member_id, group_id, amount, &reference, now.to_rfc3339()],
            )?;
            if inserted == 0 {
                return Err(LedgerError::DuplicateReference(reference));
            }
            Ok(Contribution {
                id: tx.last_insert_rowid(),
                member_id,
                group_id,
                amount,
                status: ContributionStatus::Pending,
                payment_reference: reference,
                created_at: now,
                confirmed_at: None,
            })
        })
        .await
    }

    pub async fn get_contribution(&self, contribution_id: i64) -> LedgerResult<Contribution> {
        let conn = self.conn.lock().await;
        contribution_opt(&conn, contribution_id)?
            .ok_or(LedgerError::UnknownContribution(contribution_id))
    }

    // =========================================================================
    // LOANS & APPROVALS (row access; transitions live in their engines)
    // =========================================================================

    pub async fn get_loan(&self, loan_id: i64) -> LedgerResult<Loan> {
        let conn = self.conn.lock().await;
        loan_opt(&conn, loan_id)?.ok_or(LedgerError::UnknownLoan(loan_id))
    }

    pub async fn get_approval(&self, approval_id: i64) -> LedgerResult<DisbursementApproval> {
        let conn = self.conn.lock().await;
        approval_opt(&conn, approval_id)?.ok_or(LedgerError::UnknownApproval(approval_id))
    }

    pub async fn list_signatures(&self, approval_id: i64) -> LedgerResult<Vec<ApprovalSignature>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, approval_id, signer_id, approved, created_at
             FROM approval_signatures WHERE approval_id = ?1 ORDER BY id ASC",
        )?;
        let sigs = stmt
            .query_map([approval_id], row_to_signature)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sigs)
    }

    pub async fn list_repayments(&self, loan_id: i64) -> LedgerResult<Vec<LoanRepayment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, loan_id, amount, status, created_at
             FROM loan_repayments WHERE loan_id = ?1 ORDER BY id ASC",
        )?;
        let reps = stmt
            .query_map([loan_id], row_to_repayment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reps)
    }

    // =========================================================================
    // BATCH READ / DERIVED-FIELD WRITE (no group locks held)
    // =========================================================================

    /// Sum of confirmed contributions older than `cutoff` for a group.
    pub async fn confirmed_contributions_before(
        &self,
        group_id: i64,
        cutoff: DateTime<Utc>,
    ) -> LedgerResult<Amount> {
        let conn = self.conn.lock().await;
        let total: Option<Amount> = conn.query_row(
            "SELECT SUM(amount) FROM contributions
             WHERE group_id = ?1 AND status = 'confirmed' AND confirmed_at <= ?2",
            params![group_id, cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    /// Idempotent overwrite of a group's derived idle-cash figure.
    pub async fn set_idle_cash(&self, group_id: i64, idle_cash: Amount) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE groups SET idle_cash = ?1 WHERE id = ?2",
            params![idle_cash, group_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::UnknownGroup(group_id));
        }
        Ok(())
    }

    /// Idempotent overwrite of a member's derived credit score.
    pub async fn set_credit_score(&self, member_id: i64, score: u8) -> LedgerResult<()> {
        debug_assert!(score <= 100);
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE members SET credit_score = ?1 WHERE id = ?2",
            params![score as i64, member_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::UnknownMember(member_id));
        }
        Ok(())
    }

    /// Count of a member's confirmed contributions, for the credit scorer.
    pub async fn confirmed_contribution_count(&self, member_id: i64) -> LedgerResult<u32> {
        let conn = self.conn.lock().await;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM contributions WHERE member_id = ?1 AND status = 'confirmed'",
            [member_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Per-member repayment history inputs: (repaid_total, scheduled_total)
    /// across loans that reached disbursement.
    pub async fn repayment_history(&self, member_id: i64) -> LedgerResult<(Amount, Amount)> {
        let conn = self.conn.lock().await;
        let repaid: Option<Amount> = conn.query_row(
            "SELECT SUM(r.amount) FROM loan_repayments r
             JOIN loans l ON l.id = r.loan_id
             WHERE l.borrower_id = ?1 AND r.status = 'completed'",
            [member_id],
            |row| row.get(0),
        )?;
        let scheduled: Option<Amount> = conn.query_row(
            "SELECT SUM(total_amount_due) FROM loans
             WHERE borrower_id = ?1
               AND status IN ('disbursed', 'active', 'completed', 'defaulted')",
            [member_id],
            |row| row.get(0),
        )?;
        Ok((repaid.unwrap_or(0), scheduled.unwrap_or(0)))
    }

    /// Append-only journal rows for a group, oldest first.
    pub async fn ledger_entries(&self, group_id: i64, limit: usize) -> LedgerResult<Vec<LedgerEntryRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_id, delta, balance_after, op_kind, idempotency_key, created_at
             FROM ledger_entries WHERE group_id = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![group_id, limit.min(10_000) as i64], |row| {
                Ok(LedgerEntryRow {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    delta: row.get(2)?,
                    balance_after: row.get(3)?,
                    op_kind: row.get(4)?,
                    idempotency_key: row.get(5)?,
                    created_at: parse_ts(6, row.get(6)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// One row of the append-only balance journal.
#[derive(Debug, Clone)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub group_id: i64,
    pub delta: Amount,
    pub balance_after: Amount,
    pub op_kind: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// TX-SCOPED ROW ACCESS (shared by the engines running inside with_group_tx)
// =============================================================================

pub fn group_tx(conn: &Connection, group_id: i64) -> LedgerResult<Group> {
    conn.query_row(
        "SELECT id, name, balance, idle_cash, contribution_amount, max_members, created_at
         FROM groups WHERE id = ?1",
        [group_id],
        row_to_group,
    )
    .optional()?
    .ok_or(LedgerError::UnknownGroup(group_id))
}

pub fn member_tx(conn: &Connection, member_id: i64) -> LedgerResult<Member> {
    conn.query_row(
        "SELECT id, group_id, name, role, contribution_share, total_contributed,
                credit_score, meetings_attended, meetings_held, active, joined_at
         FROM members WHERE id = ?1",
        [member_id],
        row_to_member,
    )
    .optional()?
    .ok_or(LedgerError::UnknownMember(member_id))
}

pub fn contribution_tx(conn: &Connection, contribution_id: i64) -> LedgerResult<Contribution> {
    contribution_opt(conn, contribution_id)?
        .ok_or(LedgerError::UnknownContribution(contribution_id))
}

pub fn loan_tx(conn: &Connection, loan_id: i64) -> LedgerResult<Loan> {
    loan_opt(conn, loan_id)?.ok_or(LedgerError::UnknownLoan(loan_id))
}

pub fn approval_tx(conn: &Connection, approval_id: i64) -> LedgerResult<DisbursementApproval> {
    approval_opt(conn, approval_id)?.ok_or(LedgerError::UnknownApproval(approval_id))
}

fn contribution_opt(conn: &Connection, id: i64) -> LedgerResult<Option<Contribution>> {
    Ok(conn
        .query_row(
            "SELECT id, member_id, group_id, amount, status, payment_reference, created_at, confirmed_at
             FROM contributions WHERE id = ?1",
            [id],
            row_to_contribution,
        )
        .optional()?)
}

fn loan_opt(conn: &Connection, id: i64) -> LedgerResult<Option<Loan>> {
    Ok(conn
        .query_row(
            "SELECT id, group_id, borrower_id, principal, interest_rate_bps, duration_months,
                    total_amount_due, monthly_payment, outstanding_balance, status, created_at
             FROM loans WHERE id = ?1",
            [id],
            row_to_loan,
        )
        .optional()?)
}

fn approval_opt(conn: &Connection, id: i64) -> LedgerResult<Option<DisbursementApproval>> {
    Ok(conn
        .query_row(
            "SELECT id, group_id, kind, loan_id, description, amount, required_approvals,
                    approvals_count, status, created_at
             FROM approvals WHERE id = ?1",
            [id],
            row_to_approval,
        )
        .optional()?)
}

// =============================================================================
// ROW MAPPERS
// =============================================================================

fn bad_col(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| bad_col(idx, format!("bad timestamp {:?}: {}", s, e)))
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        balance: row.get(2)?,
        idle_cash: row.get(3)?,
        contribution_amount: row.get(4)?,
        max_members: row.get(5)?,
        created_at: parse_ts(6, row.get(6)?)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let role_str: String = row.get(3)?;
    let role = MemberRole::parse_str(&role_str)
        .ok_or_else(|| bad_col(3, format!("bad role {:?}", role_str)))?;
    Ok(Member {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        role,
        contribution_share: row.get(4)?,
        total_contributed: row.get(5)?,
        credit_score: row.get::<_, i64>(6)? as u8,
        meetings_attended: row.get(7)?,
        meetings_held: row.get(8)?,
        active: row.get::<_, i64>(9)? == 1,
        joined_at: parse_ts(10, row.get(10)?)?,
    })
}

fn row_to_contribution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contribution> {
    let status_str: String = row.get(4)?;
    let status = ContributionStatus::parse_str(&status_str)
        .ok_or_else(|| bad_col(4, format!("bad contribution status {:?}", status_str)))?;
    let confirmed_at = match row.get::<_, Option<String>>(7)? {
        Some(s) => Some(parse_ts(7, s)?),
        None => None,
    };
    Ok(Contribution {
        id: row.get(0)?,
        member_id: row.get(1)?,
        group_id: row.get(2)?,
        amount: row.get(3)?,
        status,
        payment_reference: row.get(5)?,
        created_at: parse_ts(6, row.get(6)?)?,
        confirmed_at,
    })
}

fn row_to_loan(row: &rusqlite::Row<'_>) -> rusqlite::Result<Loan> {
    let status_str: String = row.get(9)?;
    let status = LoanStatus::parse_str(&status_str)
        .ok_or_else(|| bad_col(9, format!("bad loan status {:?}", status_str)))?;
    Ok(Loan {
        id: row.get(0)?,
        group_id: row.get(1)?,
        borrower_id: row.get(2)?,
        principal: row.get(3)?,
        interest_rate_bps: row.get(4)?,
        duration_months: row.get(5)?,
        total_amount_due: row.get(6)?,
        monthly_payment: row.get(7)?,
        outstanding_balance: row.get(8)?,
        status,
        created_at: parse_ts(10, row.get(10)?)?,
    })
}

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<DisbursementApproval> {
    let kind_str: String = row.get(2)?;
    let kind = DisbursementKind::parse_str(&kind_str)
        .ok_or_else(|| bad_col(2, format!("bad disbursement kind {:?}", kind_str)))?;
    let status_str: String = row.get(8)?;
    let status = ApprovalStatus::parse_str(&status_str)
        .ok_or_else(|| bad_col(8, format!("bad approval status {:?}", status_str)))?;
    Ok(DisbursementApproval {
        id: row.get(0)?,
        group_id: row.get(1)?,
        kind,
        loan_id: row.get(3)?,
        description: row.get(4)?,
        amount: row.get(5)?,
        required_approvals: row.get(6)?,
        approvals_count: row.get(7)?,
        status,
        created_at: parse_ts(9, row.get(9)?)?,
    })
}

fn row_to_signature(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalSignature> {
    Ok(ApprovalSignature {
        id: row.get(0)?,
        approval_id: row.get(1)?,
        signer_id: row.get(2)?,
        approved: row.get::<_, i64>(3)? == 1,
        created_at: parse_ts(4, row.get(4)?)?,
    })
}

// Repayment rows are read both inside engine transactions and from batch jobs.
fn row_to_repayment(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoanRepayment> {
    let status_str: String = row.get(3)?;
    let status = RepaymentStatus::parse_str(&status_str)
        .ok_or_else(|| bad_col(3, format!("bad repayment status {:?}", status_str)))?;
    Ok(LoanRepayment {
        id: row.get(0)?,
        loan_id: row.get(1)?,
        amount: row.get(2)?,
        status,
        created_at: parse_ts(4, row.get(4)?)?,
    })
}
