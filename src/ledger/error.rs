//! Ledger error taxonomy.
//!
//! Four classes, each handled differently by callers:
//! - validation: rejected up front, no side effects
//! - conflict: retryable with backoff (`is_retryable`)
//! - invariant: would break an accounting invariant, never clamped silently
//! - duplicate delivery: a replayed idempotency key or an already-signed
//!   signer returns the prior result as a normal outcome at the operation
//!   layer; only a duplicate external payment reference is rejected here,
//!   because no prior state exists to return

use crate::models::{ContributionStatus, LoanStatus};
use crate::money::Amount;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // --- validation ---
    UnknownGroup(i64),
    UnknownMember(i64),
    UnknownContribution(i64),
    UnknownLoan(i64),
    UnknownApproval(i64),
    /// Amount must be strictly positive.
    InvalidAmount(Amount),
    /// A quorum must require at least one signature.
    InvalidQuorum(u32),
    /// Operation not legal from the entity's current status.
    InvalidContributionState(ContributionStatus),
    InvalidLoanState(LoanStatus),
    /// Group already has `max_members` active members.
    GroupFull { group_id: i64, max_members: u32 },
    /// Retired members may not contribute, borrow, or sign.
    MemberRetired(i64),
    /// Hard delete refused; history-bearing members are retired instead.
    /// Approval signatures are history too: a recorded vote must keep its
    /// signature row.
    MemberHasHistory { member_id: i64, total_contributed: Amount, signatures: u32 },
    /// Signer does not belong to the approval's group.
    SignerNotInGroup { approval_id: i64, signer_id: i64 },

    // --- concurrency conflict (retryable) ---
    LockContention { group_id: i64 },

    // --- invariant violations ---
    InsufficientFunds { group_id: i64, balance: Amount, requested: Amount },
    OverpaymentRejected { loan_id: i64, outstanding: Amount, offered: Amount },

    // --- duplicate delivery ---
    /// External payment reference already attached to another contribution.
    DuplicateReference(String),

    // --- storage ---
    Storage(String),
}

impl LedgerError {
    /// Conflicts are worth retrying with backoff; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockContention { .. })
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownGroup(id) => write!(f, "unknown group {}", id),
            Self::UnknownMember(id) => write!(f, "unknown member {}", id),
            Self::UnknownContribution(id) => write!(f, "unknown contribution {}", id),
            Self::UnknownLoan(id) => write!(f, "unknown loan {}", id),
            Self::UnknownApproval(id) => write!(f, "unknown approval {}", id),
            Self::InvalidAmount(a) => write!(f, "amount must be positive, got {}", a),
            Self::InvalidQuorum(n) => {
                write!(f, "required approvals must be at least 1, got {}", n)
            }
            Self::InvalidContributionState(s) => {
                write!(f, "contribution is {} here", s.as_str())
            }
            Self::InvalidLoanState(s) => write!(f, "loan is {} here", s.as_str()),
            Self::GroupFull { group_id, max_members } => {
                write!(f, "group {} already has {} active members", group_id, max_members)
            }
            Self::MemberRetired(id) => write!(f, "member {} is retired", id),
            Self::MemberHasHistory { member_id, total_contributed, signatures } => write!(
                f,
                "member {} has history ({} cents contributed, {} approval signatures); retire instead of delete",
                member_id, total_contributed, signatures
            ),
            Self::SignerNotInGroup { approval_id, signer_id } => {
                write!(f, "signer {} is not in approval {}'s group", signer_id, approval_id)
            }
            Self::LockContention { group_id } => {
                write!(f, "could not acquire lock for group {} in time", group_id)
            }
            Self::InsufficientFunds { group_id, balance, requested } => write!(
                f,
                "group {} balance {} cents cannot cover {} cents",
                group_id, balance, requested
            ),
            Self::OverpaymentRejected { loan_id, outstanding, offered } => write!(
                f,
                "repayment of {} cents exceeds loan {}'s outstanding {} cents; split the payment",
                offered, loan_id, outstanding
            ),
            Self::DuplicateReference(r) => {
                write!(f, "payment reference {} already recorded", r)
            }
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
