//! Domain entities for the pooled-fund ledger.
//!
//! Statuses and roles are closed enums, stored as TEXT in SQLite via
//! `as_str`/`parse_str` pairs. Monetary fields are fixed-point cents
//! (`money::Amount`); ownership is nano-shares (`money::ShareFraction`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Amount, RateBps, ShareFraction};

/// Member role within a group. Closed set; governance logic lives upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Chair,
    Treasurer,
    Secretary,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Chair => "chair",
            MemberRole::Treasurer => "treasurer",
            MemberRole::Secretary => "secretary",
            MemberRole::Member => "member",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "chair" => Some(MemberRole::Chair),
            "treasurer" => Some(MemberRole::Treasurer),
            "secretary" => Some(MemberRole::Secretary),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Confirmed,
    Failed,
    Reversed,
}

impl ContributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionStatus::Pending => "pending",
            ContributionStatus::Confirmed => "confirmed",
            ContributionStatus::Failed => "failed",
            ContributionStatus::Reversed => "reversed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ContributionStatus::Pending),
            "confirmed" => Some(ContributionStatus::Confirmed),
            "failed" => Some(ContributionStatus::Failed),
            "reversed" => Some(ContributionStatus::Reversed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    Active,
    Completed,
    Defaulted,
    Rejected,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Rejected => "rejected",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LoanStatus::Pending),
            "approved" => Some(LoanStatus::Approved),
            "disbursed" => Some(LoanStatus::Disbursed),
            "active" => Some(LoanStatus::Active),
            "completed" => Some(LoanStatus::Completed),
            "defaulted" => Some(LoanStatus::Defaulted),
            "rejected" => Some(LoanStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal states accept no further repayments or transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::Defaulted | LoanStatus::Rejected
        )
    }

    /// States in which repayments are accepted.
    pub fn accepts_repayment(&self) -> bool {
        matches!(self, LoanStatus::Disbursed | LoanStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Pending => "pending",
            RepaymentStatus::Completed => "completed",
            RepaymentStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RepaymentStatus::Pending),
            "completed" => Some(RepaymentStatus::Completed),
            "failed" => Some(RepaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// A savings group (chama). `balance` is mutated only through the ledger
/// store; `idle_cash` is derived by the idle-cash scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub balance: Amount,
    pub idle_cash: Amount,
    pub contribution_amount: Amount,
    pub max_members: u32,
    pub created_at: DateTime<Utc>,
}

/// A group member. Soft-retired members keep their history but are excluded
/// from share recomputation and may not sign or borrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub role: MemberRole,
    pub contribution_share: ShareFraction,
    pub total_contributed: Amount,
    pub credit_score: u8,
    pub meetings_attended: u32,
    pub meetings_held: u32,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: i64,
    pub member_id: i64,
    pub group_id: i64,
    pub amount: Amount,
    pub status: ContributionStatus,
    /// Unique reference from the payment gateway; idempotency anchor.
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub group_id: i64,
    pub borrower_id: i64,
    pub principal: Amount,
    pub interest_rate_bps: RateBps,
    pub duration_months: u32,
    pub total_amount_due: Amount,
    pub monthly_payment: Amount,
    pub outstanding_balance: Amount,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub id: i64,
    pub loan_id: i64,
    pub amount: Amount,
    pub status: RepaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// What a disbursement approval pays out once quorum is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisbursementKind {
    Expense,
    Loan,
}

impl DisbursementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementKind::Expense => "expense",
            DisbursementKind::Loan => "loan",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "expense" => Some(DisbursementKind::Expense),
            "loan" => Some(DisbursementKind::Loan),
            _ => None,
        }
    }
}

/// A disbursement gated behind a quorum of independent signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementApproval {
    pub id: i64,
    pub group_id: i64,
    pub kind: DisbursementKind,
    /// Present when `kind == Loan`; the loan to disburse on quorum.
    pub loan_id: Option<i64>,
    pub description: String,
    pub amount: Amount,
    pub required_approvals: u32,
    pub approvals_count: u32,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSignature {
    pub id: i64,
    pub approval_id: i64,
    pub signer_id: i64,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}
