//! Chamaledger: pooled-fund accounting for member savings groups.
//!
//! Records contributions, amortizes loans, gates disbursements behind
//! multi-signature approvals, and keeps each member's proportional stake and
//! credit score current. The HTTP surface, authentication, and payment
//! gateway integration live elsewhere; this crate is the ledger they call.

pub mod approvals;
pub mod batch;
pub mod config;
pub mod contributions;
pub mod events;
pub mod ledger;
pub mod loans;
pub mod models;
pub mod money;
pub mod retry;
pub mod shares;

#[cfg(test)]
mod scenario_tests;
