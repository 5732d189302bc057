//! Scheduled batch jobs.
//!
//! Credit scoring and idle-cash scanning run on a fixed cadence, outside
//! any live transaction. Both are idempotent overwrites of derived fields
//! and re-runnable at will; a failure for one group or member is logged and
//! skipped, never aborting the rest of the pass.

pub mod credit_score;
pub mod idle_cash;
pub mod scheduler;

pub use credit_score::CreditScoringEngine;
pub use idle_cash::IdleCashScanner;
pub use scheduler::spawn_batch_jobs;
