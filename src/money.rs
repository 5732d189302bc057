//! Fixed-Point Monetary Amounts and Share Fractions
//!
//! All accounting state is kept in scaled integers. Floating point is not
//! used anywhere balances or ownership shares are computed, because the
//! sum-to-one share invariant and non-negative balance invariant are asserted
//! exactly in tests.
//!
//! - `Amount`: currency in cents (scale 100). Stored as SQLite INTEGER.
//! - `ShareFraction`: ownership fraction scaled by 1e9 (nano-shares), so a
//!   group's active shares sum to exactly `SHARE_SCALE` whenever anyone has
//!   contributed.
//!
//! Intermediate arithmetic widens to i128 to avoid overflow on
//! `total * SHARE_SCALE` style products.

use serde::{Deserialize, Serialize};

/// Currency amount in cents.
pub type Amount = i64;

/// Conversion factor: 1 currency unit = 100 cents.
pub const AMOUNT_SCALE: i64 = 100;

/// Ownership fraction scaled to nano-shares. A full share (1.0) is `SHARE_SCALE`.
pub type ShareFraction = i64;

/// One whole share in nano-units.
pub const SHARE_SCALE: i64 = 1_000_000_000;

/// Interest rate in basis points (1% = 100 bps).
pub type RateBps = i64;

/// Convert whole currency units to cents.
#[inline]
pub fn amount_from_units(units: i64) -> Amount {
    units * AMOUNT_SCALE
}

/// Display helper: cents to a "1234.56" string. Never used in arithmetic.
pub fn format_amount(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.abs();
    format!("{}{}.{:02}", sign, abs / AMOUNT_SCALE, abs % AMOUNT_SCALE)
}

/// `value * numer / denom` with round-half-up, widened to i128.
///
/// Used for interest (`principal * rate_bps / 10_000`) and share math.
/// `denom` must be positive.
#[inline]
pub fn mul_div_round(value: i64, numer: i64, denom: i64) -> i64 {
    debug_assert!(denom > 0);
    let prod = value as i128 * numer as i128;
    let denom = denom as i128;
    let half = denom / 2;
    let rounded = if prod >= 0 {
        (prod + half) / denom
    } else {
        (prod - half) / denom
    };
    rounded as i64
}

/// `value / denom` rounded up. Used for the fixed monthly payment so the
/// final scheduled payment is never short.
#[inline]
pub fn div_ceil(value: i64, denom: i64) -> i64 {
    debug_assert!(value >= 0 && denom > 0);
    (value + denom - 1) / denom
}

/// Result of an amortization computation, fixed at application time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmortizationTerms {
    pub total_amount_due: Amount,
    pub monthly_payment: Amount,
}

/// Compute fixed amortization terms: simple interest added up front, equal
/// monthly installments. `months` must be >= 1.
pub fn amortize(principal: Amount, rate_bps: RateBps, months: u32) -> AmortizationTerms {
    debug_assert!(principal > 0 && months >= 1);
    let interest = mul_div_round(principal, rate_bps, 10_000);
    let total_amount_due = principal + interest;
    AmortizationTerms {
        total_amount_due,
        monthly_payment: div_ceil(total_amount_due, months as i64),
    }
}
