//! Share Recalculation Engine.
//!
//! Recomputes each active member's proportional ownership after any
//! balance-affecting event. Runs inside the same transaction as the event
//! that triggered it, so no reader ever observes shares mid-update.
//!
//! Arithmetic is pure fixed point: each share is
//! `total_contributed * SHARE_SCALE / sum_total` rounded down, and the
//! leftover nano-share units are handed out by largest remainder so active
//! shares sum to exactly `SHARE_SCALE` whenever `sum_total > 0`.

use rusqlite::{params, Connection};

use crate::ledger::LedgerResult;
use crate::money::{Amount, ShareFraction, SHARE_SCALE};

/// Recompute `contribution_share` for every active member of a group.
/// Inactive (retired) members keep a zero share and are excluded from the
/// denominator.
pub fn recalculate_tx(conn: &Connection, group_id: i64) -> LedgerResult<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, total_contributed FROM members
         WHERE group_id = ?1 AND active = 1 ORDER BY id ASC",
    )?;
    let members: Vec<(i64, Amount)> = stmt
        .query_map([group_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let totals: Vec<Amount> = members.iter().map(|(_, t)| *t).collect();
    let shares = split_shares(&totals);

    for ((member_id, _), share) in members.iter().zip(shares.iter()) {
        conn.execute(
            "UPDATE members SET contribution_share = ?1 WHERE id = ?2",
            params![share, member_id],
        )?;
    }
    Ok(())
}

/// Pure share split: proportional fixed-point shares summing to exactly
/// `SHARE_SCALE` (or all zero when nothing has been contributed).
pub fn split_shares(totals: &[Amount]) -> Vec<ShareFraction> {
    let sum_total: i128 = totals.iter().map(|&t| t as i128).sum();
    if sum_total <= 0 {
        return vec![0; totals.len()];
    }

    // Floor division first, then distribute the remainder to the largest
    // fractional parts so the total is exact.
    let mut shares: Vec<ShareFraction> = Vec::with_capacity(totals.len());
    let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(totals.len());
    let mut assigned: i128 = 0;
    for (i, &total) in totals.iter().enumerate() {
        let scaled = total as i128 * SHARE_SCALE as i128;
        let share = scaled / sum_total;
        shares.push(share as ShareFraction);
        remainders.push((i, scaled % sum_total));
        assigned += share;
    }

    let mut leftover = SHARE_SCALE as i128 - assigned;
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in remainders {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::amount_from_units;

    #[test]
    fn shares_sum_to_exactly_one() {
        let totals = vec![
            amount_from_units(3_000),
            amount_from_units(7_000),
            amount_from_units(1),
        ];
        let shares = split_shares(&totals);
        assert_eq!(shares.iter().sum::<i64>(), SHARE_SCALE);
    }

    #[test]
    fn shares_are_proportional() {
        // 5000 / 12000 and 7000 / 12000
        let shares = split_shares(&[amount_from_units(5_000), amount_from_units(7_000)]);
        assert_eq!(shares.iter().sum::<i64>(), SHARE_SCALE);
        // 5/12 = 0.41666..., within one nano-share of exact
        assert!((shares[0] - 416_666_667).abs() <= 1, "got {}", shares[0]);
        assert!((shares[1] - 583_333_333).abs() <= 1, "got {}", shares[1]);
    }

    #[test]
    fn zero_total_means_zero_shares() {
        assert_eq!(split_shares(&[0, 0, 0]), vec![0, 0, 0]);
        assert_eq!(split_shares(&[]), Vec::<i64>::new());
    }

    #[test]
    fn awkward_thirds_still_sum_exactly() {
        let shares = split_shares(&[100, 100, 100]);
        assert_eq!(shares.iter().sum::<i64>(), SHARE_SCALE);
        // each within one unit of a third
        for s in shares {
            assert!((s - SHARE_SCALE / 3).abs() <= 1);
        }
    }
}
