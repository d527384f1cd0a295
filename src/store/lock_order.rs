//! Deadlock-avoidance lock ordering
//!
//! Every transaction that locks account rows requests them in ascending
//! account id. For any pair of accounts the acquisition order is then the
//! same whatever the transfer direction, so two transfers over that pair
//! can never each hold one row while waiting for the other.
//!
//! # Limitation
//!
//! The ordering only protects writers that follow it. A code path that locks
//! account rows in another order (or locks other tables first) can still join
//! a wait cycle of three or more transactions. Such cycles are neither
//! detected nor broken here; the database deadlock detector aborts one
//! participant and its error reaches the caller unchanged.

use std::cmp::Reverse;

use super::models::BalanceDelta;

/// `(min(a, b), max(a, b))`
#[inline]
pub fn ordered_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Indices into `deltas` in the order their rows must be locked.
///
/// Ascending account id. Equal ids go in reverse input order, so a
/// self-transfer `[debit, credit]` applies the credit first, the same as any
/// transfer whose source id is not smaller than its destination id.
pub fn lock_order(deltas: &[BalanceDelta]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..deltas.len()).collect();
    order.sort_by_key(|&i| (deltas[i].account_id, Reverse(i)));
    order
}
