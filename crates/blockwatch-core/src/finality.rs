//! Finality and gap arithmetic over block numbers.
//!
//! These are pure functions of the key space so every backend agrees on
//! which blocks are final and which are missing.

/// Confirmation distance from the chain head beyond which a block is final.
pub const FINALITY_DEPTH: i64 = 20;

/// Blocks with `number < finality_threshold(head)` are final.
pub fn finality_threshold(chain_head: i64) -> i64 {
    chain_head.saturating_sub(FINALITY_DEPTH)
}

/// Returns `true` if block `number` is final given `chain_head`.
pub fn is_final_at(number: i64, chain_head: i64) -> bool {
    number < finality_threshold(chain_head)
}

/// Ascending numbers in `[start, end]` for which `is_present` is false.
///
/// Runs in time proportional to the range. Returns an empty vec when
/// `start > end`.
pub fn missing_in_range(start: i64, end: i64, mut is_present: impl FnMut(i64) -> bool) -> Vec<i64> {
    if start > end {
        return vec![];
    }
    (start..=end).filter(|n| !is_present(*n)).collect()
}
