//! Absolute and relative lock-time evaluation.
//!
//! A transaction's `lock_time` is an absolute restriction: below
//! [`LOCK_TIME_THRESHOLD`] it names a block height, above it a UNIX
//! timestamp. Input `sequence` fields additionally encode relative
//! restrictions evaluated against the heights and median times of the
//! blocks that created the spent coins.

use crate::tx::{Transaction, SEQUENCE_FINAL};

/// Lock-time values below this threshold are block heights, values at or
/// above it are UNIX timestamps
pub const LOCK_TIME_THRESHOLD: u64 = 500_000_000;

/// When set, the input's sequence imposes no relative lock
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u64 = 1 << 31;
/// When set, the relative lock is time-based rather than height-based
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u64 = 1 << 22;
/// Extracts the lock value from a sequence field
pub const SEQUENCE_LOCKTIME_MASK: u64 = 0x0000_ffff;
/// Time-based locks advance in units of 2^9 = 512 seconds
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// A pair of thresholds a chain position must exceed for the relative
/// locks of a transaction to be satisfied. `-1` semantics are expressed
/// with `None` (no restriction of that kind).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceLock {
    pub min_height: Option<u64>,
    pub min_time: Option<u64>,
}

impl SequenceLock {
    /// Tests the lock against a candidate chain position. `height` is the
    /// height of the block that would contain the spend, `median_time` the
    /// median-time-past of its parent.
    pub fn is_satisfied_by(&self, height: u64, median_time: u64) -> bool {
        if let Some(min_height) = self.min_height {
            if min_height >= height {
                return false;
            }
        }
        if let Some(min_time) = self.min_time {
            if min_time >= median_time {
                return false;
            }
        }
        true
    }
}

/// Checks absolute finality of a transaction at the given chain position
pub fn is_final(tx: &Transaction, height: u64, block_time: u64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCK_TIME_THRESHOLD { height } else { block_time };
    if tx.lock_time < threshold {
        return true;
    }
    // A reached lock time is ignored when every input opted out
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Computes the combined relative lock of a transaction.
/// `prev_heights[i]` is the height of the block that created input `i`'s
/// coin (for in-pool parents callers pass the next block height), and
/// `median_time_at` resolves a height to the median-time-past of the block
/// preceding that height.
pub fn calculate_sequence_lock(
    tx: &Transaction,
    prev_heights: &[u64],
    median_time_at: impl Fn(u64) -> u64,
) -> SequenceLock {
    debug_assert_eq!(prev_heights.len(), tx.inputs.len());
    let mut lock = SequenceLock::default();
    // Relative locks were introduced with transaction version 2
    if tx.version < 2 {
        return lock;
    }
    for (input, prev_height) in tx.inputs.iter().zip(prev_heights.iter().copied()) {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        let value = input.sequence & SEQUENCE_LOCKTIME_MASK;
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            // Time-based: measured from the median time of the block
            // preceding the coin's creation
            let base_time = median_time_at(prev_height);
            let min_time = base_time + (value << SEQUENCE_LOCKTIME_GRANULARITY) - 1;
            lock.min_time = Some(lock.min_time.map_or(min_time, |t| t.max(min_time)));
        } else {
            let min_height = prev_height + value - 1;
            lock.min_height = Some(lock.min_height.map_or(min_height, |h| h.max(min_height)));
        }
    }
    lock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{ScriptPublicKey, TransactionInput, TransactionOutpoint, TransactionOutput};

    fn locked_tx(version: u32, sequence: u64, prev_height: u64) -> (Transaction, Vec<u64>) {
        let tx = Transaction::new(
            version,
            vec![TransactionInput::new(TransactionOutpoint::new(1.into(), 0), vec![], sequence, 1)],
            vec![TransactionOutput::new(100, ScriptPublicKey::default())],
            0,
        );
        (tx, vec![prev_height])
    }

    #[test]
    fn absolute_finality() {
        let mut tx = Transaction::new(1, vec![], vec![], 0);
        assert!(is_final(&tx, 100, 1_600_000_000));

        tx.lock_time = 150;
        assert!(!is_final(&tx, 100, 1_600_000_000));
        assert!(!is_final(&tx, 150, 1_600_000_000));
        assert!(is_final(&tx, 151, 1_600_000_000));

        tx.lock_time = 1_600_000_500;
        assert!(!is_final(&tx, 151, 1_600_000_000));
        assert!(is_final(&tx, 151, 1_600_000_501));
    }

    #[test]
    fn final_sequences_override_lock_time() {
        let tx = Transaction::new(
            1,
            vec![TransactionInput::new(TransactionOutpoint::new(1.into(), 0), vec![], SEQUENCE_FINAL, 1)],
            vec![],
            u64::MAX - 1,
        );
        assert!(is_final(&tx, 0, 0));
    }

    #[test]
    fn height_based_sequence_lock() {
        let (tx, prev_heights) = locked_tx(2, 10, 100);
        let lock = calculate_sequence_lock(&tx, &prev_heights, |_| 0);
        assert_eq!(lock.min_height, Some(109));
        assert!(!lock.is_satisfied_by(109, 0));
        assert!(lock.is_satisfied_by(110, 0));
    }

    #[test]
    fn time_based_sequence_lock() {
        let sequence = SEQUENCE_LOCKTIME_TYPE_FLAG | 2; // 2 * 512 seconds
        let (tx, prev_heights) = locked_tx(2, sequence, 100);
        let base = 1_600_000_000;
        let lock = calculate_sequence_lock(&tx, &prev_heights, |_| base);
        assert_eq!(lock.min_time, Some(base + 1024 - 1));
        assert!(!lock.is_satisfied_by(u64::MAX, base + 1023));
        assert!(lock.is_satisfied_by(u64::MAX, base + 1024));
    }

    #[test]
    fn version_one_and_disabled_inputs_are_unrestricted() {
        let (v1, heights) = locked_tx(1, 10, 100);
        assert_eq!(calculate_sequence_lock(&v1, &heights, |_| 0), SequenceLock::default());

        let (disabled, heights) = locked_tx(2, SEQUENCE_LOCKTIME_DISABLE_FLAG | 10, 100);
        assert_eq!(calculate_sequence_lock(&disabled, &heights, |_| 0), SequenceLock::default());
    }
}
