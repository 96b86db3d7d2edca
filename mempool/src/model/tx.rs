use cinder_consensus_core::locks::SequenceLock;
use cinder_consensus_core::tx::{Transaction, TransactionId};
use cinder_consensus_core::Amount;
use std::sync::Arc;

/// Why a transaction left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Confirmed,
    Conflict,
    ReplacedByFee,
    Expired,
    Evicted,
    /// Removed because an ancestor was rejected on re-admission
    Purged,
}

/// A pooled transaction with its cached validation facts and incremental
/// package aggregates. Ancestor/descendant aggregates include the entry
/// itself and are maintained by the pool on every insert/remove.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub id: TransactionId,
    pub tx: Arc<Transaction>,
    pub fee: Amount,
    pub size: u64,
    pub sig_ops: u64,
    /// Wall-clock seconds at admission, drives expiry
    pub admission_time: u64,
    /// Chain height at admission
    pub admission_height: u64,
    /// Relative lock computed at admission; stays valid while the chain
    /// only grows, revalidated after reorgs
    pub sequence_lock: SequenceLock,
    /// External fee adjustment included in scoring
    pub fee_delta: i64,
    /// Pool-wide admission counter, breaks scoring and ordering ties
    pub sequence: u64,

    pub ancestor_count: u64,
    pub ancestor_size: u64,
    pub ancestor_fees: i64,
    pub descendant_count: u64,
    pub descendant_size: u64,
    pub descendant_fees: i64,
}

impl MempoolEntry {
    pub fn new(
        tx: Arc<Transaction>,
        fee: Amount,
        admission_time: u64,
        admission_height: u64,
        sequence_lock: SequenceLock,
        fee_delta: i64,
    ) -> Self {
        let id = tx.id();
        let size = tx.estimated_size();
        let sig_ops = tx.sig_op_count();
        let effective = fee as i64 + fee_delta;
        Self {
            id,
            tx,
            fee,
            size,
            sig_ops,
            admission_time,
            admission_height,
            sequence_lock,
            fee_delta,
            sequence: 0,
            ancestor_count: 1,
            ancestor_size: size,
            ancestor_fees: effective,
            descendant_count: 1,
            descendant_size: size,
            descendant_fees: effective,
        }
    }

    pub fn effective_fee(&self) -> i64 {
        self.fee as i64 + self.fee_delta
    }

    pub fn fee_rate(&self) -> f64 {
        self.effective_fee() as f64 / self.size as f64
    }

    /// Fee rate of the entry's whole ancestor package, the eviction metric
    pub fn ancestor_score(&self) -> f64 {
        self.ancestor_fees as f64 / self.ancestor_size as f64
    }
}
