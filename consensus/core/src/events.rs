use crate::tx::TransactionId;
use crate::Hash;
use std::sync::Arc;

/// Notifications emitted by the consensus service after state transitions
/// commit. Delivered over an unbounded channel after the writer lock is
/// released, so observers can never stall a transition.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    BlockConnected { hash: Hash, height: u64 },
    BlockDisconnected { hash: Hash, height: u64 },
    ChainTipChanged { old_tip: Hash, new_tip: Hash, new_height: u64 },
    TransactionAdmitted { id: TransactionId },
    /// Transactions dropped from the pool for a reason other than
    /// confirmation (replacement, expiry, eviction)
    TransactionsEvicted { ids: Arc<Vec<TransactionId>> },
}
