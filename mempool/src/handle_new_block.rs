use crate::model::tx::RemovalReason;
use crate::Mempool;
use cinder_consensus_core::tx::{Transaction, TransactionId};
use log::debug;

/// Pool changes caused by reconciling against a connected block
#[derive(Debug, Default)]
pub struct BlockPoolUpdate {
    /// Pool transactions the block confirmed
    pub confirmed: Vec<TransactionId>,
    /// Pool transactions (and descendants) removed for conflicting with
    /// block spends
    pub conflicted: Vec<TransactionId>,
}

impl Mempool {
    /// Reconciles the pool with a newly connected block: confirmed
    /// transactions leave the pool keeping their descendants, and pool
    /// transactions double-spending a block input are purged with theirs.
    pub fn handle_connected_block(&mut self, block_transactions: &[Transaction]) -> BlockPoolUpdate {
        let mut update = BlockPoolUpdate::default();
        for tx in block_transactions.iter() {
            if tx.is_coinbase() {
                continue;
            }
            let id = tx.id();
            if self.pool.remove_confirmed(&id).is_some() {
                update.confirmed.push(id);
            }
            for input in tx.inputs.iter() {
                if let Some(spender) = self.pool.spender_of(&input.previous_outpoint) {
                    if spender != id {
                        update.conflicted.extend(
                            self.pool.remove_subtree(&spender, RemovalReason::Conflict).into_iter().map(|e| e.id),
                        );
                    }
                }
            }
        }
        if !update.confirmed.is_empty() || !update.conflicted.is_empty() {
            debug!(
                "block reconciliation: {} confirmed, {} conflicted, {} remain pooled",
                update.confirmed.len(),
                update.conflicted.len(),
                self.pool.len()
            );
        }
        update
    }

    /// Removes a transaction and its in-pool descendants; used when a
    /// re-offered transaction fails acceptance after a reorg.
    pub fn purge_with_descendants(&mut self, id: &TransactionId) -> Vec<TransactionId> {
        self.pool.remove_subtree(id, RemovalReason::Purged).into_iter().map(|e| e.id).collect()
    }

    /// Drops expired entries and shrinks the pool back under its size cap,
    /// lowest ancestor-package fee rate first. Returns everything removed.
    pub fn expire_and_limit(&mut self, now: u64) -> Vec<TransactionId> {
        let mut removed = Vec::new();
        for id in self.pool.expired_ids(now) {
            removed.extend(self.pool.remove_subtree(&id, RemovalReason::Expired).into_iter().map(|e| e.id));
        }
        while self.pool.total_size() > self.config.maximum_pool_size_bytes {
            match self.pool.lowest_scored_id() {
                Some(victim) => {
                    removed.extend(self.pool.remove_subtree(&victim, RemovalReason::Evicted).into_iter().map(|e| e.id))
                }
                None => break,
            }
        }
        removed
    }
}
