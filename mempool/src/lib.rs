mod check_standard;
mod handle_new_block;
mod persistence;
mod replace_by_fee;
mod validate_and_insert;

pub mod config;
pub mod errors;
pub mod model;

pub use crate::config::MempoolConfig;
pub use crate::handle_new_block::BlockPoolUpdate;
pub use crate::model::tx::MempoolEntry;
pub use crate::persistence::{MempoolSnapshot, SnapshotError};
pub use crate::validate_and_insert::{ChainContext, TransactionAcceptance};

use crate::errors::{RuleError, RuleResult};
use crate::model::pool::TransactionsPool;
use cinder_consensus_core::tx::{MutableTransaction, Transaction, TransactionId, TransactionOutpoint};
use cinder_consensus_core::utxo::UtxoView;
use cinder_consensus_core::Amount;
use std::collections::HashMap;
use std::sync::Arc;

/// The cinder transaction pool.
///
/// Owns every pending transaction along with its ancestor/descendant
/// aggregates and a UTXO overlay exposing in-pool outputs. All mutation
/// goes through the consensus writer lock (the pool itself carries no
/// interior locking); reads used by block template builders take the same
/// lock briefly and clone what they need.
pub struct Mempool {
    config: Arc<MempoolConfig>,
    pool: TransactionsPool,
    /// Fee adjustments applied when scoring transactions, surviving
    /// removal so a re-admitted transaction keeps its priority
    fee_deltas: HashMap<TransactionId, i64>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        let config = Arc::new(config);
        Self { pool: TransactionsPool::new(config.clone()), config, fee_deltas: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.pool.total_size()
    }

    pub fn has_transaction(&self, id: &TransactionId) -> bool {
        self.pool.has(id)
    }

    pub fn get_transaction(&self, id: &TransactionId) -> Option<Arc<Transaction>> {
        self.pool.get(id).map(|entry| entry.tx.clone())
    }

    pub fn get_entry(&self, id: &TransactionId) -> Option<&MempoolEntry> {
        self.pool.get(id)
    }

    /// All pool transactions, in a deterministic but unspecified order
    pub fn all_transactions(&self) -> Vec<Arc<Transaction>> {
        self.pool.iter().map(|entry| entry.tx.clone()).collect()
    }

    pub fn all_transaction_ids(&self) -> Vec<TransactionId> {
        self.pool.iter().map(|entry| entry.id).collect()
    }

    /// The in-pool transaction spending the given outpoint, if any
    pub fn spending_transaction(&self, outpoint: &TransactionOutpoint) -> Option<TransactionId> {
        self.pool.spender_of(outpoint)
    }

    /// Registers a fee adjustment for scoring and eviction purposes.
    /// Applies to the transaction whether it is pooled now or arrives later.
    pub fn prioritise_transaction(&mut self, id: TransactionId, delta: i64) {
        let total = self.fee_deltas.entry(id).or_insert(0);
        *total += delta;
        if *total == 0 {
            self.fee_deltas.remove(&id);
        }
        self.pool.apply_fee_delta(&id, self.fee_deltas.get(&id).copied().unwrap_or(0));
    }

    pub fn fee_delta(&self, id: &TransactionId) -> i64 {
        self.fee_deltas.get(id).copied().unwrap_or(0)
    }

    /// Resolves an outpoint against pool outputs net of pool spends
    pub fn get_pool_coin(&self, outpoint: &TransactionOutpoint) -> Option<cinder_consensus_core::coin::Coin> {
        self.pool.overlay_coin(outpoint)
    }

    /// Populates the UTXO entries of `mutable_tx` from the chain view and
    /// the pool overlay, returning the resolved parent pool transactions.
    pub(crate) fn populate_entries(
        &self,
        chain_view: &impl UtxoView,
        mutable_tx: &mut MutableTransaction,
    ) -> RuleResult<Vec<TransactionId>> {
        let mut parents = Vec::new();
        for (i, input) in mutable_tx.tx.inputs.iter().enumerate() {
            let outpoint = &input.previous_outpoint;
            if let Some(coin) = self.pool.overlay_coin(outpoint) {
                parents.push(outpoint.transaction_id);
                mutable_tx.entries[i] = Some(coin);
            } else {
                mutable_tx.entries[i] = chain_view.get_coin(outpoint);
            }
        }
        if mutable_tx.is_fully_populated() {
            Ok(parents)
        } else {
            Err(RuleError::RejectMissingOutpoints(mutable_tx.id(), mutable_tx.missing_outpoints().collect()))
        }
    }

    pub(crate) fn effective_fee(&self, id: &TransactionId, fee: Amount) -> i64 {
        fee as i64 + self.fee_delta(id)
    }
}
