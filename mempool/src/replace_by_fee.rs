use crate::errors::{RuleError, RuleResult};
use crate::Mempool;
use cinder_consensus_core::tx::{MutableTransaction, TransactionId};
use std::collections::HashSet;

impl Mempool {
    /// Validates a fee-bumping replacement against its directly
    /// conflicting pool entries. On success the caller evicts every
    /// conflict together with its descendants.
    ///
    /// Rules, in check order:
    /// 1. the conflicts' combined descendant count is capped, bounding
    ///    eviction cost;
    /// 2. the replacement's fee rate strictly exceeds the rate of every
    ///    direct conflict;
    /// 3. its absolute fee covers all evicted fees plus an incremental
    ///    relay fee for its own size;
    /// 4. it spends no unconfirmed output that was not already spent by a
    ///    conflict's parent set, so it cannot force low-fee ancestors in.
    pub(crate) fn validate_replacement(
        &self,
        mutable_tx: &MutableTransaction,
        effective_fee: i64,
        conflicts: &[TransactionId],
    ) -> RuleResult<()> {
        let id = mutable_tx.id();

        let mut evicted: HashSet<TransactionId> = conflicts.iter().copied().collect();
        for conflict in conflicts.iter() {
            evicted.extend(self.pool.descendants(conflict));
        }
        if evicted.len() > self.config.maximum_replacement_evictions {
            return Err(RuleError::RejectRbfTooManyEvictions(id, evicted.len(), self.config.maximum_replacement_evictions));
        }

        let size = mutable_tx.tx.estimated_size();
        let replacement_rate = effective_fee as f64 / size as f64;
        for conflict in conflicts.iter() {
            if let Some(entry) = self.pool.get(conflict) {
                if replacement_rate <= entry.fee_rate() {
                    return Err(RuleError::RejectRbfLowFeeRate(replacement_rate, entry.fee_rate()));
                }
            }
        }

        let evicted_fees: i64 = evicted.iter().filter_map(|e| self.pool.get(e)).map(|entry| entry.effective_fee()).sum();
        let incremental = (self.config.minimum_relay_fee_rate * size as f64).ceil() as i64;
        let required = evicted_fees + incremental;
        if effective_fee < required {
            return Err(RuleError::RejectRbfInsufficientFee(effective_fee.max(0) as u64, required.max(0) as u64));
        }

        // The parent set a replacement may draw unconfirmed inputs from
        let allowed_parents: HashSet<TransactionId> = conflicts
            .iter()
            .filter_map(|c| self.pool.get(c))
            .flat_map(|entry| entry.tx.inputs.iter().map(|input| input.previous_outpoint.transaction_id))
            .collect();
        for input in mutable_tx.tx.inputs.iter() {
            let parent_id = input.previous_outpoint.transaction_id;
            if self.pool.has(&parent_id) && !allowed_parents.contains(&parent_id) {
                return Err(RuleError::RejectRbfNewUnconfirmedInput(input.previous_outpoint));
            }
        }

        Ok(())
    }
}
