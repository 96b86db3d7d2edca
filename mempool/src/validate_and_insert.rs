use crate::errors::{RuleError, RuleResult};
use crate::model::pool::UNCONFIRMED_COIN_HEIGHT;
use crate::model::tx::{MempoolEntry, RemovalReason};
use crate::Mempool;
use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::locks::{calculate_sequence_lock, is_final};
use cinder_consensus_core::policies::ScriptEngine;
use cinder_consensus_core::tx::{MutableTransaction, Transaction, TransactionId, TransactionOutpoint};
use cinder_consensus_core::utxo::UtxoView;
use cinder_consensus_core::MAX_MONEY;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Chain facts the acceptance pipeline validates against. Implemented by
/// the consensus service over its active chain.
pub trait ChainContext {
    /// Height of the current active tip
    fn tip_height(&self) -> u64;
    /// Median-time-past of the active tip
    fn median_time_past(&self) -> u64;
    /// Median-time-past of the block preceding the given height
    fn median_time_at(&self, height: u64) -> u64;
    /// Wall-clock seconds, drives admission timestamps and expiry
    fn now(&self) -> u64;
    fn coinbase_maturity(&self) -> u64;
}

/// Outcome of a successful admission
#[derive(Debug, Clone)]
pub struct TransactionAcceptance {
    pub id: TransactionId,
    pub transaction: Arc<Transaction>,
    /// Pool transactions evicted to make room (replaced conflicts and
    /// their descendants)
    pub evicted: Vec<TransactionId>,
}

impl Mempool {
    /// The full acceptance pipeline: structural, dependency, policy,
    /// script stages, with bounded replace-by-fee resolution of conflicts.
    pub fn validate_and_insert_transaction(
        &mut self,
        chain_view: &impl UtxoView,
        ctx: &impl ChainContext,
        scripts: &dyn ScriptEngine,
        tx: Transaction,
    ) -> RuleResult<TransactionAcceptance> {
        let id = tx.id();
        self.check_transaction_in_isolation(&tx, &id)?;
        self.check_not_already_known(chain_view, &tx, &id)?;

        let conflicts = self.direct_conflicts(&tx, &id);
        if !conflicts.is_empty() && !self.config.enable_rbf {
            return Err(RuleError::RejectRbfDisabled(id));
        }

        let mut mutable_tx = MutableTransaction::from_tx(tx);
        let pool_parents = self.populate_entries(chain_view, &mut mutable_tx)?;

        let next_height = ctx.tip_height() + 1;
        let fee = self.check_inputs_and_calculate_fee(&mutable_tx, next_height, ctx.coinbase_maturity())?;
        mutable_tx.calculated_fee = Some(fee);

        if !is_final(&mutable_tx.tx, next_height, ctx.median_time_past()) {
            return Err(TxRuleError::NotFinalized(id).into());
        }
        let prev_heights: Vec<u64> = mutable_tx
            .entries
            .iter()
            .map(|entry| match entry.as_ref().map(|coin| coin.height) {
                Some(UNCONFIRMED_COIN_HEIGHT) | None => next_height,
                Some(height) => height,
            })
            .collect();
        let sequence_lock =
            calculate_sequence_lock(&mutable_tx.tx, &prev_heights, |height| ctx.median_time_at(height));
        if !sequence_lock.is_satisfied_by(next_height, ctx.median_time_past()) {
            return Err(TxRuleError::SequenceLockNotMet(id).into());
        }

        let effective_fee = self.effective_fee(&id, fee);
        if !self.config.accept_non_standard {
            self.check_transaction_standard(&mutable_tx.tx)?;
            let fee_rate = effective_fee as f64 / mutable_tx.tx.estimated_size() as f64;
            if fee_rate < self.config.minimum_relay_fee_rate {
                return Err(RuleError::RejectLowFeeRate(id, fee_rate, self.config.minimum_relay_fee_rate));
            }
        }

        if !conflicts.is_empty() {
            self.validate_replacement(&mutable_tx, effective_fee, &conflicts)?;
        }
        self.check_package_limits(&id, &pool_parents, mutable_tx.tx.estimated_size())?;

        for (i, entry) in mutable_tx.entries.iter().enumerate() {
            if let Some(coin) = entry {
                if let Err(err) = scripts.verify(&mutable_tx.tx, i, coin, 0) {
                    return Err(TxRuleError::ScriptFailure(id, i, err.to_string()).into());
                }
            }
        }

        let mut evicted = Vec::new();
        for conflict in conflicts {
            evicted.extend(
                self.pool.remove_subtree(&conflict, RemovalReason::ReplacedByFee).into_iter().map(|e| e.id),
            );
        }

        let entry =
            MempoolEntry::new(mutable_tx.tx.clone(), fee, ctx.now(), ctx.tip_height(), sequence_lock, self.fee_delta(&id));
        self.pool.insert(entry, &pool_parents);
        debug!("accepted transaction {} into the pool ({} entries)", id, self.pool.len());

        Ok(TransactionAcceptance { id, transaction: mutable_tx.tx, evicted })
    }

    fn check_transaction_in_isolation(&self, tx: &Transaction, id: &TransactionId) -> RuleResult<()> {
        if tx.is_coinbase() || tx.is_coinstake() {
            return Err(RuleError::RejectReward(*id));
        }
        if tx.inputs.is_empty() {
            return Err(TxRuleError::NoTxInputs.into());
        }
        if tx.outputs.is_empty() {
            return Err(TxRuleError::NoTxOutputs.into());
        }
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut total = 0u64;
        for input in tx.inputs.iter() {
            if input.previous_outpoint.is_null() {
                return Err(TxRuleError::NullInput(*id).into());
            }
            if !seen.insert(input.previous_outpoint) {
                return Err(TxRuleError::DuplicateInput(input.previous_outpoint).into());
            }
        }
        for output in tx.outputs.iter() {
            if output.value > MAX_MONEY {
                return Err(TxRuleError::OutputValueTooHigh(output.value, MAX_MONEY).into());
            }
            total = total.saturating_add(output.value);
            if total > MAX_MONEY {
                return Err(TxRuleError::TotalOutputValueTooHigh(total, MAX_MONEY).into());
            }
        }
        Ok(())
    }

    fn check_not_already_known(
        &self,
        chain_view: &impl UtxoView,
        tx: &Transaction,
        id: &TransactionId,
    ) -> RuleResult<()> {
        if self.pool.has(id) {
            return Err(RuleError::RejectDuplicate(*id));
        }
        // A confirmed transaction left at least one of its outputs in the
        // chain UTXO set unless all were spent since; checking the first
        // few indexes matches how duplicates practically surface
        for index in 0..tx.outputs.len() as u32 {
            if chain_view.have_coin(&TransactionOutpoint::new(*id, index)) {
                return Err(RuleError::RejectAlreadyConfirmed(*id));
            }
        }
        Ok(())
    }

    /// Pool transactions spending any of the candidate's inputs
    fn direct_conflicts(&self, tx: &Transaction, id: &TransactionId) -> Vec<TransactionId> {
        let mut conflicts = Vec::new();
        let mut seen = HashSet::new();
        for input in tx.inputs.iter() {
            if let Some(spender) = self.pool.spender_of(&input.previous_outpoint) {
                if spender != *id && seen.insert(spender) {
                    conflicts.push(spender);
                }
            }
        }
        conflicts
    }

    /// Verifies input availability, reward maturity and value conservation,
    /// returning the transaction fee. The maturity rejection here is the
    /// same error a block connecting the spend would produce.
    fn check_inputs_and_calculate_fee(
        &self,
        mutable_tx: &MutableTransaction,
        spending_height: u64,
        maturity: u64,
    ) -> RuleResult<u64> {
        let id = mutable_tx.id();
        let mut total_in = 0u64;
        for (i, (input, entry)) in mutable_tx.tx.inputs.iter().zip(mutable_tx.entries.iter()).enumerate() {
            let coin = entry
                .as_ref()
                .ok_or(TxRuleError::MissingTxOutput(id, input.previous_outpoint))?;
            if coin.is_reward() && coin.height != UNCONFIRMED_COIN_HEIGHT {
                let confirmations = spending_height.saturating_sub(coin.height);
                if confirmations < maturity {
                    return Err(TxRuleError::ImmatureSpend(id, i, input.previous_outpoint, confirmations, maturity).into());
                }
            }
            total_in = total_in.saturating_add(coin.value());
        }
        let total_out = mutable_tx.tx.output_value_total();
        if total_in < total_out {
            return Err(TxRuleError::InsufficientFunds(total_in, id, total_out).into());
        }
        Ok(total_in - total_out)
    }

    /// Bounded ancestor/descendant package limits, walked before insertion
    fn check_package_limits(&self, id: &TransactionId, pool_parents: &[TransactionId], size: u64) -> RuleResult<()> {
        let ancestors = self.pool.ancestors_of_parents(pool_parents);
        let ancestor_count = ancestors.len() as u64 + 1;
        if ancestor_count > self.config.maximum_ancestor_count {
            return Err(RuleError::RejectAncestorCount(*id, ancestor_count, self.config.maximum_ancestor_count));
        }
        let ancestor_size: u64 =
            size + ancestors.iter().filter_map(|a| self.pool.get(a)).map(|entry| entry.size).sum::<u64>();
        if ancestor_size > self.config.maximum_ancestor_size_bytes {
            return Err(RuleError::RejectAncestorSize(*id, ancestor_size, self.config.maximum_ancestor_size_bytes));
        }
        for ancestor_id in ancestors.iter() {
            if let Some(ancestor) = self.pool.get(ancestor_id) {
                if ancestor.descendant_count + 1 > self.config.maximum_descendant_count {
                    return Err(RuleError::RejectDescendantCount(
                        *id,
                        ancestor.descendant_count + 1,
                        self.config.maximum_descendant_count,
                    ));
                }
                if ancestor.descendant_size + size > self.config.maximum_descendant_size_bytes {
                    return Err(RuleError::RejectDescendantSize(
                        *id,
                        ancestor.descendant_size + size,
                        self.config.maximum_descendant_size_bytes,
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MempoolConfig;
    use cinder_consensus_core::coin::Coin;
    use cinder_consensus_core::policies::PermissiveScripts;
    use cinder_consensus_core::testutils::build_spend;
    use cinder_consensus_core::tx::{ScriptPublicKey, TransactionOutput};
    use cinder_consensus_core::Hash;
    use std::collections::HashMap;

    struct TestView(HashMap<TransactionOutpoint, Coin>);

    impl UtxoView for TestView {
        fn get_coin(&self, outpoint: &TransactionOutpoint) -> Option<Coin> {
            self.0.get(outpoint).cloned()
        }
    }

    struct TestCtx {
        tip: u64,
    }

    impl ChainContext for TestCtx {
        fn tip_height(&self) -> u64 {
            self.tip
        }
        fn median_time_past(&self) -> u64 {
            1_000_000
        }
        fn median_time_at(&self, _height: u64) -> u64 {
            900_000
        }
        fn now(&self) -> u64 {
            5_000
        }
        fn coinbase_maturity(&self) -> u64 {
            10
        }
    }

    fn chain_outpoint(i: u64) -> TransactionOutpoint {
        TransactionOutpoint::new(Hash::from(1000 + i), 0)
    }

    fn chain_coin(value: u64) -> Coin {
        Coin::new(TransactionOutput::new(value, ScriptPublicKey::from_vec(0, vec![0xac])), 1, false, false)
    }

    fn setup(config: MempoolConfig) -> (Mempool, TestView, TestCtx) {
        let view = TestView(HashMap::from([
            (chain_outpoint(0), chain_coin(100_000)),
            (chain_outpoint(1), chain_coin(100_000)),
            (chain_outpoint(2), chain_coin(100_000)),
        ]));
        (Mempool::new(config), view, TestCtx { tip: 100 })
    }

    fn accept(mempool: &mut Mempool, view: &TestView, ctx: &TestCtx, tx: Transaction) -> RuleResult<TransactionAcceptance> {
        mempool.validate_and_insert_transaction(view, ctx, &PermissiveScripts, tx)
    }

    #[test]
    fn accepts_chain_spend_and_in_pool_child() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        let parent = build_spend(&[chain_outpoint(0)], 99_000);
        let parent_id = parent.id();
        accept(&mut mempool, &view, &ctx, parent).unwrap();

        let child = build_spend(&[TransactionOutpoint::new(parent_id, 0)], 98_000);
        let acceptance = accept(&mut mempool, &view, &ctx, child).unwrap();
        assert!(acceptance.evicted.is_empty());
        assert_eq!(mempool.len(), 2);
        assert_eq!(mempool.get_entry(&acceptance.id).unwrap().ancestor_count, 2);
    }

    #[test]
    fn rejects_duplicates_and_orphans() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        let tx = build_spend(&[chain_outpoint(0)], 99_000);
        accept(&mut mempool, &view, &ctx, tx.clone()).unwrap();
        assert!(matches!(accept(&mut mempool, &view, &ctx, tx), Err(RuleError::RejectDuplicate(_))));

        let orphan = build_spend(&[TransactionOutpoint::new(Hash::from(77u64), 3)], 1_000);
        let err = accept(&mut mempool, &view, &ctx, orphan).unwrap_err();
        assert!(matches!(err, RuleError::RejectMissingOutpoints(_, _)));
        assert_eq!(err.kind(), crate::errors::RejectionKind::MissingDependency);
    }

    #[test]
    fn rejects_immature_reward_spend() {
        let (mut mempool, mut view, ctx) = setup(MempoolConfig::default());
        let coinbase_outpoint = TransactionOutpoint::new(Hash::from(500u64), 0);
        view.0.insert(
            coinbase_outpoint,
            Coin::new(TransactionOutput::new(100_000, ScriptPublicKey::from_vec(0, vec![0xac])), 95, true, false),
        );
        // 6 confirmations at spend height 101, 10 required
        let err = accept(&mut mempool, &view, &ctx, build_spend(&[coinbase_outpoint], 99_000)).unwrap_err();
        assert!(matches!(err, RuleError::RejectTxRule(TxRuleError::ImmatureSpend(_, _, _, 6, 10))));
    }

    #[test]
    fn fee_delta_lifts_a_low_fee_transaction_over_the_relay_floor() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        let tx = build_spend(&[chain_outpoint(0)], 100_000);
        let id = tx.id();
        assert!(matches!(accept(&mut mempool, &view, &ctx, tx.clone()), Err(RuleError::RejectLowFeeRate(..))));

        mempool.prioritise_transaction(id, 50_000);
        accept(&mut mempool, &view, &ctx, tx).unwrap();
        assert_eq!(mempool.get_entry(&id).unwrap().effective_fee(), 50_000);
    }

    #[test]
    fn replacement_requires_rbf_enabled() {
        let config = MempoolConfig { enable_rbf: false, ..Default::default() };
        let (mut mempool, view, ctx) = setup(config);
        accept(&mut mempool, &view, &ctx, build_spend(&[chain_outpoint(0)], 99_000)).unwrap();
        let conflict = build_spend(&[chain_outpoint(0), chain_outpoint(1)], 190_000);
        assert!(matches!(accept(&mut mempool, &view, &ctx, conflict), Err(RuleError::RejectRbfDisabled(_))));
    }

    /// Original: 1-in/1-out, 101 bytes, fee 202 (rate 2.0). Replacement:
    /// 2-in/1-out, 155 bytes. Rate must strictly exceed 2.0 and the
    /// absolute fee must reach evicted 202 + relay 155 = 357.
    #[test]
    fn replacement_fee_boundaries() {
        let config = MempoolConfig { accept_non_standard: true, ..Default::default() };
        let (mut mempool, view, ctx) = setup(config);
        let original = build_spend(&[chain_outpoint(0)], 99_798);
        let original_id = original.id();
        accept(&mut mempool, &view, &ctx, original).unwrap();

        // Equal fee rate: 310 / 155 == 2.0, not strictly greater
        let equal_rate = build_spend(&[chain_outpoint(0), chain_outpoint(1)], 199_690);
        assert!(matches!(accept(&mut mempool, &view, &ctx, equal_rate), Err(RuleError::RejectRbfLowFeeRate(_, _))));

        // Higher rate but one unit short of the absolute requirement
        let short_fee = build_spend(&[chain_outpoint(0), chain_outpoint(1)], 199_644);
        assert!(matches!(accept(&mut mempool, &view, &ctx, short_fee), Err(RuleError::RejectRbfInsufficientFee(356, 357))));

        // Exactly covering fee is admitted and evicts the original
        let exact = build_spend(&[chain_outpoint(0), chain_outpoint(1)], 199_643);
        let acceptance = accept(&mut mempool, &view, &ctx, exact).unwrap();
        assert_eq!(acceptance.evicted, vec![original_id]);
        assert!(!mempool.has_transaction(&original_id));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn replacement_cannot_add_new_unconfirmed_inputs() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        accept(&mut mempool, &view, &ctx, build_spend(&[chain_outpoint(0)], 99_000)).unwrap();
        let unrelated = build_spend(&[chain_outpoint(1)], 99_000);
        let unrelated_id = unrelated.id();
        accept(&mut mempool, &view, &ctx, unrelated).unwrap();

        // Conflicts on outpoint 0 while pulling in the unrelated pool output
        let replacement = build_spend(&[chain_outpoint(0), TransactionOutpoint::new(unrelated_id, 0)], 150_000);
        assert!(matches!(
            accept(&mut mempool, &view, &ctx, replacement),
            Err(RuleError::RejectRbfNewUnconfirmedInput(_))
        ));
    }

    #[test]
    fn replacement_eviction_count_is_capped() {
        let config = MempoolConfig { maximum_replacement_evictions: 1, ..Default::default() };
        let (mut mempool, view, ctx) = setup(config);
        let original = build_spend(&[chain_outpoint(0)], 99_000);
        let original_id = original.id();
        accept(&mut mempool, &view, &ctx, original).unwrap();
        accept(&mut mempool, &view, &ctx, build_spend(&[TransactionOutpoint::new(original_id, 0)], 98_000)).unwrap();

        // Evicting the original drags its child along: 2 > 1
        let replacement = build_spend(&[chain_outpoint(0), chain_outpoint(1)], 100_000);
        assert!(matches!(
            accept(&mut mempool, &view, &ctx, replacement),
            Err(RuleError::RejectRbfTooManyEvictions(_, 2, 1))
        ));
    }

    #[test]
    fn ancestor_count_limit_is_enforced() {
        let config = MempoolConfig { maximum_ancestor_count: 2, ..Default::default() };
        let (mut mempool, view, ctx) = setup(config);
        let a = build_spend(&[chain_outpoint(0)], 99_000);
        let a_id = a.id();
        accept(&mut mempool, &view, &ctx, a).unwrap();
        let b = build_spend(&[TransactionOutpoint::new(a_id, 0)], 98_000);
        let b_id = b.id();
        accept(&mut mempool, &view, &ctx, b).unwrap();
        let c = build_spend(&[TransactionOutpoint::new(b_id, 0)], 97_000);
        assert!(matches!(accept(&mut mempool, &view, &ctx, c), Err(RuleError::RejectAncestorCount(_, 3, 2))));
    }

    #[test]
    fn confirmed_block_reconciliation_keeps_descendants() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        let a = build_spend(&[chain_outpoint(0)], 99_000);
        let a_id = a.id();
        accept(&mut mempool, &view, &ctx, a.clone()).unwrap();
        let b = build_spend(&[TransactionOutpoint::new(a_id, 0)], 98_000);
        let b_id = b.id();
        accept(&mut mempool, &view, &ctx, b).unwrap();
        // A double-spend of outpoint 1 confirmed by the block
        let pooled_conflict = build_spend(&[chain_outpoint(1)], 99_000);
        let pooled_conflict_id = pooled_conflict.id();
        accept(&mut mempool, &view, &ctx, pooled_conflict).unwrap();
        let confirmed_conflict = build_spend(&[chain_outpoint(1)], 98_500);

        let update = mempool.handle_connected_block(&[a, confirmed_conflict]);
        assert_eq!(update.confirmed, vec![a_id]);
        assert_eq!(update.conflicted, vec![pooled_conflict_id]);
        assert!(mempool.has_transaction(&b_id));
        assert_eq!(mempool.get_entry(&b_id).unwrap().ancestor_count, 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_order_and_deltas() {
        let (mut mempool, view, ctx) = setup(MempoolConfig::default());
        let a = build_spend(&[chain_outpoint(0)], 99_000);
        let a_id = a.id();
        accept(&mut mempool, &view, &ctx, a).unwrap();
        accept(&mut mempool, &view, &ctx, build_spend(&[TransactionOutpoint::new(a_id, 0)], 98_000)).unwrap();
        mempool.prioritise_transaction(a_id, 777);

        let bytes = mempool.snapshot().serialize().unwrap();
        let snapshot = crate::MempoolSnapshot::deserialize(&bytes).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.fee_deltas(), &[(a_id, 777)]);
        let order: Vec<_> = snapshot.transactions().map(|(tx, _)| tx.id()).collect();
        assert_eq!(order[0], a_id);
    }
}
