//! Stateless block checks, run once per block and cached via the index
//! validity stage. Nothing here consults the UTXO set or ancestor headers.

use cinder_consensus_core::block::Block;
use cinder_consensus_core::config::Params;
use cinder_consensus_core::errors::block::RuleError;
use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::merkle::merkle_root_with_mutation;
use cinder_consensus_core::tx::Transaction;
use cinder_consensus_core::work::Uint256;
use cinder_consensus_core::MAX_MONEY;
use std::collections::HashSet;

pub fn check_block_structure(block: &Block, params: &Params, now: u64) -> Result<(), RuleError> {
    if block.transactions.is_empty() {
        return Err(RuleError::NoTransactions);
    }

    let header = &block.header;
    if header.timestamp > now + params.max_future_block_time {
        return Err(RuleError::TimeTooFarIntoFuture(header.timestamp, params.max_future_block_time));
    }

    let is_pos = block.is_proof_of_stake();
    if is_pos {
        check_stake_structure(block)?;
    } else {
        check_proof_of_work(block, params)?;
    }

    let (calculated_root, mutated) = merkle_root_with_mutation(block.transactions.iter());
    if mutated {
        // A duplicated transaction range that preserves the root must be
        // rejected here, before any UTXO state is consulted
        return Err(RuleError::MutatedMerkleTree);
    }
    if calculated_root != header.merkle_root {
        return Err(RuleError::BadMerkleRoot(header.merkle_root, calculated_root));
    }

    if !block.transactions[0].is_coinbase() {
        return Err(RuleError::FirstTxNotCoinbase);
    }
    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        if tx.is_coinbase() {
            return Err(RuleError::MultipleCoinbases(i));
        }
        if tx.is_coinstake() && (!is_pos || i != 1) {
            return Err(RuleError::MultipleCoinstakes(i));
        }
    }

    let mut size = 0u64;
    let mut sig_ops = 0u64;
    let mut spent = HashSet::new();
    for (i, tx) in block.transactions.iter().enumerate() {
        check_transaction_structure(tx, i == 0)?;
        size += tx.estimated_size();
        sig_ops += tx.sig_op_count();
        for input in tx.inputs.iter() {
            // Double spends within the block are structural
            if !input.previous_outpoint.is_null() && !spent.insert(input.previous_outpoint) {
                return Err(TxRuleError::DuplicateInput(input.previous_outpoint).into());
            }
        }
    }
    if size > params.max_block_size {
        return Err(RuleError::BlockSizeExceeded(size, params.max_block_size));
    }
    if sig_ops > params.max_block_sigops {
        return Err(RuleError::ExcessiveSigOps(sig_ops, params.max_block_sigops));
    }

    Ok(())
}

fn check_proof_of_work(block: &Block, params: &Params) -> Result<(), RuleError> {
    let (target, negative, overflow) = Uint256::from_compact(block.header.bits);
    let (limit, _, _) = Uint256::from_compact(params.pow_limit_bits);
    if negative || overflow || target.is_zero() || target > limit {
        return Err(RuleError::InvalidProofOfWork);
    }
    if Uint256::from_hash(block.header.hash) > target {
        return Err(RuleError::InvalidProofOfWork);
    }
    Ok(())
}

/// A proof-of-stake block carries an empty coinbase, the coinstake second,
/// and a staker signature over the block hash
fn check_stake_structure(block: &Block) -> Result<(), RuleError> {
    let coinbase = &block.transactions[0];
    if coinbase.outputs.len() != 1 || !coinbase.outputs[0].is_empty() {
        return Err(RuleError::BadStakeStructure);
    }
    if block.signature.is_empty() {
        return Err(RuleError::BadBlockSignature);
    }
    Ok(())
}

pub fn check_transaction_structure(tx: &Transaction, expect_coinbase: bool) -> Result<(), RuleError> {
    let id = tx.id();
    if tx.inputs.is_empty() {
        return Err(TxRuleError::NoTxInputs.into());
    }
    if tx.outputs.is_empty() {
        return Err(TxRuleError::NoTxOutputs.into());
    }
    if expect_coinbase {
        let script_len = tx.inputs[0].signature_script.len();
        if !(2..=100).contains(&script_len) {
            return Err(TxRuleError::BadCoinbaseLength(script_len).into());
        }
    } else {
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        for input in tx.inputs.iter() {
            if input.previous_outpoint.is_null() {
                return Err(TxRuleError::NullInput(id).into());
            }
            if !seen.insert(input.previous_outpoint) {
                return Err(TxRuleError::DuplicateInput(input.previous_outpoint).into());
            }
        }
    }
    let mut total = 0u64;
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

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::config::SIMNET_PARAMS;
    use cinder_consensus_core::header::Header;
    use cinder_consensus_core::merkle::merkle_root;
    use cinder_consensus_core::testutils::{build_block, build_coinbase};
    use cinder_consensus_core::Hash;
    use std::sync::Arc;

    fn genesis_header() -> Header {
        SIMNET_PARAMS.genesis_block().header
    }

    #[test]
    fn accepts_a_well_formed_block() {
        let block = build_block(&genesis_header(), 0, 5000, vec![], 7);
        check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp).unwrap();
    }

    #[test]
    fn rejects_far_future_timestamps() {
        let block = build_block(&genesis_header(), 0, 5000, vec![], 7);
        let err = check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp - 3 * 60 * 60);
        assert!(matches!(err, Err(RuleError::TimeTooFarIntoFuture(_, _))));
    }

    #[test]
    fn rejects_wrong_merkle_root() {
        let mut block = build_block(&genesis_header(), 0, 5000, vec![], 7);
        block.header.merkle_root = Hash::from(123u64);
        cinder_consensus_core::testutils::solve_pow(&mut block.header);
        let err = check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp);
        assert!(matches!(err, Err(RuleError::BadMerkleRoot(_, _))));
    }

    /// Duplicating the transaction list tail preserves the root but must
    /// be rejected before any UTXO state is touched
    #[test]
    fn rejects_merkle_mutation_with_preserved_root() {
        let coinbase = build_coinbase(1, 5000);
        let spend = cinder_consensus_core::testutils::build_spend(
            &[cinder_consensus_core::tx::TransactionOutpoint::new(7.into(), 0)],
            1000,
        );
        let honest = vec![coinbase, spend];
        let root = merkle_root(honest.iter());

        let mut duplicated = honest.clone();
        duplicated.push(honest[1].clone());
        assert_eq!(merkle_root(duplicated.iter()), root);

        let mut header = Header::new(1, genesis_header().hash, root, genesis_header().timestamp + 60, 0x207fffff, 0);
        cinder_consensus_core::testutils::solve_pow(&mut header);
        let block = Block { header, transactions: Arc::new(duplicated), signature: vec![] };
        let err = check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp);
        assert!(matches!(err, Err(RuleError::MutatedMerkleTree)));
    }

    #[test]
    fn rejects_missing_or_extra_coinbase() {
        let mut block = build_block(&genesis_header(), 0, 5000, vec![], 7);
        let mut txs: Vec<_> = block.transactions.as_ref().clone();
        txs.push(build_coinbase(2, 5000));
        block.header.merkle_root = merkle_root(txs.iter());
        cinder_consensus_core::testutils::solve_pow(&mut block.header);
        block.transactions = Arc::new(txs);
        let err = check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp);
        assert!(matches!(err, Err(RuleError::MultipleCoinbases(1))));
    }

    #[test]
    fn rejects_in_block_double_spends() {
        let outpoint = cinder_consensus_core::tx::TransactionOutpoint::new(9.into(), 0);
        let a = cinder_consensus_core::testutils::build_spend(&[outpoint], 1000);
        let b = cinder_consensus_core::testutils::build_spend(&[outpoint], 2000);
        let block = build_block(&genesis_header(), 0, 5000, vec![a, b], 7);
        let err = check_block_structure(&block, &SIMNET_PARAMS, block.header.timestamp);
        assert!(matches!(err, Err(RuleError::TxInContext(TxRuleError::DuplicateInput(_)))));
    }
}
