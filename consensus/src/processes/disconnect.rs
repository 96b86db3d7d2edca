//! Reverses a connected block against the UTXO overlay using its undo
//! record. Disconnection is best-effort: inconsistencies are reported as
//! an unclean outcome rather than an error, and the caller decides whether
//! the state machine can continue.

use crate::model::utxo_cache::CachedUtxoView;
use crate::ConsensusResult;
use cinder_consensus_core::block::Block;
use cinder_consensus_core::tx::TransactionOutpoint;
use cinder_consensus_core::undo::BlockUndo;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Every output was present and every input restored
    Clean,
    /// The view diverged from the undo record; the resulting state must be
    /// rebuilt before it is trusted
    Unclean,
}

/// Removes the block's outputs and restores the coins its inputs spent,
/// in reverse block order.
pub fn disconnect_block(
    block: &Block,
    undo: &BlockUndo,
    view: &mut CachedUtxoView,
) -> ConsensusResult<DisconnectOutcome> {
    let mut clean = true;
    if undo.tx_undo.len() + 1 != block.transactions.len() {
        warn!(
            "undo record of block {} covers {} transactions, block has {}",
            block.hash(),
            undo.tx_undo.len(),
            block.transactions.len()
        );
        return Ok(DisconnectOutcome::Unclean);
    }

    for (i, tx) in block.transactions.iter().enumerate().rev() {
        let id = tx.id();
        for (index, output) in tx.outputs.iter().enumerate().rev() {
            if output.is_empty() {
                continue;
            }
            let outpoint = TransactionOutpoint::new(id, index as u32);
            if view.spend_coin(&outpoint)?.is_none() {
                warn!("output {} of disconnected block {} was already missing", outpoint, block.hash());
                clean = false;
            }
        }

        if i == 0 {
            continue;
        }
        let tx_undo = &undo.tx_undo[i - 1];
        if tx_undo.spent_coins.len() != tx.inputs.len() {
            warn!("undo record of transaction {} does not cover all inputs", id);
            clean = false;
            continue;
        }
        for (input, coin) in tx.inputs.iter().zip(tx_undo.spent_coins.iter()).rev() {
            view.add_coin(input.previous_outpoint, coin.clone(), true)?;
        }
    }

    Ok(if clean { DisconnectOutcome::Clean } else { DisconnectOutcome::Unclean })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stores::coins::UtxoSetStore;
    use crate::processes::connect::{connect_block, ConnectContext};
    use cinder_consensus_core::coin::Coin;
    use cinder_consensus_core::config::SIMNET_PARAMS;
    use cinder_consensus_core::policies::{PermissiveKernel, PermissiveScripts};
    use cinder_consensus_core::testutils::{build_block, build_spend};
    use cinder_consensus_core::tx::{ScriptPublicKey, TransactionOutput};
    use cinder_consensus_core::Hash;
    use cinder_database::prelude::{Cache, CachePolicy};
    use cinder_database::utils::create_temp_db;

    fn fresh_view() -> (tempfile::TempDir, CachedUtxoView) {
        let (lifetime, db) = create_temp_db();
        let store = UtxoSetStore::new(db, CachePolicy::Count(64));
        (lifetime, CachedUtxoView::new(store, Hash::ZERO))
    }

    fn connect(block: &Block, view: &mut CachedUtxoView, height: u64) -> BlockUndo {
        let ctx = ConnectContext {
            params: &SIMNET_PARAMS,
            height,
            parent_mtp: 1_000_000,
            median_time_at: &|_| 1_000_000,
            time_at: &|_| 1_000_000,
            script_flags: 0,
        };
        let cache = Cache::new(CachePolicy::Count(64));
        connect_block(block, view, &ctx, &PermissiveKernel, &PermissiveScripts, &cache).unwrap()
    }

    #[test]
    fn disconnect_restores_the_pre_connect_state() {
        let (_lifetime, mut view) = fresh_view();
        let funding = TransactionOutpoint::new(1.into(), 0);
        let original = Coin::new(TransactionOutput::new(10_000, ScriptPublicKey::from_vec(0, vec![0xac])), 1, false, false);
        view.add_coin(funding, original.clone(), false).unwrap();

        let spend = build_spend(&[funding], 9_000);
        let spend_id = spend.id();
        let block = build_block(&SIMNET_PARAMS.genesis_block().header, 1, SIMNET_PARAMS.block_subsidy(2), vec![spend], 3);
        let coinbase_id = block.transactions[0].id();
        let undo = connect(&block, &mut view, 2);

        assert_eq!(disconnect_block(&block, &undo, &mut view).unwrap(), DisconnectOutcome::Clean);
        assert_eq!(view.access_coin(&funding).unwrap(), Some(original));
        assert!(view.access_coin(&TransactionOutpoint::new(spend_id, 0)).unwrap().is_none());
        assert!(view.access_coin(&TransactionOutpoint::new(coinbase_id, 0)).unwrap().is_none());
    }

    #[test]
    fn missing_outputs_make_the_disconnect_unclean() {
        let (_lifetime, mut view) = fresh_view();
        let block = build_block(&SIMNET_PARAMS.genesis_block().header, 0, SIMNET_PARAMS.block_subsidy(1), vec![], 3);
        let undo = connect(&block, &mut view, 1);

        // Corrupt the view by spending the coinbase output out-of-band
        let coinbase_outpoint = TransactionOutpoint::new(block.transactions[0].id(), 0);
        view.spend_coin(&coinbase_outpoint).unwrap().unwrap();

        assert_eq!(disconnect_block(&block, &undo, &mut view).unwrap(), DisconnectOutcome::Unclean);
    }

    #[test]
    fn truncated_undo_records_are_rejected() {
        let (_lifetime, mut view) = fresh_view();
        let funding = TransactionOutpoint::new(1.into(), 0);
        view.add_coin(funding, Coin::new(TransactionOutput::new(10_000, ScriptPublicKey::default()), 1, false, false), false)
            .unwrap();
        let block =
            build_block(&SIMNET_PARAMS.genesis_block().header, 1, SIMNET_PARAMS.block_subsidy(2), vec![build_spend(&[funding], 9_000)], 3);
        let undo = connect(&block, &mut view, 2);

        let truncated = BlockUndo { tx_undo: undo.tx_undo[..0].to_vec() };
        assert_eq!(disconnect_block(&block, &truncated, &mut view).unwrap(), DisconnectOutcome::Unclean);
    }
}
