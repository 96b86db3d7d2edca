//! Applies a fully checked block to the UTXO overlay, producing the undo
//! data that makes the application reversible. All rule checks that need
//! resolved coins live here: maturity, finality, relative locks, fee and
//! reward accounting, the stake kernel, and script execution.

use crate::model::utxo_cache::CachedUtxoView;
use crate::{ConsensusError, ConsensusResult};
use cinder_consensus_core::block::Block;
use cinder_consensus_core::coin::Coin;
use cinder_consensus_core::config::Params;
use cinder_consensus_core::errors::block::RuleError;
use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::locks::{calculate_sequence_lock, is_final};
use cinder_consensus_core::policies::{ScriptEngine, StakeKernel};
use cinder_consensus_core::tx::{TransactionId, TransactionOutpoint};
use cinder_consensus_core::undo::{BlockUndo, TransactionUndo};
use cinder_consensus_core::Amount;
use cinder_database::prelude::Cache;
use rayon::prelude::*;

/// Chain-positional data the connect step cannot derive from the block
/// itself. The lookups resolve against the chain the block extends.
pub struct ConnectContext<'a> {
    pub params: &'a Params,
    /// Height the block will occupy
    pub height: u64,
    /// Median-time-past of the parent, the evaluation time for lock checks
    pub parent_mtp: u64,
    /// Median-time-past of the block preceding the given height
    pub median_time_at: &'a (dyn Fn(u64) -> u64 + Sync + 'a),
    /// Timestamp of the block at the given height
    pub time_at: &'a (dyn Fn(u64) -> u64 + Sync + 'a),
    pub script_flags: u32,
}

/// Spends the block's inputs and adds its outputs on top of `view`,
/// returning the undo record. On any error the view is left partially
/// mutated and the caller must discard or rebuild it.
pub fn connect_block(
    block: &Block,
    view: &mut CachedUtxoView,
    ctx: &ConnectContext<'_>,
    kernel: &dyn StakeKernel,
    scripts: &dyn ScriptEngine,
    script_cache: &Cache<TransactionId, ()>,
) -> ConsensusResult<BlockUndo> {
    let is_pos = block.is_proof_of_stake();
    let ids: Vec<TransactionId> = block.transactions.iter().map(|tx| tx.id()).collect();

    let mut undo = BlockUndo::with_capacity(block.transactions.len().saturating_sub(1));
    let mut fees: Amount = 0;
    let mut minted: Amount = 0;
    // (tx index, input index, spent coin) triplets awaiting script execution
    let mut script_jobs: Vec<(usize, usize, Coin)> = Vec::new();
    let mut verified_ids: Vec<TransactionId> = Vec::new();

    for (i, tx) in block.transactions.iter().enumerate() {
        let id = ids[i];
        if i > 0 {
            if !is_final(tx, ctx.height, ctx.parent_mtp) {
                return Err(TxRuleError::NotFinalized(id).into());
            }

            let cached = script_cache.contains_key(&id);
            if !cached {
                verified_ids.push(id);
            }

            let mut spent = Vec::with_capacity(tx.inputs.len());
            let mut prev_heights = Vec::with_capacity(tx.inputs.len());
            let mut total_in: Amount = 0;
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let outpoint = input.previous_outpoint;
                let coin = view
                    .spend_coin(&outpoint)?
                    .ok_or(RuleError::MissingOrSpentOutpoint(id, outpoint))?;
                let confirmations = ctx.height - coin.height;
                if coin.is_reward() && confirmations < ctx.params.coinbase_maturity {
                    return Err(TxRuleError::ImmatureSpend(
                        id,
                        input_index,
                        outpoint,
                        confirmations,
                        ctx.params.coinbase_maturity,
                    )
                    .into());
                }
                total_in += coin.value();
                prev_heights.push(coin.height);
                if !cached {
                    script_jobs.push((i, input_index, coin.clone()));
                }
                spent.push(coin);
            }

            let lock = calculate_sequence_lock(tx, &prev_heights, |h| {
                // Coins created earlier in this very block resolve to the
                // parent's median time
                if h >= ctx.height {
                    ctx.parent_mtp
                } else {
                    (ctx.median_time_at)(h)
                }
            });
            if !lock.is_satisfied_by(ctx.height, ctx.parent_mtp) {
                return Err(TxRuleError::SequenceLockNotMet(id).into());
            }

            let total_out = tx.output_value_total();
            if is_pos && i == 1 {
                // The coinstake mints the reward on top of its inputs
                let stake_coin = &spent[0];
                let stake_confirmations = ctx.height - stake_coin.height;
                if stake_confirmations < ctx.params.stake_min_confirmations {
                    return Err(RuleError::ImmatureStake(stake_confirmations, ctx.params.stake_min_confirmations).into());
                }
                let coin_creation_time = (ctx.time_at)(stake_coin.height);
                if !kernel.check_kernel(&block.header, stake_coin, coin_creation_time) {
                    return Err(RuleError::BadStakeKernel.into());
                }
                minted = total_out.saturating_sub(total_in);
            } else {
                if total_out > total_in {
                    return Err(TxRuleError::InsufficientFunds(total_in, id, total_out).into());
                }
                fees += total_in - total_out;
            }

            undo.tx_undo.push(TransactionUndo { spent_coins: spent });
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            // Marker outputs of reward transactions never become coins
            if output.is_empty() {
                continue;
            }
            let outpoint = TransactionOutpoint::new(id, index as u32);
            let coin = Coin::new(output.clone(), ctx.height, i == 0, is_pos && i == 1);
            if !view.add_coin(outpoint, coin, false)? {
                return Err(RuleError::OverwritingCoins(id).into());
            }
        }
    }

    let allowed_reward = ctx.params.block_subsidy(ctx.height) + fees;
    let claimed = if is_pos { minted } else { block.transactions[0].output_value_total() };
    if claimed > allowed_reward {
        return Err(RuleError::BadRewardAmount(claimed, allowed_reward).into());
    }

    script_jobs
        .par_iter()
        .try_for_each(|(tx_index, input_index, coin)| {
            let tx = &block.transactions[*tx_index];
            scripts
                .verify(tx, *input_index, coin, ctx.script_flags)
                .map_err(|err| TxRuleError::ScriptFailure(ids[*tx_index], *input_index, err.to_string()))
        })
        .map_err(|err| ConsensusError::from(RuleError::from(err)))?;
    script_cache.insert_many(&mut verified_ids.into_iter().map(|id| (id, ())));

    Ok(undo)
}
