//! Contextual block checks: everything decidable from ancestor headers
//! alone, before any UTXO state is touched.

use crate::model::block_index::{BlockIndex, EntryId};
use cinder_consensus_core::block::Block;
use cinder_consensus_core::config::Params;
use cinder_consensus_core::errors::block::RuleError;
use cinder_consensus_core::policies::DifficultyPolicy;

/// Iterator of `(timestamp, bits)` pairs walking the chain back from `id`
struct AncestorWindow<'a> {
    index: &'a BlockIndex,
    current: Option<EntryId>,
}

impl Iterator for AncestorWindow<'_> {
    type Item = (u64, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let entry = &self.index[id];
        self.current = entry.parent;
        Some((entry.header.timestamp, entry.header.bits))
    }
}

pub fn check_block_contextual(
    block: &Block,
    index: &BlockIndex,
    parent: EntryId,
    params: &Params,
    difficulty: &dyn DifficultyPolicy,
) -> Result<(), RuleError> {
    let header = &block.header;
    let height = index[parent].height + 1;

    let expected_bits = difficulty.required_bits(&mut AncestorWindow { index, current: Some(parent) });
    if header.bits != expected_bits {
        return Err(RuleError::UnexpectedDifficulty(header.bits, expected_bits));
    }

    let median_time = index.median_time_past(parent, params.median_time_window);
    if header.timestamp <= median_time {
        return Err(RuleError::TimeTooOld(header.timestamp, median_time));
    }

    let required_version = params.required_version(height);
    if header.version < required_version {
        return Err(RuleError::ObsoleteVersion(header.version, height));
    }

    if let Some(checkpoint) = params.checkpoint_at(height) {
        if header.hash != checkpoint {
            return Err(RuleError::CheckpointMismatch(height, checkpoint));
        }
    }

    if block.is_proof_of_stake() && height < params.pos_start_height {
        return Err(RuleError::BadStakeStructure);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::config::SIMNET_PARAMS;
    use cinder_consensus_core::policies::FixedDifficulty;
    use cinder_consensus_core::testutils::{build_block, solve_pow};

    fn setup() -> (BlockIndex, EntryId) {
        let mut index = BlockIndex::new();
        let genesis = SIMNET_PARAMS.genesis_block();
        let id = index.insert(genesis.header, None);
        (index, id)
    }

    #[test]
    fn accepts_matching_difficulty_and_fresh_timestamp() {
        let (index, genesis) = setup();
        let block = build_block(&index[genesis].header.clone(), 0, 5000, vec![], 1);
        check_block_contextual(&block, &index, genesis, &SIMNET_PARAMS, &FixedDifficulty(0x207fffff)).unwrap();
    }

    #[test]
    fn rejects_difficulty_mismatch() {
        let (index, genesis) = setup();
        let mut block = build_block(&index[genesis].header.clone(), 0, 5000, vec![], 1);
        block.header.bits = 0x1f00ffff;
        solve_pow(&mut block.header);
        let err = check_block_contextual(&block, &index, genesis, &SIMNET_PARAMS, &FixedDifficulty(0x207fffff));
        assert!(matches!(err, Err(RuleError::UnexpectedDifficulty(_, 0x207fffff))));
    }

    #[test]
    fn rejects_timestamp_at_or_below_median() {
        let (index, genesis) = setup();
        let mut block = build_block(&index[genesis].header.clone(), 0, 5000, vec![], 1);
        block.header.timestamp = index[genesis].header.timestamp;
        solve_pow(&mut block.header);
        let err = check_block_contextual(&block, &index, genesis, &SIMNET_PARAMS, &FixedDifficulty(0x207fffff));
        assert!(matches!(err, Err(RuleError::TimeTooOld(_, _))));
    }
}
