use crate::block::Block;
use crate::header::Header;
use crate::merkle::merkle_root;
use crate::tx::{ScriptPublicKey, Transaction, TransactionInput, TransactionOutpoint, TransactionOutput, SEQUENCE_FINAL};
use crate::{Amount, Hash};

/// Consensus parameters of a cinder network.
#[derive(Clone, Debug)]
pub struct Params {
    pub network_name: &'static str,

    pub genesis_version: u32,
    pub genesis_timestamp: u64,
    pub genesis_bits: u32,
    pub genesis_nonce: u64,

    /// Easiest allowed compact target
    pub pow_limit_bits: u32,
    /// Desired seconds between blocks
    pub target_spacing: u64,
    /// Number of trailing blocks consulted by difficulty retargeting
    pub difficulty_window: u64,

    /// Maximum seconds a block timestamp may lie ahead of adjusted time
    pub max_future_block_time: u64,
    /// Number of trailing blocks whose median timestamp lower-bounds new blocks
    pub median_time_window: usize,

    pub max_block_size: u64,
    pub max_block_sigops: u64,

    /// Confirmations before a coinbase or coinstake output may be spent
    pub coinbase_maturity: u64,
    /// Confirmations a coin needs before it may be staked
    pub stake_min_confirmations: u64,
    /// First height at which proof-of-stake blocks are accepted
    pub pos_start_height: u64,

    pub initial_subsidy: Amount,
    pub halving_interval: u64,

    /// Forks whose common ancestor is deeper than this below the tip are rejected
    pub max_reorg_depth: u64,
    /// `(height, hash)` pairs the active chain must pass through
    pub checkpoints: &'static [(u64, &'static str)],

    /// `(version, height)` pairs: blocks below `version` are rejected from
    /// `height` onward. Must be sorted by height.
    pub version_thresholds: &'static [(u32, u64)],

    /// Blocks within this depth of the tip are never pruned
    pub min_retained_depth: u64,
}

impl Params {
    /// Builds the deterministic genesis block of this network
    pub fn genesis_block(&self) -> Block {
        let coinbase = Transaction::new(
            1,
            vec![TransactionInput::new(TransactionOutpoint::null(), self.network_name.as_bytes().to_vec(), SEQUENCE_FINAL, 0)],
            vec![TransactionOutput::new(0, ScriptPublicKey::default())],
            0,
        );
        let root = merkle_root(std::iter::once(&coinbase));
        let header =
            Header::new(self.genesis_version, Hash::ZERO, root, self.genesis_timestamp, self.genesis_bits, self.genesis_nonce);
        Block::new(header, vec![coinbase], vec![])
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_block().hash()
    }

    /// The minimum acceptable block version at the given height
    pub fn required_version(&self, height: u64) -> u32 {
        let mut required = 1;
        for (version, activation_height) in self.version_thresholds.iter() {
            if height >= *activation_height {
                required = required.max(*version);
            }
        }
        required
    }

    /// The checkpoint hash the block at `height` must match, if any
    pub fn checkpoint_at(&self, height: u64) -> Option<Hash> {
        self.checkpoints
            .iter()
            .find(|(checkpoint_height, _)| *checkpoint_height == height)
            .and_then(|(_, hash)| hash.parse().ok())
    }

    pub fn block_subsidy(&self, height: u64) -> Amount {
        crate::subsidy::block_subsidy(height, self.initial_subsidy, self.halving_interval)
    }
}

pub const MAINNET_PARAMS: Params = Params {
    network_name: "cinder-mainnet",
    genesis_version: 1,
    genesis_timestamp: 1_704_067_200,
    genesis_bits: 0x1e00ffff,
    genesis_nonce: 0x1f2e3d4c,
    pow_limit_bits: 0x1e00ffff,
    target_spacing: 60,
    difficulty_window: 120,
    max_future_block_time: 2 * 60 * 60,
    median_time_window: 11,
    max_block_size: 2_000_000,
    max_block_sigops: 40_000,
    coinbase_maturity: 100,
    stake_min_confirmations: 500,
    pos_start_height: 1000,
    initial_subsidy: 5_000 * 100_000_000,
    halving_interval: 2_100_000,
    max_reorg_depth: 60,
    checkpoints: &[],
    version_thresholds: &[(2, 1000), (4, 250_000)],
    min_retained_depth: 288,
};

/// Parameters for self-contained tests and local simulation: difficulty is
/// pinned to the limit, maturity and reorg bounds are small.
pub const SIMNET_PARAMS: Params = Params {
    network_name: "cinder-simnet",
    genesis_version: 1,
    genesis_timestamp: 1_704_067_200,
    genesis_bits: 0x207fffff,
    genesis_nonce: 0,
    pow_limit_bits: 0x207fffff,
    target_spacing: 60,
    difficulty_window: 16,
    max_future_block_time: 2 * 60 * 60,
    median_time_window: 11,
    max_block_size: 2_000_000,
    max_block_sigops: 40_000,
    coinbase_maturity: 10,
    stake_min_confirmations: 20,
    pos_start_height: 50,
    initial_subsidy: 5_000 * 100_000_000,
    halving_interval: 2_100_000,
    max_reorg_depth: 30,
    checkpoints: &[],
    version_thresholds: &[],
    min_retained_depth: 16,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = SIMNET_PARAMS.genesis_block();
        let b = SIMNET_PARAMS.genesis_block();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(SIMNET_PARAMS.genesis_hash(), MAINNET_PARAMS.genesis_hash());
        assert!(a.transactions[0].is_coinbase());
    }

    #[test]
    fn version_thresholds_apply_in_order() {
        assert_eq!(MAINNET_PARAMS.required_version(0), 1);
        assert_eq!(MAINNET_PARAMS.required_version(1000), 2);
        assert_eq!(MAINNET_PARAMS.required_version(250_000), 4);
    }
}
