//! Proof-of-stake kernel verification. The kernel hash commits to the
//! staked coin and both timestamps, and the target is scaled by the coin
//! value so larger stakes find valid kernels proportionally more often.

use cinder_consensus_core::coin::Coin;
use cinder_consensus_core::hash::HashWriter;
use cinder_consensus_core::header::Header;
use cinder_consensus_core::policies::StakeKernel;
use cinder_consensus_core::work::Uint256;

pub struct WeightedStakeKernel {
    /// Minimum age of the staked coin in seconds
    pub min_coin_age: u64,
}

impl WeightedStakeKernel {
    pub fn new(min_coin_age: u64) -> Self {
        Self { min_coin_age }
    }

    fn kernel_hash(header: &Header, stake_coin: &Coin, coin_creation_time: u64) -> Uint256 {
        let mut hasher = HashWriter::stake_kernel();
        hasher
            .update(coin_creation_time.to_le_bytes())
            .update(stake_coin.height.to_le_bytes())
            .update(stake_coin.output.value.to_le_bytes())
            .update(&stake_coin.output.script_public_key.script)
            .update(header.timestamp.to_le_bytes());
        Uint256::from_le_bytes(hasher.finalize().as_bytes())
    }
}

impl StakeKernel for WeightedStakeKernel {
    fn check_kernel(&self, header: &Header, stake_coin: &Coin, coin_creation_time: u64) -> bool {
        if header.timestamp < coin_creation_time + self.min_coin_age {
            return false;
        }
        let (target, negative, overflow) = Uint256::from_compact(header.bits);
        if negative || overflow || target.is_zero() {
            return false;
        }
        // Weight-scaled target; a coin so large the scale overflows 256 bits
        // makes every kernel valid
        let (weighted, overflow) = target.overflowing_mul_u64(stake_coin.value());
        if overflow {
            return true;
        }
        Self::kernel_hash(header, stake_coin, coin_creation_time) <= weighted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::tx::{ScriptPublicKey, TransactionOutput};
    use cinder_consensus_core::Hash;

    fn coin(value: u64) -> Coin {
        Coin::new(TransactionOutput::new(value, ScriptPublicKey::from_vec(0, vec![0xac])), 10, false, false)
    }

    fn header_at(timestamp: u64, bits: u32) -> Header {
        Header::new(1, Hash::from(1u64), Hash::ZERO, timestamp, bits, 0)
    }

    #[test]
    fn rejects_young_coins() {
        let kernel = WeightedStakeKernel::new(3600);
        let header = header_at(10_000, 0x207fffff);
        assert!(!kernel.check_kernel(&header, &coin(u64::MAX), 9_000));
    }

    #[test]
    fn larger_stakes_pass_more_often() {
        let kernel = WeightedStakeKernel::new(0);
        let bits = 0x1d00ffff;
        let mut small_hits = 0;
        let mut large_hits = 0;
        for t in 0..200u64 {
            let header = header_at(1_000_000 + t, bits);
            if kernel.check_kernel(&header, &coin(1), 0) {
                small_hits += 1;
            }
            if kernel.check_kernel(&header, &coin(u64::MAX), 0) {
                large_hits += 1;
            }
        }
        assert!(large_hits >= small_hits);
        assert!(large_hits > 0);
    }

    #[test]
    fn kernel_is_deterministic() {
        let kernel = WeightedStakeKernel::new(0);
        let header = header_at(1_000_000, 0x207fffff);
        let first = kernel.check_kernel(&header, &coin(5000), 100);
        let second = kernel.check_kernel(&header, &coin(5000), 100);
        assert_eq!(first, second);
    }
}
