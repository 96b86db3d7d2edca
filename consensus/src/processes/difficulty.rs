//! Retargeting over a sliding window of ancestor headers. The policy sees
//! only `(timestamp, bits)` pairs walking back from the prospective parent,
//! newest first.

use cinder_consensus_core::policies::DifficultyPolicy;
use cinder_consensus_core::work::Uint256;

pub struct WindowDifficulty {
    pow_limit_bits: u32,
    target_spacing: u64,
    window: usize,
}

impl WindowDifficulty {
    pub fn new(pow_limit_bits: u32, target_spacing: u64, window: usize) -> Self {
        Self { pow_limit_bits, target_spacing, window }
    }
}

impl DifficultyPolicy for WindowDifficulty {
    fn required_bits(&self, ancestors: &mut dyn Iterator<Item = (u64, u32)>) -> u32 {
        let samples: Vec<_> = ancestors.take(self.window).collect();
        if samples.len() < 2 {
            return self.pow_limit_bits;
        }

        let mut sum = Uint256::ZERO;
        for &(_, bits) in samples.iter() {
            let (target, negative, overflow) = Uint256::from_compact(bits);
            if negative || overflow {
                return self.pow_limit_bits;
            }
            let (next, carry) = sum.overflowing_add(target);
            if carry {
                return self.pow_limit_bits;
            }
            sum = next;
        }
        let average = sum.div_rem(Uint256::from_u64(samples.len() as u64)).0;

        // Samples are newest first; clamp the observed span to a quarter /
        // quadruple of the expected one so a single window cannot swing
        // difficulty arbitrarily
        let expected = self.target_spacing * (samples.len() as u64 - 1);
        let newest = samples[0].0;
        let oldest = samples[samples.len() - 1].0;
        let actual = newest.saturating_sub(oldest).clamp(expected / 4, expected * 4).max(1);

        let (scaled, overflow) = average.overflowing_mul_u64(actual);
        let retargeted = if overflow {
            // Scale down first when the multiply would not fit
            average.div_rem(Uint256::from_u64(expected)).0.overflowing_mul_u64(actual).0
        } else {
            scaled.div_rem(Uint256::from_u64(expected)).0
        };

        let (limit, _, _) = Uint256::from_compact(self.pow_limit_bits);
        if retargeted.is_zero() || retargeted > limit {
            self.pow_limit_bits
        } else {
            retargeted.to_compact()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_for(policy: &WindowDifficulty, samples: &[(u64, u32)]) -> u32 {
        policy.required_bits(&mut samples.iter().copied())
    }

    #[test]
    fn short_history_falls_back_to_limit() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        assert_eq!(bits_for(&policy, &[]), 0x1e00ffff);
        assert_eq!(bits_for(&policy, &[(1000, 0x1d00ffff)]), 0x1e00ffff);
    }

    #[test]
    fn on_schedule_blocks_keep_difficulty() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        // Ten blocks exactly 60 seconds apart, newest first
        let samples: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 60, 0x1d00ffffu32)).collect();
        assert_eq!(bits_for(&policy, &samples), 0x1d00ffff);
    }

    #[test]
    fn slow_blocks_raise_target() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        let samples: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 120, 0x1d00ffffu32)).collect();
        let bits = bits_for(&policy, &samples);
        let (relaxed, _, _) = Uint256::from_compact(bits);
        let (original, _, _) = Uint256::from_compact(0x1d00ffff);
        assert!(relaxed > original);
    }

    #[test]
    fn fast_blocks_lower_target() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        let samples: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 30, 0x1d00ffffu32)).collect();
        let bits = bits_for(&policy, &samples);
        let (tightened, _, _) = Uint256::from_compact(bits);
        let (original, _, _) = Uint256::from_compact(0x1d00ffff);
        assert!(tightened < original);
    }

    #[test]
    fn timespan_is_clamped() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        // An absurd 100x slowdown is clamped to 4x
        let slow: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 6000, 0x1d00ffffu32)).collect();
        let capped: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 240, 0x1d00ffffu32)).collect();
        assert_eq!(bits_for(&policy, &slow), bits_for(&policy, &capped));
    }

    #[test]
    fn never_exceeds_the_limit() {
        let policy = WindowDifficulty::new(0x1e00ffff, 60, 10);
        let samples: Vec<_> = (0..10).map(|i| (1000 + (9 - i) * 240, 0x1e00ffffu32)).collect();
        assert_eq!(bits_for(&policy, &samples), 0x1e00ffff);
    }
}
