//! 256-bit unsigned arithmetic for difficulty targets and accumulated
//! chain work, plus the compact-bits target representation used in
//! block headers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Add, AddAssign, Shl, Shr};

/// Little-endian 4x64 limbs
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Hash)]
pub struct Uint256(pub [u64; 4]);

impl Uint256 {
    pub const ZERO: Uint256 = Uint256([0; 4]);
    pub const ONE: Uint256 = Uint256([1, 0, 0, 0]);
    pub const MAX: Uint256 = Uint256([u64::MAX; 4]);

    #[inline]
    pub const fn from_u64(word: u64) -> Self {
        Uint256([word, 0, 0, 0])
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (chunk, limb) in bytes.chunks_exact_mut(8).zip(self.0) {
            chunk.copy_from_slice(&limb.to_le_bytes());
        }
        bytes
    }

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (limb, chunk) in limbs.iter_mut().zip(bytes.chunks_exact(8)) {
            *limb = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        Uint256(limbs)
    }

    /// Position of the highest set bit plus one, or zero if `self` is zero
    pub fn bits(&self) -> u32 {
        for (i, &limb) in self.0.iter().enumerate().rev() {
            if limb != 0 {
                return (i as u32) * 64 + (64 - limb.leading_zeros());
            }
        }
        0
    }

    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    pub fn bitwise_not(self) -> Self {
        Uint256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    pub fn overflowing_add(self, other: Self) -> (Self, bool) {
        let mut limbs = [0u64; 4];
        let mut carry = false;
        for i in 0..4 {
            let (sum, c1) = self.0[i].overflowing_add(other.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            limbs[i] = sum;
            carry = c1 | c2;
        }
        (Uint256(limbs), carry)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        if self < other {
            return None;
        }
        let mut limbs = [0u64; 4];
        let mut borrow = false;
        for i in 0..4 {
            let (diff, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            limbs[i] = diff;
            borrow = b1 | b2;
        }
        Some(Uint256(limbs))
    }

    /// Widening multiply by a single word, reporting overflow past 256 bits
    pub fn overflowing_mul_u64(self, rhs: u64) -> (Self, bool) {
        let mut limbs = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let product = self.0[i] as u128 * rhs as u128 + carry;
            limbs[i] = product as u64;
            carry = product >> 64;
        }
        (Uint256(limbs), carry != 0)
    }

    /// Binary long division. `other` must be non-zero.
    pub fn div_rem(self, other: Self) -> (Self, Self) {
        assert!(!other.is_zero(), "division by zero");
        let mut quotient = Uint256::ZERO;
        let mut remainder = Uint256::ZERO;
        let bits = self.bits();
        for i in (0..bits).rev() {
            remainder = remainder << 1;
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if remainder >= other {
                remainder = remainder.checked_sub(other).unwrap();
                quotient.set_bit(i);
            }
        }
        (quotient, remainder)
    }

    #[inline]
    fn bit(&self, index: u32) -> bool {
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    #[inline]
    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1 << (index % 64);
    }

    /// Decodes the compact 32-bit target representation (sign-magnitude
    /// base-256 scientific notation carried in header `bits` fields).
    /// Returns the target plus negative/overflow indicators.
    pub fn from_compact(compact: u32) -> (Self, bool, bool) {
        let size = compact >> 24;
        let word = compact & 0x007f_ffff;
        let result = if size <= 3 {
            Uint256::from_u64((word >> (8 * (3 - size))) as u64)
        } else {
            Uint256::from_u64(word as u64) << (8 * (size - 3))
        };
        let negative = word != 0 && (compact & 0x0080_0000) != 0;
        let overflow = word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
        (result, negative, overflow)
    }

    /// Encodes `self` back into the compact representation
    pub fn to_compact(self) -> u32 {
        let mut size = (self.bits() + 7) / 8;
        let mut compact = if size <= 3 {
            (self.low_u64() << (8 * (3 - size))) as u32
        } else {
            (self >> (8 * (size - 3))).low_u64() as u32
        };
        // The 0x00800000 bit denotes the sign, so if it is already set,
        // divide the mantissa by 256 and increase the exponent
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }

    /// Compares `self` (interpreted as a 256-bit LE integer from a block hash)
    /// against a target
    pub fn from_hash(hash: crate::Hash) -> Self {
        Self::from_le_bytes(hash.as_bytes())
    }
}

/// The amount of proof a block with the given compact target contributes to
/// its chain: `2^256 / (target + 1)`, computed as `(~target / (target + 1)) + 1`
/// to stay within 256 bits. Invalid or zero targets contribute nothing.
pub fn block_proof(bits: u32) -> Uint256 {
    let (target, negative, overflow) = Uint256::from_compact(bits);
    if negative || overflow || target.is_zero() {
        return Uint256::ZERO;
    }
    let (denominator, carry) = target.overflowing_add(Uint256::ONE);
    if carry {
        // target == MAX, proof is one
        return Uint256::ONE;
    }
    target.bitwise_not().div_rem(denominator).0 + Uint256::ONE
}

impl PartialOrd for Uint256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uint256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl Add for Uint256 {
    type Output = Uint256;

    fn add(self, other: Uint256) -> Uint256 {
        let (sum, carry) = self.overflowing_add(other);
        debug_assert!(!carry, "Uint256 addition overflow");
        sum
    }
}

impl AddAssign for Uint256 {
    fn add_assign(&mut self, other: Uint256) {
        *self = *self + other;
    }
}

impl Shl<u32> for Uint256 {
    type Output = Uint256;

    fn shl(self, shift: u32) -> Uint256 {
        debug_assert!(shift < 256);
        let mut limbs = [0u64; 4];
        let limb_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in limb_shift..4 {
            limbs[i] = self.0[i - limb_shift] << bit_shift;
            if bit_shift > 0 && i > limb_shift {
                limbs[i] |= self.0[i - limb_shift - 1] >> (64 - bit_shift);
            }
        }
        Uint256(limbs)
    }
}

impl Shr<u32> for Uint256 {
    type Output = Uint256;

    fn shr(self, shift: u32) -> Uint256 {
        debug_assert!(shift < 256);
        let mut limbs = [0u64; 4];
        let limb_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in limb_shift..4 {
            limbs[i - limb_shift] = self.0[i] >> bit_shift;
            if bit_shift > 0 && i + 1 < 4 {
                limbs[i - limb_shift] |= self.0[i + 1] << (64 - bit_shift);
            }
        }
        Uint256(limbs)
    }
}

impl Display for Uint256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut bytes = self.to_le_bytes();
        bytes.reverse();
        let mut hex = [0u8; 64];
        faster_hex::hex_encode(&bytes, &mut hex).expect("The output is exactly twice the size of the input");
        f.write_str(std::str::from_utf8(&hex).expect("hex is always valid UTF-8"))
    }
}

impl Debug for Uint256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_with_carries() {
        let a = Uint256([u64::MAX, 0, 0, 0]);
        let b = Uint256::ONE;
        assert_eq!(a + b, Uint256([0, 1, 0, 0]));

        let mut acc = Uint256::ZERO;
        for _ in 0..1000 {
            acc += Uint256::from_u64(u64::MAX);
        }
        assert_eq!(acc.bits(), 74);
    }

    #[test]
    fn shifts() {
        let one = Uint256::ONE;
        assert_eq!((one << 255) >> 255, one);
        assert_eq!((one << 64).0, [0, 1, 0, 0]);
        assert_eq!((Uint256([0, 1, 0, 0]) >> 1).0, [1 << 63, 0, 0, 0]);
    }

    #[test]
    fn div_rem_basics() {
        let (q, r) = Uint256::from_u64(1000).div_rem(Uint256::from_u64(7));
        assert_eq!(q, Uint256::from_u64(142));
        assert_eq!(r, Uint256::from_u64(6));

        let big = Uint256::ONE << 200;
        let (q, r) = big.div_rem(Uint256::ONE << 100);
        assert_eq!(q, Uint256::ONE << 100);
        assert!(r.is_zero());
    }

    #[test]
    fn compact_roundtrip() {
        // Mainnet-style and regtest-style limits
        for bits in [0x1d00ffffu32, 0x207fffff, 0x1b0404cb] {
            let (target, negative, overflow) = Uint256::from_compact(bits);
            assert!(!negative && !overflow);
            assert_eq!(target.to_compact(), bits);
        }
    }

    #[test]
    fn compact_edge_cases() {
        let (target, negative, overflow) = Uint256::from_compact(0);
        assert!(target.is_zero() && !negative && !overflow);

        // Sign bit set
        let (_, negative, _) = Uint256::from_compact(0x0180_8000);
        assert!(negative);
        let (_, negative, _) = Uint256::from_compact(0x0480_0001);
        assert!(negative);
        // Sign bit set but zero mantissa is not negative
        let (_, negative, _) = Uint256::from_compact(0x0080_0000);
        assert!(!negative);

        // Exponent too large
        let (_, _, overflow) = Uint256::from_compact(0x2300_0001);
        assert!(overflow);
    }

    #[test]
    fn proof_is_inverse_of_target() {
        // Easier target (higher) contributes less work
        let easy = block_proof(0x207fffff);
        let hard = block_proof(0x1d00ffff);
        assert!(hard > easy);
        assert!(easy >= Uint256::ONE);

        // Known value: for target 2^224-ish (0x1d00ffff), proof ~= 2^32 / (0xffff0000...)
        assert_eq!(block_proof(0x1d00ffff).low_u64(), 0x0000_0001_0001_0001);
    }

    #[test]
    fn invalid_targets_contribute_nothing() {
        assert_eq!(block_proof(0), Uint256::ZERO);
        assert_eq!(block_proof(0x2300_0001), Uint256::ZERO);
    }
}
