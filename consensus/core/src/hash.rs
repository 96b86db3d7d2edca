use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

pub const HASH_SIZE: usize = 32;

/// A 32-byte domain hash (block hashes, transaction ids, kernel hashes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const ZERO: Hash = Hash([0; HASH_SIZE]);

    #[inline(always)]
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    #[inline(always)]
    pub const fn as_bytes(&self) -> [u8; HASH_SIZE] {
        self.0
    }

    /// # Panics
    /// Panics if `bytes` length is not exactly `HASH_SIZE`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Hash(<[u8; HASH_SIZE]>::try_from(bytes).expect("Slice must have the length of Hash"))
    }

    #[inline(always)]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    /// Interprets the hash as a little-endian 256-bit integer and returns its 64 least significant bits.
    /// Used for cheap tie-breaking and test construction.
    pub fn to_le_u64_low(&self) -> u64 {
        u64::from_le_bytes(self.0[..8].try_into().unwrap())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut hex = [0u8; HASH_SIZE * 2];
        faster_hex::hex_encode(&self.0, &mut hex).expect("The output is exactly twice the size of the input");
        f.write_str(std::str::from_utf8(&hex).expect("hex is always valid UTF-8"))
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Hash {
    type Err = faster_hex::Error;

    fn from_str(hash_str: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        faster_hex::hex_decode(hash_str.as_bytes(), &mut bytes)?;
        Ok(Hash(bytes))
    }
}

impl From<u64> for Hash {
    fn from(word: u64) -> Self {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[..8].copy_from_slice(&word.to_le_bytes());
        Hash(bytes)
    }
}

/// A domain-separated blake2b-256 hashing writer
#[derive(Clone)]
pub struct HashWriter(blake2b_simd::State);

impl HashWriter {
    fn with_domain(domain: &[u8]) -> Self {
        let mut params = blake2b_simd::Params::new();
        params.hash_length(HASH_SIZE).key(domain);
        Self(params.to_state())
    }

    pub fn block_hash() -> Self {
        Self::with_domain(b"CinderBlockHash")
    }

    pub fn transaction_id() -> Self {
        Self::with_domain(b"CinderTxID")
    }

    pub fn merkle_branch() -> Self {
        Self::with_domain(b"CinderMerkle")
    }

    pub fn stake_kernel() -> Self {
        Self::with_domain(b"CinderStakeKrnl")
    }

    #[inline(always)]
    pub fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
        self.0.update(data.as_ref());
        self
    }

    #[inline(always)]
    pub fn finalize(&self) -> Hash {
        Hash::from_slice(self.0.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_roundtrip() {
        let hash: Hash = 0xdeadbeefu64.into();
        let parsed: Hash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.to_string().len(), 64);
    }

    #[test]
    fn domains_separate() {
        let a = HashWriter::block_hash().update(b"payload").finalize();
        let b = HashWriter::transaction_id().update(b"payload").finalize();
        assert_ne!(a, b);
    }

    #[test]
    fn writer_is_incremental() {
        let whole = HashWriter::block_hash().update(b"hello world").finalize();
        let mut split = HashWriter::block_hash();
        split.update(b"hello ").update(b"world");
        assert_eq!(whole, split.finalize());
    }
}
