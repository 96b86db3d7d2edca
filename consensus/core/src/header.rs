use crate::hash::HashWriter;
use crate::Hash;
use serde::{Deserialize, Serialize};

/// A cinder block header. `hash` is a cache of the header hash and is
/// excluded from hashing itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub hash: Hash,
    pub version: u32,
    pub parent: Hash,
    pub merkle_root: Hash,
    /// Timestamp in seconds since the UNIX epoch
    pub timestamp: u64,
    /// Compact difficulty target
    pub bits: u32,
    pub nonce: u64,
}

impl Header {
    pub fn new(version: u32, parent: Hash, merkle_root: Hash, timestamp: u64, bits: u32, nonce: u64) -> Self {
        let mut header = Self { hash: Hash::ZERO, version, parent, merkle_root, timestamp, bits, nonce };
        header.finalize();
        header
    }

    /// Recomputes the cached hash. Must be called after mutating any field.
    pub fn finalize(&mut self) {
        self.hash = self.compute_hash();
    }

    fn compute_hash(&self) -> Hash {
        let mut hasher = HashWriter::block_hash();
        hasher
            .update(self.version.to_le_bytes())
            .update(self.parent)
            .update(self.merkle_root)
            .update(self.timestamp.to_le_bytes())
            .update(self.bits.to_le_bytes())
            .update(self.nonce.to_le_bytes());
        hasher.finalize()
    }
}
