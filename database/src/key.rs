use smallvec::SmallVec;
use std::fmt::Display;

/// Size of the on-stack portion of a DB key. Keys are typically
/// a single prefix byte followed by a 32-byte hash plus a short
/// suffix, so 36 bytes avoid heap allocation in practice.
const PREALLOC_LEN: usize = 36;

/// A DB key composed of a store prefix (bucket) and the actual key bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbKey {
    path: SmallVec<[u8; PREALLOC_LEN]>,
    prefix_len: usize,
}

impl DbKey {
    pub fn new<TKey: AsRef<[u8]>>(prefix: &[u8], key: TKey) -> Self {
        Self {
            path: prefix.iter().chain(key.as_ref().iter()).copied().collect(),
            prefix_len: prefix.len(),
        }
    }

    pub fn prefix_only(prefix: &[u8]) -> Self {
        Self::new(prefix, [])
    }

    /// Appends an additional bucket to the key prefix, useful for nested stores
    pub fn add_bucket<TBucket: AsRef<[u8]>>(&mut self, bucket: TBucket) {
        self.path.extend_from_slice(bucket.as_ref());
        self.prefix_len += bucket.as_ref().len();
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }
}

impl AsRef<[u8]> for DbKey {
    fn as_ref(&self) -> &[u8] {
        &self.path
    }
}

impl Display for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&faster_hex::hex_string(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let key = DbKey::new(&[7], [1u8; 32]);
        assert_eq!(key.prefix_len(), 1);
        assert_eq!(key.as_ref().len(), 33);

        let mut bucketed = DbKey::prefix_only(&[7]);
        bucketed.add_bucket([9, 9]);
        assert_eq!(bucketed.prefix_len(), 3);
    }
}
