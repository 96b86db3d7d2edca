use crate::constants::StorePrefix;
use cinder_consensus_core::coin::Coin;
use cinder_consensus_core::tx::TransactionOutpoint;
use cinder_consensus_core::Hash;
use cinder_database::prelude::{CachePolicy, CachedDbAccess, CachedDbItem, DbWriter, StoreError, StoreResult, DB};
use smallvec::SmallVec;
use std::sync::Arc;

/// Packed DB key of a coin: the 32 transaction id bytes followed by the
/// little-endian output index with trailing zero bytes trimmed. Trimming
/// keeps keys for the common low indexes short while preserving uniqueness
/// (the key length disambiguates).
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct UtxoKey(SmallVec<[u8; 36]>);

impl AsRef<[u8]> for UtxoKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&TransactionOutpoint> for UtxoKey {
    fn from(outpoint: &TransactionOutpoint) -> Self {
        let mut bytes = SmallVec::from_slice(&outpoint.transaction_id.as_bytes());
        let index_bytes = outpoint.index.to_le_bytes();
        let trimmed = 4 - index_bytes.iter().rev().take_while(|b| **b == 0).count();
        bytes.extend_from_slice(&index_bytes[..trimmed]);
        UtxoKey(bytes)
    }
}

/// The durable coin set plus the hash of the block it reflects. The best
/// block marker is written in the same batch as the coin diff, so the two
/// can never diverge on disk.
#[derive(Clone)]
pub struct UtxoSetStore {
    access: CachedDbAccess<UtxoKey, Coin>,
    best_block: CachedDbItem<Hash>,
}

impl UtxoSetStore {
    pub fn new(db: Arc<DB>, cache_policy: CachePolicy) -> Self {
        Self {
            access: CachedDbAccess::new(db.clone(), cache_policy, StorePrefix::UtxoSet.into()),
            best_block: CachedDbItem::new(db, StorePrefix::UtxoMeta.into()),
        }
    }

    pub fn get(&self, outpoint: &TransactionOutpoint) -> StoreResult<Option<Coin>> {
        match self.access.read(UtxoKey::from(outpoint)) {
            Ok(coin) => Ok(Some(coin)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn write_diff(
        &self,
        mut writer: impl DbWriter,
        added: impl IntoIterator<Item = (TransactionOutpoint, Coin)>,
        removed: impl IntoIterator<Item = TransactionOutpoint>,
    ) -> StoreResult<()> {
        self.access.write_many(&mut writer, added.into_iter().map(|(outpoint, coin)| (UtxoKey::from(&outpoint), coin)))?;
        self.access.delete_many(&mut writer, removed.into_iter().map(|outpoint| UtxoKey::from(&outpoint)))?;
        Ok(())
    }

    pub fn best_block(&self) -> StoreResult<Option<Hash>> {
        match self.best_block.read() {
            Ok(hash) => Ok(Some(hash)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn set_best_block(&mut self, writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.best_block.write(writer, &hash)
    }
}
