use crate::constants::StorePrefix;
use crate::model::block_index::{StatusFlags, ValidityStage};
use crate::model::stores::block_files::FileLocation;
use cinder_consensus_core::header::Header;
use cinder_consensus_core::Hash;
use cinder_database::prelude::{CachePolicy, CachedDbAccess, CachedDbItem, DbWriter, StoreError, StoreResult, DB};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durable form of a block index entry. Work, skip pointers and sequence
/// ids are recomputed on load, so only intrinsic facts are persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct IndexEntryRecord {
    pub header: Header,
    pub height: u64,
    pub validity: u8,
    pub flags: u8,
    pub data_location: Option<FileLocation>,
    pub undo_location: Option<FileLocation>,
}

impl IndexEntryRecord {
    pub fn validity_stage(&self) -> ValidityStage {
        match self.validity {
            1 => ValidityStage::Tree,
            2 => ValidityStage::Transactions,
            3 => ValidityStage::Chain,
            _ => ValidityStage::Scripts,
        }
    }

    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.flags)
    }
}

/// Persisted block index plus the recorded active tip
#[derive(Clone)]
pub struct BlockIndexStore {
    access: CachedDbAccess<Hash, IndexEntryRecord>,
    tip: CachedDbItem<Hash>,
}

impl BlockIndexStore {
    pub fn new(db: Arc<DB>, cache_policy: CachePolicy) -> Self {
        Self {
            access: CachedDbAccess::new(db.clone(), cache_policy, StorePrefix::BlockIndex.into()),
            tip: CachedDbItem::new(db, StorePrefix::ChainTip.into()),
        }
    }

    pub fn write(&self, writer: impl DbWriter, record: &IndexEntryRecord) -> StoreResult<()> {
        self.access.write(writer, record.header.hash, record.clone())
    }

    /// Every persisted record, in arbitrary key order; callers sort by
    /// height before rebuilding the in-memory forest
    pub fn load_all(&self) -> StoreResult<Vec<IndexEntryRecord>> {
        let mut records = Vec::new();
        for result in self.access.iter() {
            let (_, record) = result?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn tip(&self) -> StoreResult<Option<Hash>> {
        match self.tip.read() {
            Ok(hash) => Ok(Some(hash)),
            Err(StoreError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn set_tip(&mut self, writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.tip.write(writer, &hash)
    }
}
