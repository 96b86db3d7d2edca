use crate::cache::{Cache, CachePolicy};
use crate::db::DB;
use crate::errors::StoreError;
use crate::key::DbKey;
use crate::writer::DbWriter;

use rocksdb::{Direction, IteratorMode, ReadOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Typed access to a single keyspace prefix with a bounded read cache in
/// front of the DB. Writes go through a caller-supplied [`DbWriter`] and
/// land in the cache at the same time, so a batch that has not committed
/// yet is already visible to readers holding this access object. Stores
/// relying on that property must only hand out data after the batch wins.
#[derive(Clone)]
pub struct CachedDbAccess<TKey, TData>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    db: Arc<DB>,
    cache: Cache<TKey, TData>,
    prefix: Vec<u8>,
}

impl<TKey, TData> CachedDbAccess<TKey, TData>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync + AsRef<[u8]>,
    TData: Clone + Send + Sync,
{
    pub fn new(db: Arc<DB>, cache_policy: CachePolicy, prefix: Vec<u8>) -> Self {
        Self { db, cache: Cache::new(cache_policy), prefix }
    }

    pub fn read(&self, key: TKey) -> Result<TData, StoreError>
    where
        TData: DeserializeOwned,
    {
        if let Some(data) = self.cache.get(&key) {
            return Ok(data);
        }
        let db_key = DbKey::new(&self.prefix, key.as_ref());
        match self.db.get_pinned(&db_key)? {
            Some(slice) => {
                let data: TData = bincode::deserialize(&slice)?;
                self.cache.insert(key, data.clone());
                Ok(data)
            }
            None => Err(StoreError::KeyNotFound(db_key)),
        }
    }

    pub fn write(&self, mut writer: impl DbWriter, key: TKey, data: TData) -> Result<(), StoreError>
    where
        TData: Serialize,
    {
        let encoded = bincode::serialize(&data)?;
        writer.put(DbKey::new(&self.prefix, key.as_ref()), encoded)?;
        self.cache.insert(key, data);
        Ok(())
    }

    pub fn write_many(
        &self,
        mut writer: impl DbWriter,
        items: impl IntoIterator<Item = (TKey, TData)>,
    ) -> Result<(), StoreError>
    where
        TData: Serialize,
    {
        for (key, data) in items {
            self.write(&mut writer, key, data)?;
        }
        Ok(())
    }

    pub fn delete(&self, mut writer: impl DbWriter, key: TKey) -> Result<(), StoreError> {
        self.cache.remove(&key);
        writer.delete(DbKey::new(&self.prefix, key.as_ref()))?;
        Ok(())
    }

    pub fn delete_many(&self, mut writer: impl DbWriter, keys: impl IntoIterator<Item = TKey>) -> Result<(), StoreError> {
        for key in keys {
            self.delete(&mut writer, key)?;
        }
        Ok(())
    }

    /// Walks every entry under this store's prefix, yielding the raw key
    /// suffix alongside the decoded value. Bypasses the cache.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Box<[u8]>, TData), StoreError>> + '_
    where
        TData: DeserializeOwned,
    {
        let prefix = DbKey::prefix_only(&self.prefix);
        let skip = prefix.prefix_len();
        let mut opts = ReadOptions::default();
        opts.set_iterate_range(rocksdb::PrefixRange(prefix.as_ref()));
        self.db.iterator_opt(IteratorMode::From(prefix.as_ref(), Direction::Forward), opts).map(move |entry| {
            let (key, bytes) = entry?;
            Ok((key[skip..].into(), bincode::deserialize(&bytes)?))
        })
    }
}
