use crate::db::DB;
use crate::errors::StoreError;
use crate::key::DbKey;
use crate::writer::DbWriter;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// A single typed value stored under a fixed key, memoized after the first
/// read. Used for store-level metadata such as tip markers.
#[derive(Clone)]
pub struct CachedDbItem<T> {
    db: Arc<DB>,
    key: Vec<u8>,
    cached: Arc<RwLock<Option<T>>>,
}

impl<T> CachedDbItem<T> {
    pub fn new(db: Arc<DB>, key: Vec<u8>) -> Self {
        Self { db, key, cached: Arc::new(RwLock::new(None)) }
    }

    pub fn read(&self) -> Result<T, StoreError>
    where
        T: Clone + DeserializeOwned,
    {
        if let Some(item) = self.cached.read().as_ref() {
            return Ok(item.clone());
        }
        let slice =
            self.db.get_pinned(&self.key)?.ok_or_else(|| StoreError::KeyNotFound(DbKey::prefix_only(&self.key)))?;
        let item: T = bincode::deserialize(&slice)?;
        self.cached.write().replace(item.clone());
        Ok(item)
    }

    pub fn write(&mut self, mut writer: impl DbWriter, item: &T) -> Result<(), StoreError>
    where
        T: Clone + Serialize,
    {
        writer.put(&self.key, bincode::serialize(item)?)?;
        self.cached.write().replace(item.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prelude::DirectDbWriter, utils::create_temp_db};

    #[test]
    fn missing_item_then_roundtrip() {
        let (_guard, db) = create_temp_db();
        let mut item = CachedDbItem::<u64>::new(db.clone(), b"best".to_vec());
        assert!(matches!(item.read(), Err(StoreError::KeyNotFound(_))));

        item.write(DirectDbWriter::new(&db), &7).unwrap();
        assert_eq!(item.read().unwrap(), 7);

        // A fresh handle over the same key sees the persisted value
        let fresh = CachedDbItem::<u64>::new(db, b"best".to_vec());
        assert_eq!(fresh.read().unwrap(), 7);
    }
}
