use rocksdb::WriteBatch;

use crate::db::DB;

/// Destination for store mutations. Stores write through this trait so the
/// same code path can either hit the DB immediately or accumulate into a
/// [`WriteBatch`] that commits atomically later.
pub trait DbWriter {
    fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), rocksdb::Error>;
    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), rocksdb::Error>;
}

/// Applies each mutation to the DB as it arrives
pub struct DirectDbWriter<'a> {
    db: &'a DB,
}

impl<'a> DirectDbWriter<'a> {
    pub fn new(db: &'a DB) -> Self {
        Self { db }
    }
}

impl DbWriter for DirectDbWriter<'_> {
    fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        self.db.put(key, value)
    }

    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        self.db.delete(key)
    }
}

/// Stages mutations in a batch; nothing reaches the DB until the caller
/// commits the batch itself
pub struct BatchDbWriter<'a> {
    batch: &'a mut WriteBatch,
}

impl<'a> BatchDbWriter<'a> {
    pub fn new(batch: &'a mut WriteBatch) -> Self {
        Self { batch }
    }
}

impl DbWriter for BatchDbWriter<'_> {
    fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        self.batch.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        self.batch.delete(key);
        Ok(())
    }
}

// Lets callers lend a writer to a helper without giving it up
impl<T: DbWriter> DbWriter for &mut T {
    #[inline]
    fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        (*self).put(key, value)
    }

    #[inline]
    fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<(), rocksdb::Error> {
        (*self).delete(key)
    }
}
