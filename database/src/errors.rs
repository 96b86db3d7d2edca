use crate::prelude::DbKey;
use thiserror::Error;

/// Store-level failures. Missing keys get their own variant so callers can
/// treat absence as a normal outcome; everything else is infrastructure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no entry under key {0}")]
    KeyNotFound(DbKey),

    #[error("store inconsistency: {0}")]
    DataInconsistency(String),

    #[error("rocksdb failure: {0}")]
    DbError(#[from] rocksdb::Error),

    #[error("block file i/o failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("store codec failure: {0}")]
    DeserializationError(#[from] Box<bincode::ErrorKind>),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
