use crate::Mempool;
use cinder_consensus_core::tx::{Transaction, TransactionId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    tx: Transaction,
    admission_time: u64,
    fee_delta: i64,
}

/// A warm-restart image of the pool: transactions in admission order plus
/// the fee-delta side table (which also covers transactions currently
/// outside the pool). Loading re-runs every record through the acceptance
/// pipeline, so stale records are silently shed.
#[derive(Serialize, Deserialize)]
pub struct MempoolSnapshot {
    version: u32,
    records: Vec<SnapshotRecord>,
    fee_deltas: Vec<(TransactionId, i64)>,
}

impl MempoolSnapshot {
    pub fn serialize(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: MempoolSnapshot = bincode::deserialize(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Yields `(transaction, admission_time)` pairs in admission order,
    /// so parents always precede their children on re-admission
    pub fn transactions(self) -> impl Iterator<Item = (Transaction, u64)> {
        self.records.into_iter().map(|record| (record.tx, record.admission_time))
    }

    pub fn fee_deltas(&self) -> &[(TransactionId, i64)] {
        &self.fee_deltas
    }
}

impl Mempool {
    pub fn snapshot(&self) -> MempoolSnapshot {
        let records = self
            .pool
            .iter()
            .sorted_by_key(|entry| entry.sequence)
            .map(|entry| SnapshotRecord {
                tx: (*entry.tx).clone(),
                admission_time: entry.admission_time,
                fee_delta: entry.fee_delta,
            })
            .collect();
        let fee_deltas = self.fee_deltas.iter().map(|(id, delta)| (*id, *delta)).collect();
        MempoolSnapshot { version: SNAPSHOT_VERSION, records, fee_deltas }
    }
}
