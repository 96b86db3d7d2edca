use crate::coin::Coin;
use serde::{Deserialize, Serialize};

/// Undo data for a single transaction: the coins its inputs destroyed,
/// in input order. Reward transactions spend nothing and carry an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionUndo {
    pub spent_coins: Vec<Coin>,
}

/// Undo data for a whole block. Holds one record per non-reward
/// transaction, in block order. Disconnecting replays these in reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub tx_undo: Vec<TransactionUndo>,
}

impl BlockUndo {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { tx_undo: Vec::with_capacity(capacity) }
    }
}
