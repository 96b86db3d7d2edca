use crate::tx::TransactionOutput;
use crate::Amount;
use serde::{Deserialize, Serialize};

/// An unspent transaction output together with the metadata required to
/// validate spends of it. Created when a block connects the creating
/// transaction, moved into an undo record when spent, never otherwise mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TransactionOutput,
    /// Height of the block that created this coin
    pub height: u64,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
}

impl Coin {
    pub fn new(output: TransactionOutput, height: u64, is_coinbase: bool, is_coinstake: bool) -> Self {
        Self { output, height, is_coinbase, is_coinstake }
    }

    pub fn value(&self) -> Amount {
        self.output.value
    }

    /// Reward coins (coinbase or coinstake) are spendable only after the
    /// maturity depth has passed
    pub fn is_reward(&self) -> bool {
        self.is_coinbase || self.is_coinstake
    }

    pub fn confirmations(&self, tip_height: u64) -> u64 {
        tip_height.saturating_sub(self.height) + 1
    }
}
