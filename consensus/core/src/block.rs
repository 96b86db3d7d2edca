use crate::header::Header;
use crate::tx::Transaction;
use crate::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A cinder block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Arc<Vec<Transaction>>,
    /// Block signature produced by the staker's key for proof-of-stake
    /// blocks; empty for proof-of-work blocks
    pub signature: Vec<u8>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>, signature: Vec<u8>) -> Self {
        Self { header, transactions: Arc::new(transactions), signature }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    /// A block is proof-of-stake when its second transaction is a coinstake
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    /// The reward transaction: the coinstake for PoS blocks, the coinbase otherwise
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        if self.is_proof_of_stake() {
            self.transactions.get(1)
        } else {
            self.transactions.first()
        }
    }
}

/// An editable block used by tests and block builders
#[derive(Clone, Debug)]
pub struct MutableBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl MutableBlock {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions, signature: vec![] }
    }

    pub fn to_immutable(mut self) -> Block {
        self.header.finalize();
        Block::new(self.header, self.transactions, self.signature)
    }
}
