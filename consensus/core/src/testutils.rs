//! Builders shared by tests across the workspace.

use crate::block::Block;
use crate::header::Header;
use crate::merkle::merkle_root;
use crate::tx::{
    ScriptPublicKey, Transaction, TransactionInput, TransactionOutpoint, TransactionOutput, SEQUENCE_FINAL,
};
use crate::work::Uint256;
use crate::{Amount, Hash};

/// Grinds the nonce until the header hash satisfies its own target.
/// Test networks pin an easy target, so this loops only a handful of times.
pub fn solve_pow(header: &mut Header) {
    let (target, _, _) = Uint256::from_compact(header.bits);
    loop {
        header.finalize();
        if Uint256::from_hash(header.hash) <= target {
            return;
        }
        header.nonce += 1;
    }
}

/// Builds a coinbase paying `value` to a throwaway script. The height tag
/// in the signature script makes coinbases at different heights distinct.
pub fn build_coinbase(height: u64, value: Amount) -> Transaction {
    Transaction::new(
        1,
        vec![TransactionInput::new(TransactionOutpoint::null(), height.to_le_bytes().to_vec(), SEQUENCE_FINAL, 0)],
        vec![TransactionOutput::new(value, ScriptPublicKey::from_vec(0, vec![0xac]))],
        0,
    )
}

/// Builds a transaction spending the given outpoints into a single output
pub fn build_spend(outpoints: &[TransactionOutpoint], value: Amount) -> Transaction {
    Transaction::new(
        2,
        outpoints
            .iter()
            .map(|outpoint| TransactionInput::new(*outpoint, vec![0x51], SEQUENCE_FINAL, 1))
            .collect(),
        vec![TransactionOutput::new(value, ScriptPublicKey::from_vec(0, vec![0xac]))],
        0,
    )
}

/// Builds a block on top of `parent` with a fresh coinbase prepended to
/// `txs`. The nonce perturbs the hash so sibling blocks are distinct.
pub fn build_block(
    parent: &Header,
    parent_height: u64,
    subsidy: Amount,
    txs: Vec<Transaction>,
    nonce: u64,
) -> Block {
    let height = parent_height + 1;
    let mut transactions = vec![build_coinbase(height, subsidy)];
    transactions.extend(txs);
    let root = merkle_root(transactions.iter());
    let mut header = Header::new(1, parent.hash, root, parent.timestamp + 60, parent.bits, nonce);
    solve_pow(&mut header);
    Block::new(header, transactions, vec![])
}

/// Builds a standalone header chain of the given length above `parent`,
/// with empty merkle roots. Useful for index-only tests.
pub fn build_header_chain(parent: &Header, length: usize) -> Vec<Header> {
    let mut headers = Vec::with_capacity(length);
    let mut prev = parent.clone();
    for i in 0..length {
        let header = Header::new(1, prev.hash, Hash::from(i as u64 + 1), prev.timestamp + 60, prev.bits, i as u64);
        prev = header.clone();
        headers.push(header);
    }
    headers
}
