use crate::hash::HashWriter;
use crate::tx::Transaction;
use crate::Hash;

/// Computes the merkle root of a transaction list, additionally reporting
/// whether the list is *mutated*: a duplication of a trailing transaction
/// range that preserves the root. Such blocks must be rejected structurally
/// or the duplicated form could circulate as a distinct invalid block with
/// a valid merkle commitment.
pub fn merkle_root_with_mutation<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> (Hash, bool) {
    let mut level: Vec<Hash> = transactions.map(|tx| tx.id()).collect();
    let mut mutated = false;
    if level.is_empty() {
        return (Hash::ZERO, false);
    }
    while level.len() > 1 {
        // Detect duplicated sibling hashes before padding, so the implicit
        // self-pairing of an odd tail never flags
        for pair in level.chunks_exact(2) {
            if pair[0] == pair[1] {
                mutated = true;
            }
        }
        if level.len() % 2 != 0 {
            // Odd levels hash the last element with itself
            level.push(*level.last().unwrap());
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            next.push(hash_pair(pair[0], pair[1]));
        }
        level = next;
    }
    (level[0], mutated)
}

pub fn merkle_root<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> Hash {
    merkle_root_with_mutation(transactions).0
}

fn hash_pair(left: Hash, right: Hash) -> Hash {
    let mut hasher = HashWriter::merkle_branch();
    hasher.update(left).update(right);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{ScriptPublicKey, TransactionInput, TransactionOutput, TransactionOutpoint, SEQUENCE_FINAL};

    fn tx(seed: u64) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new(TransactionOutpoint::new(seed.into(), 0), vec![], SEQUENCE_FINAL, 0)],
            vec![TransactionOutput::new(seed * 100, ScriptPublicKey::default())],
            0,
        )
    }

    #[test]
    fn root_is_order_sensitive() {
        let txs = [tx(1), tx(2), tx(3)];
        let root = merkle_root(txs.iter());
        let reordered = [tx(2), tx(1), tx(3)];
        assert_ne!(root, merkle_root(reordered.iter()));
    }

    #[test]
    fn duplicated_tail_preserves_root_but_flags_mutation() {
        let txs = vec![tx(1), tx(2), tx(3)];
        let (root, mutated) = merkle_root_with_mutation(txs.iter());
        assert!(!mutated);

        // Duplicating the trailing transaction reproduces the implicit
        // odd-level duplication, so the root is unchanged
        let mut duplicated = txs.clone();
        duplicated.push(txs[2].clone());
        let (dup_root, dup_mutated) = merkle_root_with_mutation(duplicated.iter());
        assert_eq!(root, dup_root);
        assert!(dup_mutated);
    }

    #[test]
    fn single_transaction_root_is_its_id() {
        let only = tx(9);
        assert_eq!(merkle_root(std::iter::once(&only)), only.id());
    }
}
