use crate::coin::Coin;
use crate::tx::TransactionOutpoint;

/// A read-only view over some state of the UTXO set. Implementations may
/// resolve reads through an overlay chain down to a backing store.
pub trait UtxoView {
    fn get_coin(&self, outpoint: &TransactionOutpoint) -> Option<Coin>;

    fn have_coin(&self, outpoint: &TransactionOutpoint) -> bool {
        self.get_coin(outpoint).is_some()
    }
}

impl<V: UtxoView + ?Sized> UtxoView for &V {
    fn get_coin(&self, outpoint: &TransactionOutpoint) -> Option<Coin> {
        (*self).get_coin(outpoint)
    }
}
