use crate::model::stores::coins::UtxoSetStore;
use cinder_consensus_core::coin::Coin;
use cinder_consensus_core::tx::TransactionOutpoint;
use cinder_consensus_core::utxo::UtxoView;
use cinder_consensus_core::Hash;
use cinder_database::prelude::{DbWriter, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;

struct CachedCoin {
    /// `None` is a tombstone: the coin is spent relative to the backing store
    coin: Option<Coin>,
    /// Differs from the backing store, must be written on flush
    dirty: bool,
    /// Created since the last flush; the backing store has no version of
    /// it, so a spend can simply erase the entry
    fresh: bool,
}

/// The layered UTXO overlay: buffered writes over the durable coin store.
/// Exclusively owned by the chain state machine; reads from other threads
/// go through the store snapshot semantics instead.
///
/// Invariant: the view represents exactly the chain from genesis to
/// `best_block`, except mid-way through an atomically flushed step.
pub struct CachedUtxoView {
    store: UtxoSetStore,
    cache: RwLock<HashMap<TransactionOutpoint, CachedCoin>>,
    best_block: Hash,
}

impl CachedUtxoView {
    pub fn new(store: UtxoSetStore, best_block: Hash) -> Self {
        Self { store, cache: RwLock::new(HashMap::new()), best_block }
    }

    pub fn best_block(&self) -> Hash {
        self.best_block
    }

    pub fn set_best_block(&mut self, hash: Hash) {
        self.best_block = hash;
    }

    /// Number of buffered entries, drives flush thresholds
    pub fn cached_entries(&self) -> usize {
        self.cache.read().len()
    }

    /// Read through the overlay down to the store. Store misses are cached
    /// as absent only when a tombstone already exists; plain misses stay
    /// uncached to keep the overlay small.
    pub fn access_coin(&self, outpoint: &TransactionOutpoint) -> StoreResult<Option<Coin>> {
        if let Some(entry) = self.cache.read().get(outpoint) {
            return Ok(entry.coin.clone());
        }
        let coin = self.store.get(outpoint)?;
        if let Some(coin) = &coin {
            self.cache
                .write()
                .entry(*outpoint)
                .or_insert_with(|| CachedCoin { coin: Some(coin.clone()), dirty: false, fresh: false });
        }
        Ok(coin)
    }

    pub fn have_coin(&self, outpoint: &TransactionOutpoint) -> StoreResult<bool> {
        Ok(self.access_coin(outpoint)?.is_some())
    }

    /// Adds a coin. Returns `false` when an unspent coin already occupies
    /// the key and `may_overwrite` is unset; the caller treats that as a
    /// consensus-breaking duplicate and aborts the block.
    pub fn add_coin(&mut self, outpoint: TransactionOutpoint, coin: Coin, may_overwrite: bool) -> StoreResult<bool> {
        let existing = self.access_coin(&outpoint)?;
        if existing.is_some() && !may_overwrite {
            return Ok(false);
        }
        let mut cache = self.cache.write();
        let fresh = match cache.get(&outpoint) {
            // A spent-then-recreated fresh coin stays fresh
            Some(entry) => entry.fresh && entry.coin.is_none(),
            None => existing.is_none(),
        };
        cache.insert(outpoint, CachedCoin { coin: Some(coin), dirty: true, fresh });
        Ok(true)
    }

    /// Spends a coin, returning it for the undo record. `Ok(None)` means
    /// the coin does not exist or is already spent.
    pub fn spend_coin(&mut self, outpoint: &TransactionOutpoint) -> StoreResult<Option<Coin>> {
        let coin = match self.access_coin(outpoint)? {
            Some(coin) => coin,
            None => return Ok(None),
        };
        let mut cache = self.cache.write();
        let fresh = cache.get(outpoint).map(|entry| entry.fresh).unwrap_or(false);
        if fresh {
            // Never reached the store; forget it entirely
            cache.remove(outpoint);
        } else if let Some(entry) = cache.get_mut(outpoint) {
            entry.coin = None;
            entry.dirty = true;
        } else {
            cache.insert(*outpoint, CachedCoin { coin: None, dirty: true, fresh: false });
        }
        Ok(Some(coin))
    }

    /// Drops every buffered change, reverting the view to the last flushed
    /// store state. Used to recover after a failed chain step.
    pub fn discard(&mut self) -> StoreResult<()> {
        self.cache.write().clear();
        self.best_block = self.store.best_block()?.unwrap_or(Hash::ZERO);
        Ok(())
    }

    /// Writes every dirty entry and the best-block marker into `writer`
    /// and clears the overlay. The caller commits the batch atomically;
    /// a failed flush leaves the view indeterminate and must be treated
    /// as fatal rather than retried.
    pub fn flush(&mut self, mut writer: impl DbWriter) -> StoreResult<()> {
        let mut cache = self.cache.write();
        let added: Vec<(TransactionOutpoint, Coin)> = cache
            .iter()
            .filter_map(|(outpoint, entry)| match (&entry.coin, entry.dirty) {
                (Some(coin), true) => Some((*outpoint, coin.clone())),
                _ => None,
            })
            .collect();
        let removed: Vec<TransactionOutpoint> = cache
            .iter()
            .filter_map(|(outpoint, entry)| if entry.dirty && entry.coin.is_none() { Some(*outpoint) } else { None })
            .collect();
        self.store.write_diff(&mut writer, added.into_iter(), removed.into_iter())?;
        self.store.set_best_block(&mut writer, self.best_block)?;
        cache.clear();
        Ok(())
    }
}

impl UtxoView for CachedUtxoView {
    /// Infallible trait reads surface store failures as absent coins; the
    /// state machine uses the fallible methods on all consensus paths
    fn get_coin(&self, outpoint: &TransactionOutpoint) -> Option<Coin> {
        self.access_coin(outpoint).ok().flatten()
    }
}
