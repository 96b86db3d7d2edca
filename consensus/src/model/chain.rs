use crate::model::block_index::{BlockIndex, EntryId};
use cinder_consensus_core::Hash;

/// The active chain as an ordered list of index handles, position equals
/// height. Mutated only by the chain state machine, one block at a time.
pub struct ActiveChain {
    entries: Vec<EntryId>,
}

impl ActiveChain {
    pub fn new(genesis: EntryId) -> Self {
        Self { entries: vec![genesis] }
    }

    /// Rebuilds a chain from a genesis-rooted, parent-ordered entry list
    pub fn from_entries(entries: Vec<EntryId>) -> Self {
        debug_assert!(!entries.is_empty());
        Self { entries }
    }

    pub fn tip(&self) -> EntryId {
        *self.entries.last().unwrap()
    }

    pub fn tip_height(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    pub fn at_height(&self, height: u64) -> Option<EntryId> {
        self.entries.get(height as usize).copied()
    }

    pub fn contains(&self, index: &BlockIndex, id: EntryId) -> bool {
        self.at_height(index[id].height) == Some(id)
    }

    pub fn push(&mut self, index: &BlockIndex, id: EntryId) {
        debug_assert_eq!(index[id].height, self.entries.len() as u64);
        debug_assert_eq!(index[id].parent, Some(self.tip()));
        self.entries.push(id);
    }

    pub fn pop(&mut self) -> Option<EntryId> {
        // Genesis is never disconnected
        if self.entries.len() > 1 {
            self.entries.pop()
        } else {
            None
        }
    }

    /// A sparse locator of the active chain: dense near the tip, then
    /// exponentially thinning back to genesis. Lets a peer find the fork
    /// point with logarithmically many hashes.
    pub fn locator(&self, index: &BlockIndex) -> Vec<Hash> {
        let mut hashes = Vec::new();
        let mut step = 1u64;
        let mut height = self.tip_height();
        loop {
            hashes.push(index[self.entries[height as usize]].hash);
            if height == 0 {
                break;
            }
            if hashes.len() >= 10 {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }
        hashes
    }
}
