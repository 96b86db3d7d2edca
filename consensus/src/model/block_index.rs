use crate::model::stores::block_files::FileLocation;
use bitflags::bitflags;
use cinder_consensus_core::header::Header;
use cinder_consensus_core::work::{block_proof, Uint256};
use cinder_consensus_core::{BlockHashMap, Hash};
use std::ops::{Index, IndexMut};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        /// Full block data is stored on disk
        const HAVE_DATA = 0b0001;
        /// Undo data is stored on disk
        const HAVE_UNDO = 0b0010;
        /// The block itself failed validation
        const FAILED = 0b0100;
        /// Some ancestor failed validation
        const FAILED_CHILD = 0b1000;
    }
}

impl StatusFlags {
    pub fn is_invalid(&self) -> bool {
        self.intersects(StatusFlags::FAILED | StatusFlags::FAILED_CHILD)
    }
}

/// How far a block has been validated. Upgrades are monotonic; a block
/// never moves back to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValidityStage {
    /// Header checked and connected to the index tree
    Tree = 1,
    /// Transactions structurally checked (merkle, coinbase shape, sizes)
    Transactions = 2,
    /// Contextual checks against ancestor headers passed
    Chain = 3,
    /// Fully connected once with script verification
    Scripts = 4,
}

/// Stable handle of an index entry within its arena. Entries are never
/// removed at runtime, so handles stay valid for the index lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct BlockIndexEntry {
    pub hash: Hash,
    pub header: Header,
    pub parent: Option<EntryId>,
    /// Precomputed far-ancestor pointer enabling O(log n) ancestor walks
    pub skip: Option<EntryId>,
    pub height: u64,
    /// Cumulative proof from genesis, non-decreasing along any chain
    pub work: Uint256,
    pub validity: ValidityStage,
    pub flags: StatusFlags,
    /// Insertion order, breaks equal-work ties in chain selection. Lower
    /// wins; a precious override assigns values below every natural one.
    pub sequence_id: i64,
    pub data_location: Option<FileLocation>,
    pub undo_location: Option<FileLocation>,
}

impl BlockIndexEntry {
    pub fn has_data(&self) -> bool {
        self.flags.contains(StatusFlags::HAVE_DATA)
    }
}

/// The header forest: every block ever seen, rooted at genesis, addressed
/// by stable arena handles. Parent and skip relations are handles rather
/// than owning pointers, so entries can be upgraded in place while
/// snapshots keep reading.
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
    by_hash: BlockHashMap<EntryId>,
    next_sequence_id: i64,
}

/// Height the skip pointer of a block at `height` points to. Walks back
/// roughly half-way while staying cheap to chain, after the classic
/// skip-list construction.
fn skip_height(height: u64) -> u64 {
    if height < 2 {
        return 0;
    }
    fn invert_lowest_one(n: u64) -> u64 {
        n & (n - 1)
    }
    if height & 1 == 1 {
        invert_lowest_one(height) + 1
    } else {
        invert_lowest_one(height)
    }
}

impl BlockIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new(), by_hash: BlockHashMap::new(), next_sequence_id: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: &Hash) -> Option<EntryId> {
        self.by_hash.get(hash).copied()
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = EntryId> {
        (0..self.entries.len() as u32).map(EntryId)
    }

    /// Inserts a header whose parent (if any) is already indexed. Returns
    /// the existing handle when the hash is already present.
    pub fn insert(&mut self, header: Header, parent: Option<EntryId>) -> EntryId {
        if let Some(existing) = self.by_hash.get(&header.hash) {
            return *existing;
        }
        let (height, parent_work) = match parent {
            Some(parent_id) => {
                let parent_entry = &self[parent_id];
                (parent_entry.height + 1, parent_entry.work)
            }
            None => (0, Uint256::ZERO),
        };
        let skip = parent.and_then(|parent_id| self.ancestor(parent_id, skip_height(height)));
        let id = EntryId(self.entries.len() as u32);
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;
        self.by_hash.insert(header.hash, id);
        self.entries.push(BlockIndexEntry {
            hash: header.hash,
            parent,
            skip,
            height,
            work: parent_work + block_proof(header.bits),
            validity: ValidityStage::Tree,
            flags: StatusFlags::empty(),
            sequence_id,
            data_location: None,
            undo_location: None,
            header,
        });
        id
    }

    /// The ancestor of `id` at exactly `height`, using skip pointers
    pub fn ancestor(&self, id: EntryId, height: u64) -> Option<EntryId> {
        let mut walk = id;
        let mut walk_height = self[walk].height;
        if height > walk_height {
            return None;
        }
        while walk_height > height {
            let entry = &self[walk];
            let here = skip_height(walk_height);
            let below = skip_height(walk_height - 1);
            match entry.skip {
                // Take the skip link when it lands at or above the target
                // and a plain parent step would not get there faster
                Some(skip) if here == height || (here > height && !(below < here.saturating_sub(2) && below >= height)) => {
                    walk = skip;
                    walk_height = here;
                }
                _ => {
                    walk = entry.parent?;
                    walk_height -= 1;
                }
            }
        }
        Some(walk)
    }

    pub fn last_common_ancestor(&self, a: EntryId, b: EntryId) -> Option<EntryId> {
        let height = self[a].height.min(self[b].height);
        let mut a = self.ancestor(a, height)?;
        let mut b = self.ancestor(b, height)?;
        while a != b {
            a = self[a].parent?;
            b = self[b].parent?;
        }
        Some(a)
    }

    /// Whether `ancestor` lies on the chain from genesis to `descendant`
    pub fn is_ancestor_of(&self, ancestor: EntryId, descendant: EntryId) -> bool {
        self.ancestor(descendant, self[ancestor].height) == Some(ancestor)
    }

    /// Median timestamp of the last `window` blocks ending at `id`
    pub fn median_time_past(&self, id: EntryId, window: usize) -> u64 {
        let mut times = Vec::with_capacity(window);
        let mut current = Some(id);
        while let Some(entry_id) = current {
            if times.len() == window {
                break;
            }
            let entry = &self[entry_id];
            times.push(entry.header.timestamp);
            current = entry.parent;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Marks every indexed descendant of `id` as having a failed ancestor
    pub fn mark_descendants_failed(&mut self, id: EntryId) {
        // Entries are inserted parents-first, so one forward pass settles
        // transitive failure
        for i in id.as_usize() + 1..self.entries.len() {
            if let Some(parent) = self.entries[i].parent {
                if parent == id || self.entries[parent.as_usize()].flags.is_invalid() {
                    self.entries[i].flags |= StatusFlags::FAILED_CHILD;
                }
            }
        }
    }

    /// Clears failure flags on `id`, its ancestors and its descendants,
    /// allowing reconsideration of a previously rejected chain
    pub fn clear_failure_flags(&mut self, id: EntryId) {
        let mut current = Some(id);
        while let Some(entry_id) = current {
            self.entries[entry_id.as_usize()].flags &= !(StatusFlags::FAILED | StatusFlags::FAILED_CHILD);
            current = self.entries[entry_id.as_usize()].parent;
        }
        for i in 0..self.entries.len() {
            let cleared = match self.entries[i].parent {
                Some(parent) => !self.entries[parent.as_usize()].flags.is_invalid(),
                None => true,
            };
            if cleared && self.entries[i].flags.contains(StatusFlags::FAILED_CHILD) && !self.entries[i].flags.contains(StatusFlags::FAILED) {
                self.entries[i].flags &= !StatusFlags::FAILED_CHILD;
            }
        }
    }
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<EntryId> for BlockIndex {
    type Output = BlockIndexEntry;

    fn index(&self, id: EntryId) -> &BlockIndexEntry {
        &self.entries[id.as_usize()]
    }
}

impl IndexMut<EntryId> for BlockIndex {
    fn index_mut(&mut self, id: EntryId) -> &mut BlockIndexEntry {
        &mut self.entries[id.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::testutils::build_header_chain;

    fn indexed_chain(length: usize) -> (BlockIndex, Vec<EntryId>) {
        let mut index = BlockIndex::new();
        let genesis = Header::new(1, Hash::ZERO, Hash::ZERO, 1_000_000, 0x207fffff, 0);
        let mut ids = vec![index.insert(genesis.clone(), None)];
        for header in build_header_chain(&genesis, length) {
            let parent = ids.last().copied();
            ids.push(index.insert(header, parent));
        }
        (index, ids)
    }

    #[test]
    fn ancestor_navigation_agrees_with_linear_walk() {
        let (index, ids) = indexed_chain(200);
        for (height, id) in ids.iter().enumerate().step_by(23) {
            assert_eq!(index.ancestor(*ids.last().unwrap(), height as u64), Some(*id));
        }
        assert_eq!(index.ancestor(ids[10], 11), None);
        assert_eq!(index.ancestor(ids[10], 10), Some(ids[10]));
    }

    #[test]
    fn last_common_ancestor_of_forks() {
        let (mut index, ids) = indexed_chain(50);
        // Fork off height 30
        let fork_parent = ids[30];
        let fork_header = Header::new(1, index[fork_parent].hash, Hash::from(999u64), 1_000_000, 0x207fffff, 999);
        let fork_id = index.insert(fork_header, Some(fork_parent));

        assert_eq!(index.last_common_ancestor(*ids.last().unwrap(), fork_id), Some(fork_parent));
        assert!(index.is_ancestor_of(ids[30], fork_id));
        assert!(!index.is_ancestor_of(ids[31], fork_id));
    }

    #[test]
    fn cumulative_work_is_monotonic() {
        let (index, ids) = indexed_chain(20);
        for pair in ids.windows(2) {
            assert!(index[pair[0]].work < index[pair[1]].work);
        }
    }

    #[test]
    fn median_time_uses_the_window_middle() {
        let (index, ids) = indexed_chain(30);
        // Timestamps increase by 60 per block, so the median of the last
        // 11 blocks trails the tip by 5 spacings
        let tip = *ids.last().unwrap();
        let median = index.median_time_past(tip, 11);
        assert_eq!(median, index[tip].header.timestamp - 5 * 60);
    }

    #[test]
    fn failure_marks_propagate_and_clear() {
        let (mut index, ids) = indexed_chain(10);
        index[ids[5]].flags |= StatusFlags::FAILED;
        index.mark_descendants_failed(ids[5]);
        assert!(index[ids[7]].flags.contains(StatusFlags::FAILED_CHILD));
        assert!(!index[ids[4]].flags.is_invalid());

        index.clear_failure_flags(ids[5]);
        assert!(!index[ids[5]].flags.is_invalid());
        assert!(!index[ids[9]].flags.is_invalid());
    }
}
