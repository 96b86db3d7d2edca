//! The chain state machine: owns the block index, the active chain, the
//! UTXO overlay and the flat block files, and drives every transition
//! between them. All methods take `&mut self`; concurrency is layered on
//! top by the consensus facade.

use crate::errors::{BlockOutcome, ConsensusError, ConsensusResult};
use crate::model::block_index::{BlockIndex, BlockIndexEntry, EntryId, StatusFlags, ValidityStage};
use crate::model::chain::ActiveChain;
use crate::model::stores::block_files::BlockFileStore;
use crate::model::stores::coins::UtxoSetStore;
use crate::model::stores::index::{BlockIndexStore, IndexEntryRecord};
use crate::model::utxo_cache::CachedUtxoView;
use crate::processes::connect::{connect_block, ConnectContext};
use crate::processes::contextual::check_block_contextual;
use crate::processes::difficulty::WindowDifficulty;
use crate::processes::disconnect::{disconnect_block, DisconnectOutcome};
use crate::processes::stake::WeightedStakeKernel;
use crate::processes::structural::check_block_structure;
use cinder_consensus_core::block::Block;
use cinder_consensus_core::config::{Config, Params};
use cinder_consensus_core::errors::block::RuleError;
use cinder_consensus_core::events::ConsensusEvent;
use cinder_consensus_core::policies::{DifficultyPolicy, FixedDifficulty, PermissiveKernel, PermissiveScripts, ScriptEngine, StakeKernel};
use cinder_consensus_core::tx::{Transaction, TransactionId};
use cinder_consensus_core::work::Uint256;
use cinder_consensus_core::Hash;
use cinder_database::prelude::{BatchDbWriter, Cache, CachePolicy, StoreError, WriteBatch, DB};
use log::{debug, info, warn};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INDEX_STORE_CACHE_SIZE: usize = 4096;
const SCRIPT_CACHE_SIZE: usize = 32_768;

/// The pluggable validation seams a chain state is built with
pub struct ChainPolicies {
    pub difficulty: Box<dyn DifficultyPolicy>,
    pub kernel: Box<dyn StakeKernel>,
    pub scripts: Box<dyn ScriptEngine>,
}

impl ChainPolicies {
    /// Window retargeting and the weighted stake kernel; script execution
    /// stays pluggable and defaults to accepting
    pub fn standard(params: &Params) -> Self {
        Self {
            difficulty: Box::new(WindowDifficulty::new(
                params.pow_limit_bits,
                params.target_spacing,
                params.difficulty_window as usize,
            )),
            kernel: Box::new(WeightedStakeKernel::new(params.target_spacing)),
            scripts: Box::new(PermissiveScripts),
        }
    }

    /// Fixed difficulty and accept-all kernel/scripts, for simulation nets
    pub fn permissive(params: &Params) -> Self {
        Self {
            difficulty: Box::new(FixedDifficulty(params.pow_limit_bits)),
            kernel: Box::new(PermissiveKernel),
            scripts: Box::new(PermissiveScripts),
        }
    }
}

/// Everything a processed block changed, handed back to the caller for
/// mempool reconciliation and event publishing.
pub struct ChainUpdate {
    pub outcome: BlockOutcome,
    pub events: Vec<ConsensusEvent>,
    /// Transaction lists of newly connected blocks, in connect order
    pub connected: Vec<Arc<Vec<Transaction>>>,
    /// Non-reward transactions of disconnected blocks, oldest block first,
    /// eligible for re-admission into the pool
    pub disconnected: Vec<Transaction>,
}

impl ChainUpdate {
    fn new(outcome: BlockOutcome) -> Self {
        Self { outcome, events: Vec::new(), connected: Vec::new(), disconnected: Vec::new() }
    }
}

/// Chain-selection key: most work wins, earliest arrival breaks ties.
/// The maximum key is the preferred candidate.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateKey {
    work: Uint256,
    sequence: Reverse<i64>,
    id: EntryId,
}

pub struct ChainState {
    config: Arc<Config>,
    db: Arc<DB>,
    index: BlockIndex,
    chain: ActiveChain,
    view: CachedUtxoView,
    index_store: BlockIndexStore,
    files: BlockFileStore,
    policies: ChainPolicies,
    script_cache: Cache<TransactionId, ()>,
    /// Every block ever offered for activation. Entries are lazily dropped
    /// once stale; the tip itself always remains a member.
    candidates: BTreeSet<CandidateKey>,
    /// Index entries changed since the last flush
    dirty: HashSet<EntryId>,
    precious_counter: i64,
    last_flush: Instant,
}

fn record_of(entry: &BlockIndexEntry) -> IndexEntryRecord {
    IndexEntryRecord {
        header: entry.header.clone(),
        height: entry.height,
        validity: entry.validity as u8,
        flags: entry.flags.bits(),
        data_location: entry.data_location,
        undo_location: entry.undo_location,
    }
}

impl ChainState {
    /// Opens or bootstraps the chain state over the given database and
    /// block-file directory. Replays any blocks that were stored but not
    /// yet reflected in the flushed UTXO set.
    pub fn new(config: Arc<Config>, db: Arc<DB>, blocks_dir: PathBuf, policies: ChainPolicies) -> ConsensusResult<Self> {
        let index_store = BlockIndexStore::new(db.clone(), CachePolicy::Count(INDEX_STORE_CACHE_SIZE));
        let utxo_store = UtxoSetStore::new(db.clone(), CachePolicy::Count(config.utxo_cache_soft_limit));
        let files = BlockFileStore::new(db.clone(), blocks_dir, config.block_file_max_size)?;

        let mut index = BlockIndex::new();
        let mut records = index_store.load_all()?;
        records.sort_by_key(|record| record.height);
        for record in records {
            let parent = if record.height == 0 { None } else { index.get(&record.header.parent) };
            if record.height > 0 && parent.is_none() {
                warn!("dropping orphaned index record {}", record.header.hash);
                continue;
            }
            let id = index.insert(record.header.clone(), parent);
            let entry = &mut index[id];
            entry.validity = record.validity_stage();
            entry.flags = record.status_flags();
            entry.data_location = record.data_location;
            entry.undo_location = record.undo_location;
        }

        let mut state = if index.is_empty() {
            let genesis_block = config.genesis_block();
            let genesis_hash = genesis_block.hash();
            info!("bootstrapping {} at genesis {}", config.network_name, genesis_hash);
            let genesis_id = index.insert(genesis_block.header.clone(), None);
            let mut files = files;
            let location = files.write_block(&genesis_block)?;
            {
                let entry = &mut index[genesis_id];
                entry.validity = ValidityStage::Scripts;
                entry.flags |= StatusFlags::HAVE_DATA;
                entry.data_location = Some(location);
            }
            let chain = ActiveChain::new(genesis_id);
            let view = CachedUtxoView::new(utxo_store, genesis_hash);
            let mut state = Self {
                config,
                db,
                index,
                chain,
                view,
                index_store,
                files,
                policies,
                script_cache: Cache::new(CachePolicy::Count(SCRIPT_CACHE_SIZE)),
                candidates: BTreeSet::new(),
                dirty: HashSet::from([genesis_id]),
                precious_counter: 0,
                last_flush: Instant::now(),
            };
            state.add_candidate(genesis_id);
            state.flush()?;
            state
        } else {
            let best = utxo_store
                .best_block()?
                .ok_or_else(|| StoreError::DataInconsistency("index exists without a UTXO best block".into()))?;
            // The tip marker commits in the same batch as the coin diff,
            // so a disagreement means the store was tampered with or torn
            if let Some(recorded) = index_store.tip()? {
                if recorded != best {
                    return Err(StoreError::DataInconsistency(format!(
                        "recorded tip {} disagrees with the flushed UTXO best block {}",
                        recorded, best
                    ))
                    .into());
                }
            }
            let best_id = index
                .get(&best)
                .ok_or_else(|| StoreError::DataInconsistency(format!("UTXO best block {} is not indexed", best)))?;
            let mut entries = Vec::new();
            let mut cursor = Some(best_id);
            while let Some(id) = cursor {
                entries.push(id);
                cursor = index[id].parent;
            }
            entries.reverse();
            let chain = ActiveChain::from_entries(entries);
            let view = CachedUtxoView::new(utxo_store, best);
            let mut state = Self {
                config,
                db,
                index,
                chain,
                view,
                index_store,
                files,
                policies,
                script_cache: Cache::new(CachePolicy::Count(SCRIPT_CACHE_SIZE)),
                candidates: BTreeSet::new(),
                dirty: HashSet::new(),
                precious_counter: 0,
                last_flush: Instant::now(),
            };
            for id in state.index.iter_ids() {
                let entry = &state.index[id];
                if entry.has_data() && !entry.flags.is_invalid() {
                    state.add_candidate(id);
                }
            }
            // Catch up on blocks stored ahead of the flushed UTXO state
            let mut update = ChainUpdate::new(BlockOutcome::AlreadyKnown);
            state.activate_best_chain(&mut update)?;
            if !update.events.is_empty() {
                info!("replayed {} chain steps recorded ahead of the UTXO flush point", update.events.len());
                state.flush()?;
            }
            state
        };

        info!(
            "chain state ready: tip {} at height {}, {} indexed blocks",
            state.tip_hash(),
            state.chain.tip_height(),
            state.index.len()
        );
        state.dirty.clear();
        Ok(state)
    }

    pub fn params(&self) -> &Params {
        &self.config.params
    }

    pub fn tip_hash(&self) -> Hash {
        self.index[self.chain.tip()].hash
    }

    pub fn tip_height(&self) -> u64 {
        self.chain.tip_height()
    }

    /// Median-time-past of the current tip
    pub fn median_time_past(&self) -> u64 {
        self.index.median_time_past(self.chain.tip(), self.config.median_time_window)
    }

    /// Median-time-past of the block preceding `height` on the active chain
    pub fn median_time_at(&self, height: u64) -> u64 {
        let preceding = height.saturating_sub(1).min(self.chain.tip_height());
        match self.chain.at_height(preceding) {
            Some(id) => self.index.median_time_past(id, self.config.median_time_window),
            None => self.median_time_past(),
        }
    }

    pub fn utxo_view(&self) -> &CachedUtxoView {
        &self.view
    }

    /// The script engine blocks are validated with; transaction admission
    /// must apply the same one
    pub fn script_engine(&self) -> &dyn ScriptEngine {
        self.policies.scripts.as_ref()
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.index.get(hash).map(|id| self.index[id].has_data()).unwrap_or(false)
    }

    pub fn is_on_active_chain(&self, hash: &Hash) -> bool {
        self.index.get(hash).map(|id| self.chain.contains(&self.index, id)).unwrap_or(false)
    }

    pub fn hash_at_height(&self, height: u64) -> Option<Hash> {
        self.chain.at_height(height).map(|id| self.index[id].hash)
    }

    pub fn block_locator(&self) -> Vec<Hash> {
        self.chain.locator(&self.index)
    }

    /// Reads a block body back from the flat files, if indexed and not pruned
    pub fn block_by_hash(&self, hash: &Hash) -> ConsensusResult<Option<Block>> {
        match self.index.get(hash).and_then(|id| self.index[id].data_location) {
            Some(location) => Ok(Some(self.files.read_block(location)?)),
            None => Ok(None),
        }
    }

    /// Accepts a new block into the index and activates the best known
    /// chain. `now` is the caller's adjusted wall-clock time.
    pub fn process_new_block(&mut self, block: &Block, now: u64) -> ConsensusResult<ChainUpdate> {
        let hash = block.hash();
        if let Some(id) = self.index.get(&hash) {
            let entry = &self.index[id];
            if entry.flags.is_invalid() {
                return Err(ConsensusError::KnownInvalid(hash));
            }
            if entry.has_data() {
                debug!("block {} resubmitted, already processed", hash);
                return Ok(ChainUpdate::new(BlockOutcome::AlreadyKnown));
            }
        }

        let parent_id =
            self.index.get(&block.header.parent).ok_or(ConsensusError::MissingParent(block.header.parent))?;
        if self.index[parent_id].flags.is_invalid() {
            let id = self.index.insert(block.header.clone(), Some(parent_id));
            self.index[id].flags |= StatusFlags::FAILED_CHILD;
            self.dirty.insert(id);
            return Err(RuleError::KnownInvalidParent(block.header.parent).into());
        }

        // Reject forks whose reconnection point is beyond the rollback horizon
        if let Some(fork) = self.index.last_common_ancestor(parent_id, self.chain.tip()) {
            let fork_depth = self.chain.tip_height().saturating_sub(self.index[fork].height);
            if fork_depth > self.config.max_reorg_depth {
                return Err(RuleError::ForkTooDeep(self.index[fork].height, self.config.max_reorg_depth).into());
            }
        }

        let id = self.index.insert(block.header.clone(), Some(parent_id));
        if let Err(err) = check_block_structure(block, &self.config.params, now) {
            self.mark_failed(id);
            return Err(err.into());
        }
        self.index[id].validity = ValidityStage::Transactions;

        if let Err(err) = check_block_contextual(block, &self.index, parent_id, &self.config.params, self.policies.difficulty.as_ref())
        {
            self.mark_failed(id);
            return Err(err.into());
        }
        self.index[id].validity = ValidityStage::Chain;

        let location = self.files.write_block(block)?;
        {
            let entry = &mut self.index[id];
            entry.data_location = Some(location);
            entry.flags |= StatusFlags::HAVE_DATA;
        }
        self.dirty.insert(id);
        self.add_candidate(id);

        let previous_tip = self.chain.tip();
        let mut update = ChainUpdate::new(BlockOutcome::SideChain);
        self.activate_best_chain(&mut update)?;
        if self.chain.tip() != previous_tip {
            update.outcome = BlockOutcome::NewTip;
            update.events.push(ConsensusEvent::ChainTipChanged {
                old_tip: self.index[previous_tip].hash,
                new_tip: self.tip_hash(),
                new_height: self.chain.tip_height(),
            });
        } else {
            debug!("block {} stored on a side chain at height {}", hash, self.index[id].height);
        }

        if self.view.cached_entries() >= self.config.utxo_cache_soft_limit
            || self.last_flush.elapsed() >= Duration::from_secs(self.config.flush_interval_seconds)
        {
            self.flush()?;
        }
        Ok(update)
    }

    /// Re-runs chain selection against the current candidate set; a no-op
    /// unless candidates changed since the last activation
    pub fn activate_best(&mut self) -> ConsensusResult<ChainUpdate> {
        let previous_tip = self.chain.tip();
        let mut update = ChainUpdate::new(BlockOutcome::SideChain);
        self.activate_best_chain(&mut update)?;
        if self.chain.tip() != previous_tip {
            update.outcome = BlockOutcome::NewTip;
            update.events.push(ConsensusEvent::ChainTipChanged {
                old_tip: self.index[previous_tip].hash,
                new_tip: self.tip_hash(),
                new_height: self.chain.tip_height(),
            });
        }
        Ok(update)
    }

    /// Repeatedly switches the active chain to the best valid candidate
    /// until no candidate beats the tip.
    fn activate_best_chain(&mut self, update: &mut ChainUpdate) -> ConsensusResult<()> {
        loop {
            let Some(best) = self.best_candidate() else { break };
            let tip = self.chain.tip();
            if best == tip || self.candidate_key(best) <= self.candidate_key(tip) {
                break;
            }
            let fork = match self.index.last_common_ancestor(best, tip) {
                Some(fork) => fork,
                None => break,
            };
            let fork_depth = self.chain.tip_height().saturating_sub(self.index[fork].height);
            if fork_depth > self.config.max_reorg_depth {
                warn!("candidate {} forks deeper than the rollback horizon, ignoring", self.index[best].hash);
                self.remove_candidate(best);
                continue;
            }

            while self.chain.tip() != fork {
                self.disconnect_tip(update)?;
            }

            let mut path = Vec::new();
            let mut cursor = best;
            while cursor != fork {
                path.push(cursor);
                cursor = self.index[cursor]
                    .parent
                    .ok_or_else(|| StoreError::DataInconsistency("candidate not rooted at the fork point".into()))?;
            }
            path.reverse();

            let mut failed = false;
            for id in path {
                match self.connect_entry(id, true) {
                    Ok(block) => {
                        let entry = &self.index[id];
                        update.events.push(ConsensusEvent::BlockConnected { hash: entry.hash, height: entry.height });
                        update.connected.push(block.transactions.clone());
                        // The view stays consistent between blocks, so a
                        // pressured flush mid-reorg is safe
                        if self.view.cached_entries() >= self.config.utxo_cache_hard_limit {
                            self.flush()?;
                        }
                    }
                    Err(ConsensusError::Rule(rule)) => {
                        warn!("block {} failed connection: {}", self.index[id].hash, rule);
                        self.mark_failed(id);
                        self.remove_candidate(best);
                        self.reset_to_flush_point()?;
                        failed = true;
                        break;
                    }
                    Err(ConsensusError::MissingData(hash)) => {
                        warn!("candidate chain through {} has pruned or missing data", hash);
                        self.remove_candidate(best);
                        self.reset_to_flush_point()?;
                        failed = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !failed && self.chain.tip() == tip {
                break;
            }
        }
        Ok(())
    }

    /// Connects the block of an indexed entry on top of the current tip.
    /// `record_undo` is unset when replaying already-proven blocks.
    fn connect_entry(&mut self, id: EntryId, record_undo: bool) -> ConsensusResult<Block> {
        let (hash, height, parent, data_location) = {
            let entry = &self.index[id];
            let location = entry.data_location.ok_or(ConsensusError::MissingData(entry.hash))?;
            let parent = entry.parent.ok_or(ConsensusError::MissingData(entry.hash))?;
            (entry.hash, entry.height, parent, location)
        };
        let block = self.files.read_block(data_location)?;
        debug_assert_eq!(self.view.best_block(), block.header.parent, "view out of sync with the connecting block");
        if self.config.paranoid_connect_checks {
            // The timestamp was checked against wall clock at admission
            check_block_structure(&block, &self.config.params, block.header.timestamp)?;
        }

        let undo = {
            let index = &self.index;
            let window = self.config.median_time_window;
            let parent_mtp = index.median_time_past(parent, window);
            let median_time_at = move |h: u64| {
                if h == 0 {
                    return index[index.ancestor(parent, 0).unwrap_or(parent)].header.timestamp;
                }
                index.ancestor(parent, h - 1).map(|a| index.median_time_past(a, window)).unwrap_or(parent_mtp)
            };
            let time_at = move |h: u64| index.ancestor(parent, h).map(|a| index[a].header.timestamp).unwrap_or(0);
            let ctx = ConnectContext {
                params: &self.config.params,
                height,
                parent_mtp,
                median_time_at: &median_time_at,
                time_at: &time_at,
                script_flags: 0,
            };
            connect_block(
                &block,
                &mut self.view,
                &ctx,
                self.policies.kernel.as_ref(),
                self.policies.scripts.as_ref(),
                &self.script_cache,
            )?
        };

        if record_undo {
            let undo_location = self.files.write_undo(data_location.file, &undo)?;
            let entry = &mut self.index[id];
            entry.undo_location = Some(undo_location);
            entry.flags |= StatusFlags::HAVE_UNDO;
        }
        self.index[id].validity = ValidityStage::Scripts;
        self.dirty.insert(id);
        self.chain.push(&self.index, id);
        self.view.set_best_block(hash);
        Ok(block)
    }

    /// Disconnects the current tip, collecting its re-admissible
    /// transactions into `update`. An unclean undo is logged and tolerated
    /// here; `verify_chain` inspects the returned outcome and fails instead.
    fn disconnect_tip(&mut self, update: &mut ChainUpdate) -> ConsensusResult<DisconnectOutcome> {
        let tip = self.chain.tip();
        let (hash, height, data_location, undo_location) = {
            let entry = &self.index[tip];
            (
                entry.hash,
                entry.height,
                entry.data_location.ok_or(ConsensusError::MissingData(entry.hash))?,
                entry.undo_location.ok_or(ConsensusError::MissingData(entry.hash))?,
            )
        };
        let block = self.files.read_block(data_location)?;
        let undo = self.files.read_undo(undo_location)?;
        let outcome = disconnect_block(&block, &undo, &mut self.view)?;
        if outcome != DisconnectOutcome::Clean {
            warn!("disconnect of block {} did not restore the prior view exactly", hash);
        }
        self.chain
            .pop()
            .ok_or_else(|| StoreError::DataInconsistency("disconnect walked below genesis".into()))?;
        self.view.set_best_block(self.tip_hash());
        update.events.push(ConsensusEvent::BlockDisconnected { hash, height });
        let reward_count = if block.is_proof_of_stake() { 2 } else { 1 };
        update.disconnected.splice(0..0, block.transactions.iter().skip(reward_count).cloned());
        Ok(outcome)
    }

    /// Reverts the overlay to the last flushed state and realigns the
    /// active chain with it, so activation can restart from solid ground
    fn reset_to_flush_point(&mut self) -> ConsensusResult<()> {
        self.view.discard()?;
        let best = self.view.best_block();
        let id = self
            .index
            .get(&best)
            .ok_or_else(|| StoreError::DataInconsistency(format!("flushed best block {} is not indexed", best)))?;
        let mut entries = Vec::new();
        let mut cursor = Some(id);
        while let Some(entry_id) = cursor {
            entries.push(entry_id);
            cursor = self.index[entry_id].parent;
        }
        entries.reverse();
        self.chain = ActiveChain::from_entries(entries);
        Ok(())
    }

    fn candidate_key(&self, id: EntryId) -> CandidateKey {
        let entry = &self.index[id];
        CandidateKey { work: entry.work, sequence: Reverse(entry.sequence_id), id }
    }

    fn add_candidate(&mut self, id: EntryId) {
        let key = self.candidate_key(id);
        self.candidates.insert(key);
    }

    fn remove_candidate(&mut self, id: EntryId) {
        let key = self.candidate_key(id);
        self.candidates.remove(&key);
    }

    /// The highest-keyed candidate that is still connectable, dropping
    /// stale keys along the way
    fn best_candidate(&mut self) -> Option<EntryId> {
        let mut stale = Vec::new();
        let mut found = None;
        for key in self.candidates.iter().rev() {
            let entry = &self.index[key.id];
            if entry.flags.is_invalid() || !entry.has_data() || entry.work != key.work || entry.sequence_id != key.sequence.0 {
                stale.push(*key);
                continue;
            }
            found = Some(key.id);
            break;
        }
        for key in stale {
            self.candidates.remove(&key);
        }
        found
    }

    fn mark_failed(&mut self, id: EntryId) {
        self.index[id].flags |= StatusFlags::FAILED;
        self.index.mark_descendants_failed(id);
        self.mark_invalid_dirty();
    }

    /// Failure flags may have changed anywhere downstream; re-persist every
    /// currently-invalid entry
    fn mark_invalid_dirty(&mut self) {
        for id in self.index.iter_ids() {
            if self.index[id].flags.is_invalid() {
                self.dirty.insert(id);
            }
        }
    }

    /// Writes file metadata, dirty index entries, the recorded tip and the
    /// UTXO diff in a single atomic batch
    pub fn flush(&mut self) -> ConsensusResult<()> {
        let mut batch = WriteBatch::default();
        self.files.flush_metadata(BatchDbWriter::new(&mut batch))?;
        let dirty: Vec<EntryId> = self.dirty.drain().collect();
        for id in dirty {
            let record = record_of(&self.index[id]);
            self.index_store.write(BatchDbWriter::new(&mut batch), &record)?;
        }
        let tip_hash = self.tip_hash();
        self.index_store.set_tip(BatchDbWriter::new(&mut batch), tip_hash)?;
        self.view.flush(BatchDbWriter::new(&mut batch))?;
        self.db.write(batch).map_err(StoreError::from)?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Deletes block files fully below the retention window. Returns the
    /// number of files removed.
    pub fn prune(&mut self) -> ConsensusResult<u32> {
        if !self.config.prune_enabled {
            return Ok(0);
        }
        let cutoff = self.chain.tip_height().saturating_sub(self.config.min_retained_depth);
        let mut keep_file = self.files.current_file();
        for id in self.index.iter_ids() {
            let entry = &self.index[id];
            if entry.height >= cutoff {
                if let Some(location) = entry.data_location {
                    keep_file = keep_file.min(location.file);
                }
            }
        }
        let deleted = self.files.prune_below(keep_file)?;
        if deleted > 0 {
            for id in self.index.iter_ids() {
                let entry = &mut self.index[id];
                if entry.data_location.map(|location| location.file < keep_file).unwrap_or(false) {
                    entry.data_location = None;
                    entry.undo_location = None;
                    entry.flags &= !(StatusFlags::HAVE_DATA | StatusFlags::HAVE_UNDO);
                    self.dirty.insert(id);
                }
            }
            self.flush()?;
        }
        Ok(deleted)
    }

    /// Marks a block invalid by operator decree and moves the active chain
    /// off it if necessary
    pub fn invalidate_block(&mut self, hash: Hash) -> ConsensusResult<ChainUpdate> {
        let id = self.index.get(&hash).ok_or(ConsensusError::MissingData(hash))?;
        if self.index[id].height == 0 {
            return Err(StoreError::DataInconsistency("refusing to invalidate genesis".into()).into());
        }
        let previous_tip = self.chain.tip();
        let mut update = ChainUpdate::new(BlockOutcome::SideChain);
        while self.chain.contains(&self.index, id) {
            self.disconnect_tip(&mut update)?;
        }
        self.mark_failed(id);
        self.activate_best_chain(&mut update)?;
        if self.chain.tip() != previous_tip {
            update.outcome = BlockOutcome::NewTip;
            update.events.push(ConsensusEvent::ChainTipChanged {
                old_tip: self.index[previous_tip].hash,
                new_tip: self.tip_hash(),
                new_height: self.chain.tip_height(),
            });
        }
        self.flush()?;
        Ok(update)
    }

    /// Clears failure marks from a block and its relatives so its chain
    /// competes for activation again
    pub fn reconsider_block(&mut self, hash: Hash) -> ConsensusResult<ChainUpdate> {
        let id = self.index.get(&hash).ok_or(ConsensusError::MissingData(hash))?;
        self.index.clear_failure_flags(id);
        for entry_id in self.index.iter_ids() {
            self.dirty.insert(entry_id);
        }
        let previous_tip = self.chain.tip();
        let mut update = ChainUpdate::new(BlockOutcome::SideChain);
        for entry_id in self.index.iter_ids() {
            let entry = &self.index[entry_id];
            if entry.has_data() && !entry.flags.is_invalid() {
                self.add_candidate(entry_id);
            }
        }
        self.activate_best_chain(&mut update)?;
        if self.chain.tip() != previous_tip {
            update.outcome = BlockOutcome::NewTip;
            update.events.push(ConsensusEvent::ChainTipChanged {
                old_tip: self.index[previous_tip].hash,
                new_tip: self.tip_hash(),
                new_height: self.chain.tip_height(),
            });
        }
        self.flush()?;
        Ok(update)
    }

    /// Treats a block as if it arrived first among equal-work competitors
    pub fn precious_block(&mut self, hash: Hash) -> ConsensusResult<ChainUpdate> {
        let id = self.index.get(&hash).ok_or(ConsensusError::MissingData(hash))?;
        self.remove_candidate(id);
        self.precious_counter -= 1;
        self.index[id].sequence_id = self.precious_counter;
        self.add_candidate(id);
        let previous_tip = self.chain.tip();
        let mut update = ChainUpdate::new(BlockOutcome::SideChain);
        self.activate_best_chain(&mut update)?;
        if self.chain.tip() != previous_tip {
            update.outcome = BlockOutcome::NewTip;
            update.events.push(ConsensusEvent::ChainTipChanged {
                old_tip: self.index[previous_tip].hash,
                new_tip: self.tip_hash(),
                new_height: self.chain.tip_height(),
            });
        }
        Ok(update)
    }

    /// Rolls the view back `depth` blocks and replays them forward,
    /// verifying undo data and full reconnection. Returns the number of
    /// blocks verified.
    pub fn verify_chain(&mut self, depth: u64) -> ConsensusResult<u64> {
        let target = depth.min(self.chain.tip_height());
        let mut scratch = ChainUpdate::new(BlockOutcome::AlreadyKnown);
        let mut stack = Vec::new();
        for _ in 0..target {
            let tip = self.chain.tip();
            let hash = self.index[tip].hash;
            // Unclean undo data is tolerated during normal reorgs but is a
            // hard failure under deep verification
            if self.disconnect_tip(&mut scratch)? != DisconnectOutcome::Clean {
                return Err(ConsensusError::UncleanDisconnect(hash));
            }
            stack.push(tip);
        }
        while let Some(id) = stack.pop() {
            self.connect_entry(id, false)?;
        }
        info!("verified the last {} blocks of the active chain", target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::config::SIMNET_PARAMS;
    use cinder_consensus_core::header::Header;
    use cinder_consensus_core::testutils::{build_block, solve_pow};
    use cinder_database::utils::create_temp_db;

    fn setup_with(config: Config) -> (tempfile::TempDir, tempfile::TempDir, Arc<DB>, ChainState) {
        let (db_lifetime, db) = create_temp_db();
        let blocks_dir = tempfile::tempdir().unwrap();
        let state = ChainState::new(
            Arc::new(config),
            db.clone(),
            blocks_dir.path().to_path_buf(),
            ChainPolicies::permissive(&SIMNET_PARAMS),
        )
        .unwrap();
        (db_lifetime, blocks_dir, db, state)
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, Arc<DB>, ChainState) {
        setup_with(Config::new(SIMNET_PARAMS))
    }

    fn extend(state: &mut ChainState, parent: &Header, parent_height: u64, nonce: u64) -> (Header, ChainUpdate) {
        let block =
            build_block(parent, parent_height, SIMNET_PARAMS.block_subsidy(parent_height + 1), vec![], nonce);
        let update = state.process_new_block(&block, block.header.timestamp).unwrap();
        (block.header, update)
    }

    #[test]
    fn bootstrap_starts_at_genesis() {
        let (_db_dir, _blocks, _db, state) = setup();
        assert_eq!(state.tip_hash(), SIMNET_PARAMS.genesis_hash());
        assert_eq!(state.tip_height(), 0);
        assert!(state.contains_block(&SIMNET_PARAMS.genesis_hash()));
    }

    #[test]
    fn extends_the_tip_and_ignores_duplicates() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let block = build_block(&genesis, 0, SIMNET_PARAMS.block_subsidy(1), vec![], 1);

        let update = state.process_new_block(&block, block.header.timestamp).unwrap();
        assert_eq!(update.outcome, BlockOutcome::NewTip);
        assert_eq!(state.tip_height(), 1);
        assert_eq!(state.tip_hash(), block.hash());

        let repeat = state.process_new_block(&block, block.header.timestamp).unwrap();
        assert_eq!(repeat.outcome, BlockOutcome::AlreadyKnown);
        assert!(repeat.events.is_empty());
        assert_eq!(state.tip_height(), 1);
    }

    #[test]
    fn unknown_parents_are_reported() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let orphan_parent = Header::new(1, Hash::from(404u64), Hash::ZERO, 1_704_067_260, 0x207fffff, 0);
        let block = build_block(&orphan_parent, 5, SIMNET_PARAMS.block_subsidy(6), vec![], 1);
        let err = state.process_new_block(&block, block.header.timestamp);
        assert!(matches!(err, Err(ConsensusError::MissingParent(parent)) if parent == orphan_parent.hash));
    }

    #[test]
    fn equal_work_ties_stay_with_the_first_seen_block() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let (a1, update_a) = extend(&mut state, &genesis, 0, 1);
        assert_eq!(update_a.outcome, BlockOutcome::NewTip);

        // Same height, same work, later arrival: must not displace a1.
        // Claiming one unit less keeps the coinbase (and the hash) distinct.
        let b1 = build_block(&genesis, 0, SIMNET_PARAMS.block_subsidy(1) - 1, vec![], 2);
        let update_b = state.process_new_block(&b1, b1.header.timestamp).unwrap();
        assert_eq!(update_b.outcome, BlockOutcome::SideChain);
        assert_eq!(state.tip_hash(), a1.hash);

        // Extending the side chain gives it more work and forces a reorg
        let b2 = build_block(&b1.header, 1, SIMNET_PARAMS.block_subsidy(2), vec![], 3);
        let update = state.process_new_block(&b2, b2.header.timestamp).unwrap();
        assert_eq!(update.outcome, BlockOutcome::NewTip);
        assert_eq!(state.tip_hash(), b2.hash());
        assert_eq!(state.tip_height(), 2);

        let disconnects = update
            .events
            .iter()
            .filter(|event| matches!(event, ConsensusEvent::BlockDisconnected { hash, .. } if *hash == a1.hash))
            .count();
        let connects = update
            .events
            .iter()
            .filter(|event| matches!(event, ConsensusEvent::BlockConnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(connects, 2);
    }

    #[test]
    fn structurally_invalid_blocks_poison_their_descendants() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let mut bad = build_block(&genesis, 0, SIMNET_PARAMS.block_subsidy(1), vec![], 1);
        bad.header.merkle_root = Hash::from(666u64);
        solve_pow(&mut bad.header);
        let err = state.process_new_block(&bad, bad.header.timestamp);
        assert!(matches!(err, Err(ConsensusError::Rule(RuleError::BadMerkleRoot(_, _)))));

        let child = build_block(&bad.header, 1, SIMNET_PARAMS.block_subsidy(2), vec![], 2);
        let err = state.process_new_block(&child, child.header.timestamp);
        assert!(matches!(err, Err(ConsensusError::Rule(RuleError::KnownInvalidParent(_)))));

        let again = state.process_new_block(&bad, bad.header.timestamp);
        assert!(matches!(again, Err(ConsensusError::KnownInvalid(_))));
    }

    #[test]
    fn restart_recovers_the_flushed_tip() {
        let (_db_dir, blocks_dir, db, mut state) = setup();
        let mut parent = SIMNET_PARAMS.genesis_block().header;
        for height in 0..5 {
            parent = extend(&mut state, &parent, height, height + 1).0;
        }
        state.flush().unwrap();
        let tip = state.tip_hash();
        drop(state);

        let reopened = ChainState::new(
            Arc::new(Config::new(SIMNET_PARAMS)),
            db,
            blocks_dir.path().to_path_buf(),
            ChainPolicies::permissive(&SIMNET_PARAMS),
        )
        .unwrap();
        assert_eq!(reopened.tip_hash(), tip);
        assert_eq!(reopened.tip_height(), 5);
    }

    #[test]
    fn restart_rejects_a_mismatched_tip_marker() {
        use cinder_database::prelude::DirectDbWriter;

        let (_db_dir, blocks_dir, db, mut state) = setup();
        let mut parent = SIMNET_PARAMS.genesis_block().header;
        for height in 0..3 {
            parent = extend(&mut state, &parent, height, height + 1).0;
        }
        state.flush().unwrap();
        drop(state);

        // Point the tip marker at a block the flushed UTXO set never saw
        let mut tampered = BlockIndexStore::new(db.clone(), CachePolicy::Empty);
        tampered.set_tip(DirectDbWriter::new(&db), 0xbad.into()).unwrap();

        let reopened = ChainState::new(
            Arc::new(Config::new(SIMNET_PARAMS)),
            db,
            blocks_dir.path().to_path_buf(),
            ChainPolicies::permissive(&SIMNET_PARAMS),
        );
        assert!(matches!(reopened, Err(ConsensusError::Store(StoreError::DataInconsistency(_)))));
    }

    #[test]
    fn forks_beyond_the_rollback_horizon_are_rejected() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let mut parent = genesis.clone();
        for height in 0..SIMNET_PARAMS.max_reorg_depth + 2 {
            parent = extend(&mut state, &parent, height, height + 1).0;
        }

        let deep_fork = build_block(&genesis, 0, SIMNET_PARAMS.block_subsidy(1) - 1, vec![], 999);
        let err = state.process_new_block(&deep_fork, deep_fork.header.timestamp);
        assert!(matches!(err, Err(ConsensusError::Rule(RuleError::ForkTooDeep(0, _)))));
    }

    #[test]
    fn invalidate_and_reconsider_move_the_tip() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let (h1, _) = extend(&mut state, &genesis, 0, 1);
        let (h2, _) = extend(&mut state, &h1, 1, 2);

        let update = state.invalidate_block(h2.hash).unwrap();
        assert_eq!(update.outcome, BlockOutcome::NewTip);
        assert_eq!(state.tip_hash(), h1.hash);

        let update = state.reconsider_block(h2.hash).unwrap();
        assert_eq!(update.outcome, BlockOutcome::NewTip);
        assert_eq!(state.tip_hash(), h2.hash);
    }

    #[test]
    fn precious_switches_between_equal_work_tips() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let genesis = SIMNET_PARAMS.genesis_block().header;
        let (a1, _) = extend(&mut state, &genesis, 0, 1);
        let b1 = build_block(&genesis, 0, SIMNET_PARAMS.block_subsidy(1) - 1, vec![], 2);
        state.process_new_block(&b1, b1.header.timestamp).unwrap();
        assert_eq!(state.tip_hash(), a1.hash);

        let update = state.precious_block(b1.hash()).unwrap();
        assert_eq!(update.outcome, BlockOutcome::NewTip);
        assert_eq!(state.tip_hash(), b1.hash());
    }

    #[test]
    fn pruning_never_touches_the_retention_window() {
        let config = Config::builder(SIMNET_PARAMS).enable_pruning().block_file_max_size(512).build();
        let (_db_dir, _blocks, _db, mut state) = setup_with(config);
        let mut parent = SIMNET_PARAMS.genesis_block().header;
        let mut hashes = vec![parent.hash];
        for height in 0..24 {
            parent = extend(&mut state, &parent, height, height + 1).0;
            hashes.push(parent.hash);
        }
        state.flush().unwrap();

        let deleted = state.prune().unwrap();
        assert!(deleted > 0);

        // Everything within the retention depth of the tip stays readable
        let cutoff = state.tip_height() - SIMNET_PARAMS.min_retained_depth;
        for height in cutoff..=state.tip_height() {
            let hash = state.hash_at_height(height).unwrap();
            assert!(state.block_by_hash(&hash).unwrap().is_some(), "height {} was pruned", height);
        }
        // The genesis file is gone
        assert!(state.block_by_hash(&hashes[0]).unwrap().is_none());
    }

    #[test]
    fn verify_chain_replays_without_moving_the_tip() {
        let (_db_dir, _blocks, _db, mut state) = setup();
        let mut parent = SIMNET_PARAMS.genesis_block().header;
        for height in 0..6 {
            parent = extend(&mut state, &parent, height, height + 1).0;
        }
        let tip = state.tip_hash();
        assert_eq!(state.verify_chain(4).unwrap(), 4);
        assert_eq!(state.tip_hash(), tip);
        assert_eq!(state.tip_height(), 6);
    }
}
