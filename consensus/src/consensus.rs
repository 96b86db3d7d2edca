//! The consensus service: a thread-safe facade tying the chain state
//! machine, the transaction pool and event fan-out together.
//!
//! Lock discipline: the chain lock is always taken before the mempool
//! lock, and events are published only after every lock has been
//! released. Chain mutations downgrade to a read lock for mempool
//! reconciliation so concurrent readers resume as early as possible.

use crate::constants::StorePrefix;
use crate::errors::{BlockOutcome, ConsensusResult};
use crate::notify::ConsensusNotifier;
use crate::pipeline::{ChainPolicies, ChainState, ChainUpdate};
use cinder_consensus_core::block::Block;
use cinder_consensus_core::config::Config;
use cinder_consensus_core::events::ConsensusEvent;
use cinder_consensus_core::tx::{Transaction, TransactionId};
use cinder_consensus_core::Hash;
use cinder_database::prelude::{CachedDbItem, DirectDbWriter, StoreError, DB};
use cinder_mempool::errors::RuleResult;
use cinder_mempool::{ChainContext, Mempool, MempoolConfig, MempoolSnapshot, TransactionAcceptance};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default()
}

/// Chain facts frozen for the duration of one admission pass
struct ChainFacts<'a> {
    chain: &'a ChainState,
    now: u64,
}

impl ChainContext for ChainFacts<'_> {
    fn tip_height(&self) -> u64 {
        self.chain.tip_height()
    }

    fn median_time_past(&self) -> u64 {
        self.chain.median_time_past()
    }

    fn median_time_at(&self, height: u64) -> u64 {
        self.chain.median_time_at(height)
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn coinbase_maturity(&self) -> u64 {
        self.chain.params().coinbase_maturity
    }
}

/// Reconciles the pool with the chain transition described by `update`:
/// confirmed transactions leave, double-spends are purged, transactions of
/// disconnected blocks are re-offered oldest first, and expiry plus the
/// size cap are re-applied. Evictions are appended to the update's events.
fn reconcile_mempool(chain: &ChainState, mempool: &mut Mempool, update: &mut ChainUpdate, now: u64) {
    let mut evicted = Vec::new();
    for transactions in update.connected.iter() {
        let block_update = mempool.handle_connected_block(transactions);
        evicted.extend(block_update.conflicted);
    }
    let ctx = ChainFacts { chain, now };
    for tx in std::mem::take(&mut update.disconnected) {
        let id = tx.id();
        if let Err(err) =
            mempool.validate_and_insert_transaction(chain.utxo_view(), &ctx, chain.script_engine(), tx)
        {
            debug!("dropping disconnected transaction {}: {}", id, err);
            evicted.extend(mempool.purge_with_descendants(&id));
        }
    }
    evicted.extend(mempool.expire_and_limit(now));
    if !evicted.is_empty() {
        update.events.push(ConsensusEvent::TransactionsEvicted { ids: Arc::new(evicted) });
    }
}

/// The top-level consensus handle shared across the node. All methods are
/// `&self`; interior locking serializes mutation.
pub struct Consensus {
    config: Arc<Config>,
    db: Arc<DB>,
    chain: RwLock<ChainState>,
    mempool: Mutex<Mempool>,
    pool_image: Mutex<CachedDbItem<Vec<u8>>>,
    notifier: ConsensusNotifier,
}

impl Consensus {
    /// Opens the consensus service over the given database and block-file
    /// directory, restoring any previously saved mempool image.
    pub fn new(
        config: Config,
        db: Arc<DB>,
        blocks_dir: PathBuf,
        policies: ChainPolicies,
        mempool_config: MempoolConfig,
    ) -> ConsensusResult<Self> {
        let config = Arc::new(config);
        let chain = ChainState::new(config.clone(), db.clone(), blocks_dir, policies)?;
        let consensus = Self {
            config,
            pool_image: Mutex::new(CachedDbItem::new(db.clone(), StorePrefix::MempoolImage.into())),
            db,
            chain: RwLock::new(chain),
            mempool: Mutex::new(Mempool::new(mempool_config)),
            notifier: ConsensusNotifier::new(),
        };
        consensus.load_pool_image();
        Ok(consensus)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> Receiver<ConsensusEvent> {
        self.notifier.subscribe()
    }

    /// Runs a chain mutation, reconciles the pool against whatever it
    /// changed and publishes the resulting events lock-free
    fn run_chain_op(
        &self,
        op: impl FnOnce(&mut ChainState) -> ConsensusResult<ChainUpdate>,
    ) -> ConsensusResult<BlockOutcome> {
        let now = unix_now();
        let (outcome, events) = {
            let mut chain = self.chain.write();
            let mut update = op(&mut chain)?;
            let chain = RwLockWriteGuard::downgrade(chain);
            let mut mempool = self.mempool.lock();
            reconcile_mempool(&chain, &mut mempool, &mut update, now);
            (update.outcome, update.events)
        };
        self.notifier.notify(events);
        Ok(outcome)
    }

    /// Full block acceptance: validation, chain activation, mempool
    /// reconciliation and event publication
    pub fn process_block(&self, block: &Block) -> ConsensusResult<BlockOutcome> {
        let now = unix_now();
        self.run_chain_op(|chain| chain.process_new_block(block, now))
    }

    /// Offers a loose transaction to the pool, publishing admission and
    /// eviction events on success
    pub fn submit_transaction(&self, tx: Transaction) -> RuleResult<TransactionAcceptance> {
        let now = unix_now();
        let acceptance = {
            let chain = self.chain.read();
            let ctx = ChainFacts { chain: &chain, now };
            let mut mempool = self.mempool.lock();
            mempool.validate_and_insert_transaction(chain.utxo_view(), &ctx, chain.script_engine(), tx)?
        };
        let mut events = vec![ConsensusEvent::TransactionAdmitted { id: acceptance.id }];
        if !acceptance.evicted.is_empty() {
            events.push(ConsensusEvent::TransactionsEvicted { ids: Arc::new(acceptance.evicted.clone()) });
        }
        self.notifier.notify(events);
        Ok(acceptance)
    }

    // Chain queries

    pub fn tip_hash(&self) -> Hash {
        self.chain.read().tip_hash()
    }

    pub fn tip_height(&self) -> u64 {
        self.chain.read().tip_height()
    }

    pub fn median_time_past(&self) -> u64 {
        self.chain.read().median_time_past()
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.chain.read().contains_block(hash)
    }

    pub fn is_on_active_chain(&self, hash: &Hash) -> bool {
        self.chain.read().is_on_active_chain(hash)
    }

    pub fn hash_at_height(&self, height: u64) -> Option<Hash> {
        self.chain.read().hash_at_height(height)
    }

    pub fn block_locator(&self) -> Vec<Hash> {
        self.chain.read().block_locator()
    }

    pub fn block_by_hash(&self, hash: &Hash) -> ConsensusResult<Option<Block>> {
        self.chain.read().block_by_hash(hash)
    }

    // Pool queries

    pub fn pooled_transaction_count(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn has_pooled_transaction(&self, id: &TransactionId) -> bool {
        self.mempool.lock().has_transaction(id)
    }

    pub fn pooled_transaction(&self, id: &TransactionId) -> Option<Arc<Transaction>> {
        self.mempool.lock().get_transaction(id)
    }

    pub fn pooled_transactions(&self) -> Vec<Arc<Transaction>> {
        self.mempool.lock().all_transactions()
    }

    pub fn prioritise_transaction(&self, id: TransactionId, fee_delta: i64) {
        self.mempool.lock().prioritise_transaction(id, fee_delta);
    }

    /// Looks a transaction up in the pool first, then scans active-chain
    /// blocks down to `scan_depth` below the tip. No transaction index is
    /// kept, so the block scan is linear in the blocks visited.
    pub fn find_transaction(&self, id: &TransactionId, scan_depth: u64) -> ConsensusResult<Option<Transaction>> {
        let chain = self.chain.read();
        if let Some(tx) = self.mempool.lock().get_transaction(id) {
            return Ok(Some((*tx).clone()));
        }
        let tip = chain.tip_height();
        for height in (tip.saturating_sub(scan_depth)..=tip).rev() {
            let Some(hash) = chain.hash_at_height(height) else { continue };
            if let Some(block) = chain.block_by_hash(&hash)? {
                if let Some(tx) = block.transactions.iter().find(|tx| tx.id() == *id) {
                    return Ok(Some(tx.clone()));
                }
            }
        }
        Ok(None)
    }

    // Maintenance

    pub fn flush(&self) -> ConsensusResult<()> {
        self.chain.write().flush()
    }

    pub fn prune(&self) -> ConsensusResult<u32> {
        self.chain.write().prune()
    }

    /// Re-evaluates chain selection without offering a new block; useful
    /// after out-of-band candidate changes
    pub fn activate_best_chain(&self) -> ConsensusResult<BlockOutcome> {
        self.run_chain_op(|chain| chain.activate_best())
    }

    pub fn invalidate_block(&self, hash: Hash) -> ConsensusResult<BlockOutcome> {
        self.run_chain_op(|chain| chain.invalidate_block(hash))
    }

    pub fn reconsider_block(&self, hash: Hash) -> ConsensusResult<BlockOutcome> {
        self.run_chain_op(|chain| chain.reconsider_block(hash))
    }

    pub fn precious_block(&self, hash: Hash) -> ConsensusResult<BlockOutcome> {
        self.run_chain_op(|chain| chain.precious_block(hash))
    }

    pub fn verify_chain(&self, depth: u64) -> ConsensusResult<u64> {
        self.chain.write().verify_chain(depth)
    }

    /// Persists the current pool image for warm restarts. Typically called
    /// on shutdown, alongside a final [`Self::flush`].
    pub fn save_pool_image(&self) -> ConsensusResult<()> {
        let snapshot = self.mempool.lock().snapshot();
        let count = snapshot.len();
        let bytes =
            snapshot.serialize().map_err(|err| StoreError::DataInconsistency(err.to_string()))?;
        self.pool_image.lock().write(DirectDbWriter::new(&self.db), &bytes)?;
        info!("saved a mempool image of {} transactions", count);
        Ok(())
    }

    /// Re-admits the saved pool image through the full acceptance
    /// pipeline; records the current chain no longer accepts are shed
    fn load_pool_image(&self) {
        let bytes = match self.pool_image.lock().read() {
            Ok(bytes) => bytes,
            Err(StoreError::KeyNotFound(_)) => return,
            Err(err) => {
                warn!("failed to read the saved mempool image: {}", err);
                return;
            }
        };
        let snapshot = match MempoolSnapshot::deserialize(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("discarding an unreadable mempool image: {}", err);
                return;
            }
        };
        let chain = self.chain.read();
        let mut mempool = self.mempool.lock();
        for (id, delta) in snapshot.fee_deltas().iter() {
            mempool.prioritise_transaction(*id, *delta);
        }
        let total = snapshot.len();
        let mut restored = 0usize;
        for (tx, admission_time) in snapshot.transactions() {
            let ctx = ChainFacts { chain: &chain, now: admission_time };
            if mempool
                .validate_and_insert_transaction(chain.utxo_view(), &ctx, chain.script_engine(), tx)
                .is_ok()
            {
                restored += 1;
            }
        }
        info!("restored {} of {} transactions from the saved mempool image", restored, total);
    }
}
