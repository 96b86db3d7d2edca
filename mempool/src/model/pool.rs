use crate::config::MempoolConfig;
use crate::model::tx::{MempoolEntry, RemovalReason};
use cinder_consensus_core::coin::Coin;
use cinder_consensus_core::tx::{Transaction, TransactionId, TransactionOutpoint};
use indexmap::IndexMap;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Height marker carried by coins created inside the pool. Relative-lock
/// evaluation substitutes the next chain height for it.
pub const UNCONFIRMED_COIN_HEIGHT: u64 = u64::MAX;

/// The indexed pool structure: entries plus the parent/child dependency
/// graph and the outpoint-to-spender index. The graph is acyclic by
/// construction since a transaction can only be admitted after all of its
/// in-pool parents.
pub struct TransactionsPool {
    config: Arc<MempoolConfig>,
    all: IndexMap<TransactionId, MempoolEntry>,
    parents: HashMap<TransactionId, HashSet<TransactionId>>,
    children: HashMap<TransactionId, HashSet<TransactionId>>,
    outpoint_spenders: HashMap<TransactionOutpoint, TransactionId>,
    total_size: u64,
    next_sequence: u64,
}

impl TransactionsPool {
    pub fn new(config: Arc<MempoolConfig>) -> Self {
        Self {
            config,
            all: IndexMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            outpoint_spenders: HashMap::new(),
            total_size: 0,
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn has(&self, id: &TransactionId) -> bool {
        self.all.contains_key(id)
    }

    pub fn get(&self, id: &TransactionId) -> Option<&MempoolEntry> {
        self.all.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.all.values()
    }

    pub fn spender_of(&self, outpoint: &TransactionOutpoint) -> Option<TransactionId> {
        self.outpoint_spenders.get(outpoint).copied()
    }

    /// Resolves an outpoint against outputs created inside the pool
    pub fn overlay_coin(&self, outpoint: &TransactionOutpoint) -> Option<Coin> {
        let entry = self.all.get(&outpoint.transaction_id)?;
        let output = entry.tx.outputs.get(outpoint.index as usize)?;
        Some(Coin::new(output.clone(), UNCONFIRMED_COIN_HEIGHT, false, false))
    }

    pub fn direct_parents(&self, id: &TransactionId) -> impl Iterator<Item = TransactionId> + '_ {
        self.parents.get(id).into_iter().flatten().copied()
    }

    /// All in-pool ancestors of `id`, excluding `id` itself
    pub fn ancestors(&self, id: &TransactionId) -> HashSet<TransactionId> {
        self.walk(id, &self.parents)
    }

    /// All in-pool descendants of `id`, excluding `id` itself
    pub fn descendants(&self, id: &TransactionId) -> HashSet<TransactionId> {
        self.walk(id, &self.children)
    }

    fn walk(
        &self,
        start: &TransactionId,
        edges: &HashMap<TransactionId, HashSet<TransactionId>>,
    ) -> HashSet<TransactionId> {
        let mut visited = HashSet::new();
        let mut stack: Vec<TransactionId> = edges.get(start).into_iter().flatten().copied().collect();
        while let Some(current) = stack.pop() {
            if visited.insert(current) {
                stack.extend(edges.get(&current).into_iter().flatten().copied());
            }
        }
        visited
    }

    /// The ancestor set the given direct parents would induce, excluding
    /// the prospective transaction itself. Used for limit checks before
    /// the entry exists in the pool.
    pub fn ancestors_of_parents(&self, direct_parents: &[TransactionId]) -> HashSet<TransactionId> {
        let mut visited: HashSet<TransactionId> = direct_parents.iter().copied().collect();
        let mut stack: Vec<TransactionId> = direct_parents.to_vec();
        while let Some(current) = stack.pop() {
            for parent in self.parents.get(&current).into_iter().flatten() {
                if visited.insert(*parent) {
                    stack.push(*parent);
                }
            }
        }
        visited
    }

    /// Inserts a fully validated entry. `direct_parents` are the in-pool
    /// transactions whose outputs it spends; the caller has already
    /// enforced package limits and resolved conflicts.
    pub fn insert(&mut self, mut entry: MempoolEntry, direct_parents: &[TransactionId]) {
        let id = entry.id;
        debug_assert!(!self.all.contains_key(&id));
        entry.sequence = self.next_sequence;
        self.next_sequence += 1;

        for input in entry.tx.inputs.iter() {
            self.outpoint_spenders.insert(input.previous_outpoint, id);
        }
        let parent_set: HashSet<TransactionId> = direct_parents.iter().copied().collect();
        for parent in parent_set.iter() {
            self.children.entry(*parent).or_default().insert(id);
        }

        let ancestors = self.ancestors_of_parents(direct_parents);
        for ancestor_id in ancestors.iter() {
            let ancestor = self.all.get(ancestor_id).cloned();
            if let Some(ancestor) = ancestor {
                entry.ancestor_count += 1;
                entry.ancestor_size += ancestor.size;
                entry.ancestor_fees += ancestor.effective_fee();
            }
            if let Some(ancestor) = self.all.get_mut(ancestor_id) {
                ancestor.descendant_count += 1;
                ancestor.descendant_size += entry.size;
                ancestor.descendant_fees += entry.effective_fee();
            }
        }

        self.parents.insert(id, parent_set);
        self.total_size += entry.size;
        self.all.insert(id, entry);
    }

    /// Removes a confirmed transaction, leaving its descendants pooled.
    /// Block transactions must be confirmed in block order so that in-pool
    /// parents are removed before their children.
    pub fn remove_confirmed(&mut self, id: &TransactionId) -> Option<Arc<Transaction>> {
        let entry = self.all.get(id)?.clone();
        for descendant_id in self.descendants(id) {
            if let Some(descendant) = self.all.get_mut(&descendant_id) {
                descendant.ancestor_count -= 1;
                descendant.ancestor_size -= entry.size;
                descendant.ancestor_fees -= entry.effective_fee();
            }
        }
        for ancestor_id in self.ancestors(id) {
            if let Some(ancestor) = self.all.get_mut(&ancestor_id) {
                ancestor.descendant_count -= 1;
                ancestor.descendant_size -= entry.size;
                ancestor.descendant_fees -= entry.effective_fee();
            }
        }
        self.unlink(id);
        self.total_size -= entry.size;
        self.all.swap_remove(id);
        debug!("removed confirmed transaction {} from the pool", id);
        Some(entry.tx)
    }

    /// Removes `id` and every in-pool descendant, returning the removed
    /// entries (the subtree root first).
    pub fn remove_subtree(&mut self, id: &TransactionId, reason: RemovalReason) -> Vec<MempoolEntry> {
        if !self.all.contains_key(id) {
            return vec![];
        }
        let mut removal: Vec<TransactionId> = vec![*id];
        removal.extend(self.descendants(id));
        let removal_set: HashSet<TransactionId> = removal.iter().copied().collect();

        // Descendant aggregates of ancestors outside the subtree shrink by
        // each removed entry; ancestor aggregates of remaining entries are
        // untouched since the subtree is descendant-closed
        for removed_id in removal.iter() {
            let removed = match self.all.get(removed_id) {
                Some(entry) => entry.clone(),
                None => continue,
            };
            for ancestor_id in self.ancestors(removed_id) {
                if removal_set.contains(&ancestor_id) {
                    continue;
                }
                if let Some(ancestor) = self.all.get_mut(&ancestor_id) {
                    ancestor.descendant_count -= 1;
                    ancestor.descendant_size -= removed.size;
                    ancestor.descendant_fees -= removed.effective_fee();
                }
            }
        }

        let mut removed_entries = Vec::with_capacity(removal.len());
        for removed_id in removal.iter() {
            self.unlink(removed_id);
            if let Some(entry) = self.all.swap_remove(removed_id) {
                self.total_size -= entry.size;
                debug!("removed transaction {} from the pool ({:?})", removed_id, reason);
                removed_entries.push(entry);
            }
        }
        removed_entries
    }

    fn unlink(&mut self, id: &TransactionId) {
        if let Some(entry) = self.all.get(id) {
            for input in entry.tx.inputs.iter() {
                if self.outpoint_spenders.get(&input.previous_outpoint) == Some(id) {
                    self.outpoint_spenders.remove(&input.previous_outpoint);
                }
            }
        }
        if let Some(parent_set) = self.parents.remove(id) {
            for parent in parent_set {
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(id);
                }
            }
        }
        if let Some(child_set) = self.children.remove(id) {
            for child in child_set {
                if let Some(child_parents) = self.parents.get_mut(&child) {
                    child_parents.remove(id);
                }
            }
        }
    }

    /// Propagates an updated total fee delta through the package aggregates
    pub fn apply_fee_delta(&mut self, id: &TransactionId, new_total_delta: i64) {
        let diff = match self.all.get(id) {
            Some(entry) => new_total_delta - entry.fee_delta,
            None => return,
        };
        if diff == 0 {
            return;
        }
        let descendants = self.descendants(id);
        let ancestors = self.ancestors(id);
        if let Some(entry) = self.all.get_mut(id) {
            entry.fee_delta = new_total_delta;
            entry.ancestor_fees += diff;
            entry.descendant_fees += diff;
        }
        for descendant_id in descendants {
            if let Some(descendant) = self.all.get_mut(&descendant_id) {
                descendant.ancestor_fees += diff;
            }
        }
        for ancestor_id in ancestors {
            if let Some(ancestor) = self.all.get_mut(&ancestor_id) {
                ancestor.descendant_fees += diff;
            }
        }
    }

    /// Entries pooled longer than the configured TTL
    pub fn expired_ids(&self, now: u64) -> Vec<TransactionId> {
        let ttl = self.config.transaction_expire_seconds;
        self.all
            .values()
            .filter(|entry| entry.admission_time + ttl <= now)
            .map(|entry| entry.id)
            .collect()
    }

    /// The entry with the lowest ancestor-package fee rate, the next
    /// eviction victim when the pool outgrows its size cap
    pub fn lowest_scored_id(&self) -> Option<TransactionId> {
        self.all
            .values()
            .min_by(|a, b| {
                a.ancestor_score()
                    .partial_cmp(&b.ancestor_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.sequence.cmp(&a.sequence))
            })
            .map(|entry| entry.id)
    }
}
