use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use std::{collections::hash_map::RandomState, hash::BuildHasher, sync::Arc};

/// Bounds the number of entries held by a [`Cache`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CachePolicy {
    /// Hold at most this many entries
    Count(usize),
    /// Caching disabled
    Empty,
}

impl CachePolicy {
    fn max_size(&self) -> usize {
        match self {
            CachePolicy::Count(max) => *max,
            CachePolicy::Empty => 0,
        }
    }
}

/// A size-bounded concurrent cache. When full, a random entry is evicted;
/// an `IndexMap` makes removing a random element cheap.
#[derive(Clone)]
pub struct Cache<TKey, TData, S = RandomState>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
{
    map: Arc<RwLock<IndexMap<TKey, TData, S>>>,
    max_size: usize,
}

impl<TKey, TData, S> Cache<TKey, TData, S>
where
    TKey: Clone + std::hash::Hash + Eq + Send + Sync,
    TData: Clone + Send + Sync,
    S: BuildHasher + Default,
{
    pub fn new(policy: CachePolicy) -> Self {
        let max_size = policy.max_size();
        // Use `size + 1` for not triggering a realloc if a new element exactly overflows capacity
        Self {
            map: Arc::new(RwLock::new(IndexMap::with_capacity_and_hasher(
                if max_size > 0 { max_size + 1 } else { 0 },
                S::default(),
            ))),
            max_size,
        }
    }

    pub fn get(&self, key: &TKey) -> Option<TData> {
        self.map.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &TKey) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn insert(&self, key: TKey, data: TData) {
        if self.max_size == 0 {
            return;
        }
        let mut write_guard = self.map.write();
        if write_guard.len() == self.max_size {
            write_guard.swap_remove_index(rand::thread_rng().gen_range(0..self.max_size));
        }
        write_guard.insert(key, data);
    }

    pub fn insert_many(&self, iter: &mut impl Iterator<Item = (TKey, TData)>) {
        if self.max_size == 0 {
            return;
        }
        let mut write_guard = self.map.write();
        for (key, data) in iter {
            if write_guard.len() == self.max_size {
                let index = rand::thread_rng().gen_range(0..self.max_size);
                write_guard.swap_remove_index(index);
            }
            write_guard.insert(key, data);
        }
    }

    pub fn remove(&self, key: &TKey) -> Option<TData> {
        if self.max_size == 0 {
            return None;
        }
        self.map.write().swap_remove(key)
    }
}
