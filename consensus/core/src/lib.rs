use std::collections::{HashMap, HashSet};

pub mod block;
pub mod coin;
pub mod config;
pub mod errors;
pub mod events;
pub mod hash;
pub mod header;
pub mod locks;
pub mod merkle;
pub mod policies;
pub mod subsidy;
pub mod testutils;
pub mod tx;
pub mod undo;
pub mod utxo;
pub mod work;

pub use hash::Hash;

/// Integer type for accumulated proof amounts
pub type BlockWorkType = work::Uint256;

pub type BlockHashSet = HashSet<Hash>;
pub type BlockHashMap<T> = HashMap<Hash, T>;

/// Smallest monetary unit of the ledger
pub type Amount = u64;

/// Maximum amount of money a single output or a value sum may carry
pub const MAX_MONEY: Amount = 21_000_000_000 * 100_000_000;
