pub mod block_index;
pub mod chain;
pub mod stores;
pub mod utxo_cache;
