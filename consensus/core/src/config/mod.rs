pub mod params;

pub use params::{Params, MAINNET_PARAMS, SIMNET_PARAMS};

use std::ops::Deref;

/// Node-level configuration wrapping the network [`Params`] with runtime
/// tuning knobs. Derefs to `Params` so consensus code can read network
/// rules directly off a `Config`.
#[derive(Clone, Debug)]
pub struct Config {
    pub params: Params,

    /// Soft limit on buffered UTXO cache entries before a periodic flush
    pub utxo_cache_soft_limit: usize,
    /// Hard limit forcing an immediate full flush
    pub utxo_cache_hard_limit: usize,
    /// Maximum size in bytes of a single block data file
    pub block_file_max_size: u64,
    /// Seconds between periodic flushes regardless of cache pressure
    pub flush_interval_seconds: u64,
    /// Whether old block/undo files may be deleted once buried deeply enough
    pub prune_enabled: bool,
    /// Run full structural re-validation when connecting (defense in depth)
    pub paranoid_connect_checks: bool,
}

impl Config {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            utxo_cache_soft_limit: 100_000,
            utxo_cache_hard_limit: 1_000_000,
            block_file_max_size: 128 * 1024 * 1024,
            flush_interval_seconds: 60 * 60,
            prune_enabled: false,
            paranoid_connect_checks: true,
        }
    }

    pub fn builder(params: Params) -> ConfigBuilder {
        ConfigBuilder { config: Config::new(params) }
    }
}

impl Deref for Config {
    type Target = Params;

    fn deref(&self) -> &Self::Target {
        &self.params
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn utxo_cache_limits(mut self, soft: usize, hard: usize) -> Self {
        self.config.utxo_cache_soft_limit = soft;
        self.config.utxo_cache_hard_limit = hard;
        self
    }

    pub fn block_file_max_size(mut self, size: u64) -> Self {
        self.config.block_file_max_size = size;
        self
    }

    pub fn flush_interval(mut self, seconds: u64) -> Self {
        self.config.flush_interval_seconds = seconds;
        self
    }

    pub fn enable_pruning(mut self) -> Self {
        self.config.prune_enabled = true;
        self
    }

    pub fn skip_paranoid_connect_checks(mut self) -> Self {
        self.config.paranoid_connect_checks = false;
        self
    }

    pub fn adjust_params(mut self, edit: impl FnOnce(&mut Params)) -> Self {
        edit(&mut self.config.params);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
