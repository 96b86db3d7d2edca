use cinder_consensus_core::Amount;

pub(crate) const DEFAULT_MAXIMUM_POOL_SIZE_BYTES: u64 = 300 * 1024 * 1024;
pub(crate) const DEFAULT_TRANSACTION_EXPIRE_SECONDS: u64 = 336 * 60 * 60;
pub(crate) const DEFAULT_MAXIMUM_ANCESTOR_COUNT: u64 = 25;
pub(crate) const DEFAULT_MAXIMUM_ANCESTOR_SIZE_BYTES: u64 = 101_000;
pub(crate) const DEFAULT_MAXIMUM_DESCENDANT_COUNT: u64 = 25;
pub(crate) const DEFAULT_MAXIMUM_DESCENDANT_SIZE_BYTES: u64 = 101_000;
pub(crate) const DEFAULT_MAXIMUM_REPLACEMENT_EVICTIONS: usize = 100;
pub(crate) const DEFAULT_MINIMUM_RELAY_FEE_RATE: f64 = 1.0;
pub(crate) const DEFAULT_MAXIMUM_STANDARD_TX_SIZE: u64 = 100_000;
pub(crate) const DEFAULT_DUST_OUTPUT_VALUE: Amount = 546;

#[derive(Clone, Debug)]
pub struct MempoolConfig {
    /// Total serialized size above which lowest-scored packages are evicted
    pub maximum_pool_size_bytes: u64,
    /// Transactions pooled longer than this are expired
    pub transaction_expire_seconds: u64,

    pub maximum_ancestor_count: u64,
    pub maximum_ancestor_size_bytes: u64,
    pub maximum_descendant_count: u64,
    pub maximum_descendant_size_bytes: u64,

    /// Whether conflicting transactions may replace pooled ones by fee
    pub enable_rbf: bool,
    /// Cap on the combined descendant count of all conflicts of a replacement
    pub maximum_replacement_evictions: usize,
    /// Fee per byte a replacement must add on top of the fees it evicts,
    /// also the admission floor for ordinary transactions
    pub minimum_relay_fee_rate: f64,

    /// Standardness: maximum serialized transaction size
    pub maximum_standard_tx_size: u64,
    /// Standardness: outputs below this value are rejected as dust
    pub dust_output_value: Amount,
    /// When set, standardness checks are skipped entirely (local networks)
    pub accept_non_standard: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            maximum_pool_size_bytes: DEFAULT_MAXIMUM_POOL_SIZE_BYTES,
            transaction_expire_seconds: DEFAULT_TRANSACTION_EXPIRE_SECONDS,
            maximum_ancestor_count: DEFAULT_MAXIMUM_ANCESTOR_COUNT,
            maximum_ancestor_size_bytes: DEFAULT_MAXIMUM_ANCESTOR_SIZE_BYTES,
            maximum_descendant_count: DEFAULT_MAXIMUM_DESCENDANT_COUNT,
            maximum_descendant_size_bytes: DEFAULT_MAXIMUM_DESCENDANT_SIZE_BYTES,
            enable_rbf: true,
            maximum_replacement_evictions: DEFAULT_MAXIMUM_REPLACEMENT_EVICTIONS,
            minimum_relay_fee_rate: DEFAULT_MINIMUM_RELAY_FEE_RATE,
            maximum_standard_tx_size: DEFAULT_MAXIMUM_STANDARD_TX_SIZE,
            dust_output_value: DEFAULT_DUST_OUTPUT_VALUE,
            accept_non_standard: false,
        }
    }
}
