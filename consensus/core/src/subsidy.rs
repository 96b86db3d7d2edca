use crate::Amount;

/// Block subsidy schedule: the initial subsidy halves every
/// `halving_interval` blocks and reaches zero after 64 halvings.
pub fn block_subsidy(height: u64, initial_subsidy: Amount, halving_interval: u64) -> Amount {
    let halvings = height / halving_interval;
    if halvings >= 64 {
        return 0;
    }
    initial_subsidy >> halvings
}
