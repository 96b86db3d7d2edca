use crate::tx::{TransactionId, TransactionOutpoint};
use crate::Amount;
use thiserror::Error;

/// Structural and contextual rule violations of a single transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxRuleError {
    #[error("transaction has no inputs")]
    NoTxInputs,

    #[error("transaction has no outputs")]
    NoTxOutputs,

    #[error("transaction size {0} exceeds the maximum of {1}")]
    TxTooBig(u64, u64),

    #[error("output value {0} exceeds the maximum of {1}")]
    OutputValueTooHigh(Amount, Amount),

    #[error("total output value {0} exceeds the maximum of {1}")]
    TotalOutputValueTooHigh(Amount, Amount),

    #[error("transaction contains the outpoint {0} more than once")]
    DuplicateInput(TransactionOutpoint),

    #[error("non-coinbase transaction {0} carries a null previous outpoint")]
    NullInput(TransactionId),

    #[error("coinbase signature script length {0} is outside the allowed range")]
    BadCoinbaseLength(usize),

    #[error("transaction {0} is missing the output {1}")]
    MissingTxOutput(TransactionId, TransactionOutpoint),

    #[error("input {1} of transaction {0} spends the immature reward coin {2} ({3} confirmations, {4} required)")]
    ImmatureSpend(TransactionId, usize, TransactionOutpoint, u64, u64),

    #[error("total input value {0} of transaction {1} is lower than its total output value {2}")]
    InsufficientFunds(Amount, TransactionId, Amount),

    #[error("transaction {0} is not finalized")]
    NotFinalized(TransactionId),

    #[error("transaction {0} does not satisfy its relative sequence locks")]
    SequenceLockNotMet(TransactionId),

    #[error("transaction {0} failed script verification on input {1}: {2}")]
    ScriptFailure(TransactionId, usize, String),
}
