use crate::errors::tx::TxRuleError;
use crate::tx::TransactionId;
use crate::{Amount, Hash};
use thiserror::Error;

/// Consensus rule violations of a block. Each variant maps to a DoS
/// penalty (see [`RuleError::penalty`]) with which callers may score the
/// submitting peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("block target {0:#010x} does not match the expected target {1:#010x}")]
    UnexpectedDifficulty(u32, u32),

    #[error("block hash does not satisfy its declared target")]
    InvalidProofOfWork,

    #[error("stake kernel hash does not satisfy the stake target")]
    BadStakeKernel,

    #[error("stake input has {0} confirmations, {1} required")]
    ImmatureStake(u64, u64),

    #[error("block timestamp {0} is more than {1} seconds in the future")]
    TimeTooFarIntoFuture(u64, u64),

    #[error("block timestamp {0} is not later than the median time {1} of its ancestors")]
    TimeTooOld(u64, u64),

    #[error("declared merkle root {0} does not match the calculated root {1}")]
    BadMerkleRoot(Hash, Hash),

    #[error("transaction list duplication preserves the merkle root")]
    MutatedMerkleTree,

    #[error("first transaction is not a coinbase")]
    FirstTxNotCoinbase,

    #[error("transaction at position {0} is an extra coinbase")]
    MultipleCoinbases(usize),

    #[error("proof-of-stake block has a malformed reward structure")]
    BadStakeStructure,

    #[error("transaction at position {0} is an extra coinstake")]
    MultipleCoinstakes(usize),

    #[error("proof-of-stake block carries an invalid block signature")]
    BadBlockSignature,

    #[error("block has no transactions")]
    NoTransactions,

    #[error("block size {0} exceeds the maximum of {1}")]
    BlockSizeExceeded(u64, u64),

    #[error("block signature-operation cost {0} exceeds the maximum of {1}")]
    ExcessiveSigOps(u64, u64),

    #[error("block reward {0} exceeds the allowed subsidy plus fees {1}")]
    BadRewardAmount(Amount, Amount),

    #[error("block version {0} is obsolete at height {1}")]
    ObsoleteVersion(u32, u64),

    #[error("block at height {0} does not match the checkpoint {1}")]
    CheckpointMismatch(u64, Hash),

    #[error("fork from height {0} is deeper than the maximum reorganization depth {1}")]
    ForkTooDeep(u64, u64),

    #[error("parent {0} is known to be invalid")]
    KnownInvalidParent(Hash),

    #[error("transaction {0} spends the missing or already-spent output {1}")]
    MissingOrSpentOutpoint(TransactionId, crate::tx::TransactionOutpoint),

    #[error("transaction {0} overwrites the unspent outputs of an earlier transaction")]
    OverwritingCoins(TransactionId),

    #[error("{0}")]
    TxInContext(#[from] TxRuleError),
}

impl RuleError {
    /// DoS score attributed to the peer that relayed the offending block.
    /// A score of 100 marks outright consensus violations; lower scores
    /// cover borderline data a peer may relay honestly.
    pub fn penalty(&self) -> u32 {
        match self {
            // Timestamps drift; peers relay such blocks honestly
            RuleError::TimeTooFarIntoFuture(_, _) => 0,
            // Depends on the receiver's chain view
            RuleError::ForkTooDeep(_, _) => 0,
            RuleError::KnownInvalidParent(_) => 10,
            RuleError::MissingOrSpentOutpoint(_, _) => 10,
            RuleError::TxInContext(TxRuleError::InsufficientFunds(_, _, _)) => 10,
            _ => 100,
        }
    }
}
