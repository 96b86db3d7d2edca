use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::tx::{TransactionId, TransactionOutpoint};
use cinder_consensus_core::Amount;
use thiserror::Error;

/// Broad rejection category, deciding what the caller may do with the
/// transaction afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Violates consensus rules; permanently invalid
    ConsensusInvalid,
    /// References outputs not yet known; may be re-offered later
    MissingDependency,
    /// Valid under consensus but fails local relay policy
    PolicyRejected,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error(transparent)]
    RejectTxRule(#[from] TxRuleError),

    #[error("transaction {0} is already in the pool")]
    RejectDuplicate(TransactionId),

    #[error("transaction {0} is already confirmed")]
    RejectAlreadyConfirmed(TransactionId),

    #[error("coinbase or coinstake transaction {0} cannot enter the pool")]
    RejectReward(TransactionId),

    #[error("transaction {0} references missing outputs {1:?}")]
    RejectMissingOutpoints(TransactionId, Vec<TransactionOutpoint>),

    #[error("replace-by-fee is disabled and transaction {0} conflicts with a pooled transaction")]
    RejectRbfDisabled(TransactionId),

    #[error("replacing the conflicts of transaction {0} would evict {1} transactions, limit is {2}")]
    RejectRbfTooManyEvictions(TransactionId, usize, usize),

    #[error("replacement fee rate {0} does not exceed the conflicting rate {1}")]
    RejectRbfLowFeeRate(f64, f64),

    #[error("replacement absolute fee {0} does not cover evicted fees plus relay fee {1}")]
    RejectRbfInsufficientFee(Amount, Amount),

    #[error("replacement input {0} spends a new unconfirmed output")]
    RejectRbfNewUnconfirmedInput(TransactionOutpoint),

    #[error("transaction {0} would have {1} ancestors, limit is {2}")]
    RejectAncestorCount(TransactionId, u64, u64),

    #[error("transaction {0} would form an ancestor package of {1} bytes, limit is {2}")]
    RejectAncestorSize(TransactionId, u64, u64),

    #[error("transaction {0} would give an ancestor {1} descendants, limit is {2}")]
    RejectDescendantCount(TransactionId, u64, u64),

    #[error("transaction {0} would grow a descendant package to {1} bytes, limit is {2}")]
    RejectDescendantSize(TransactionId, u64, u64),

    #[error("transaction {0} fee rate {1} is below the relay floor {2}")]
    RejectLowFeeRate(TransactionId, f64, f64),

    #[error(transparent)]
    RejectNonStandard(#[from] NonStandardError),
}

impl RuleError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            RuleError::RejectTxRule(_) => RejectionKind::ConsensusInvalid,
            RuleError::RejectMissingOutpoints(_, _) => RejectionKind::MissingDependency,
            _ => RejectionKind::PolicyRejected,
        }
    }
}

/// Relay-policy standardness violations. Never consensus failures: a
/// non-standard transaction may still appear in a valid block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonStandardError {
    #[error("transaction {0} version {1} is not standard")]
    Version(TransactionId, u32),

    #[error("transaction {0} size {1} exceeds the standard maximum {2}")]
    TooBig(TransactionId, u64, u64),

    #[error("output {1} of transaction {0} pays {2} which is dust")]
    Dust(TransactionId, usize, Amount),

    #[error("input {1} of transaction {0} carries an oversized signature script")]
    SignatureScriptSize(TransactionId, usize),

    #[error("output {1} of transaction {0} carries an empty script")]
    EmptyScript(TransactionId, usize),
}

pub type RuleResult<T> = std::result::Result<T, RuleError>;
