use cinder_consensus_core::errors::block::RuleError;
use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::Hash;
use cinder_database::prelude::StoreError;
use thiserror::Error;

/// Errors surfaced by block processing and chain activation. The variants
/// split along the handling boundary: rule violations are data errors with
/// a DoS penalty, missing parents are re-offerable, store and I/O failures
/// are fatal and must shut the node down rather than be retried.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("block parent {0} is unknown")]
    MissingParent(Hash),

    #[error("block {0} data is not available")]
    MissingData(Hash),

    #[error("block {0} was already rejected")]
    KnownInvalid(Hash),

    #[error("disconnect of block {0} did not restore the prior view exactly")]
    UncleanDisconnect(Hash),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("block file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TxRuleError> for ConsensusError {
    fn from(err: TxRuleError) -> Self {
        ConsensusError::Rule(RuleError::from(err))
    }
}

impl ConsensusError {
    /// Fatal errors indicate disk-level trouble; the caller aborts the
    /// node instead of treating the block as invalid
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::Store(_) | ConsensusError::Io(_))
    }

    /// DoS score for the relaying peer
    pub fn penalty(&self) -> u32 {
        match self {
            ConsensusError::Rule(rule) => rule.penalty(),
            ConsensusError::KnownInvalid(_) => 100,
            _ => 0,
        }
    }
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

/// Successful outcomes of `process_new_block`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block extended or reorganized onto the active chain
    NewTip,
    /// Stored and indexed, but the active chain did not change
    SideChain,
    /// The block was already fully processed; nothing was reapplied
    AlreadyKnown,
}
