pub mod consensus;
pub mod constants;
pub mod errors;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod processes;

pub use crate::consensus::Consensus;
pub use crate::errors::{BlockOutcome, ConsensusError, ConsensusResult};
