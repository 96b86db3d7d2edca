//! Pluggable policy seams.
//!
//! Difficulty retargeting, stake-kernel hashing and script execution are
//! consulted by block validation through these traits but defined outside
//! the chain core. The core only relies on their contracts: deterministic
//! pass/fail given the same inputs.

use crate::coin::Coin;
use crate::header::Header;
use crate::tx::Transaction;
use std::fmt::{Display, Formatter};

/// Computes the required compact target for the next block.
pub trait DifficultyPolicy: Send + Sync {
    /// `ancestors` yields `(timestamp, bits)` pairs walking back from the
    /// prospective block's parent, most recent first. Implementations
    /// consume as much of the window as their algorithm needs.
    fn required_bits(&self, ancestors: &mut dyn Iterator<Item = (u64, u32)>) -> u32;
}

/// Verifies the proof-of-stake kernel of a coinstake block.
pub trait StakeKernel: Send + Sync {
    /// `stake_coin` is the coin spent by the coinstake's first input and
    /// `coin_creation_time` the timestamp of the block that created it.
    fn check_kernel(&self, header: &Header, stake_coin: &Coin, coin_creation_time: u64) -> bool;
}

/// Script execution failure, surfaced as an opaque code and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptError {
    pub code: u16,
    pub message: &'static str,
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "script error {}: {}", self.code, self.message)
    }
}

/// Executes input scripts. The chain core treats execution as pass/fail
/// and caches results keyed by transaction id and flags.
pub trait ScriptEngine: Send + Sync {
    fn verify(&self, tx: &Transaction, input_index: usize, utxo: &Coin, flags: u32) -> Result<(), ScriptError>;
}

/// A difficulty policy that pins a fixed target, for test networks.
pub struct FixedDifficulty(pub u32);

impl DifficultyPolicy for FixedDifficulty {
    fn required_bits(&self, _ancestors: &mut dyn Iterator<Item = (u64, u32)>) -> u32 {
        self.0
    }
}

/// A stake kernel that accepts every coinstake, for test networks.
pub struct PermissiveKernel;

impl StakeKernel for PermissiveKernel {
    fn check_kernel(&self, _header: &Header, _stake_coin: &Coin, _coin_creation_time: u64) -> bool {
        true
    }
}

/// A script engine that accepts every input, for test networks.
pub struct PermissiveScripts;

impl ScriptEngine for PermissiveScripts {
    fn verify(&self, _tx: &Transaction, _input_index: usize, _utxo: &Coin, _flags: u32) -> Result<(), ScriptError> {
        Ok(())
    }
}
