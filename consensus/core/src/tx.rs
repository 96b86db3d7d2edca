use crate::coin::Coin;
use crate::hash::HashWriter;
use crate::{Amount, Hash};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Represents the ID of a cinder transaction
pub type TransactionId = Hash;

/// Used as the underlying type for script public keys.
/// Standard script lengths fit on the stack.
pub type ScriptVec = SmallVec<[u8; 36]>;

/// Sequence value signalling a final input
pub const SEQUENCE_FINAL: u64 = u64::MAX;

/// Represents a cinder script public key
#[derive(Default, Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
pub struct ScriptPublicKey {
    pub version: u16,
    pub script: ScriptVec,
}

impl ScriptPublicKey {
    pub fn new(version: u16, script: ScriptVec) -> Self {
        Self { version, script }
    }

    pub fn from_vec(version: u16, script: Vec<u8>) -> Self {
        Self { version, script: ScriptVec::from_vec(script) }
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

/// Represents a cinder transaction outpoint
#[derive(Eq, Hash, PartialEq, Debug, Copy, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionOutpoint {
    pub transaction_id: TransactionId,
    pub index: u32,
}

impl TransactionOutpoint {
    pub fn new(transaction_id: TransactionId, index: u32) -> Self {
        Self { transaction_id, index }
    }

    /// The null outpoint carried by the coinbase input
    pub fn null() -> Self {
        Self { transaction_id: Hash::ZERO, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.transaction_id.is_zero() && self.index == u32::MAX
    }
}

impl Display for TransactionOutpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.transaction_id, self.index)
    }
}

/// Represents a cinder transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub previous_outpoint: TransactionOutpoint,
    pub signature_script: Vec<u8>,
    pub sequence: u64,
    pub sig_op_count: u8,
}

impl TransactionInput {
    pub fn new(previous_outpoint: TransactionOutpoint, signature_script: Vec<u8>, sequence: u64, sig_op_count: u8) -> Self {
        Self { previous_outpoint, signature_script, sequence, sig_op_count }
    }
}

/// Represents a cinder transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub script_public_key: ScriptPublicKey,
}

impl TransactionOutput {
    pub fn new(value: Amount, script_public_key: ScriptPublicKey) -> Self {
        Self { value, script_public_key }
    }

    /// An empty output (zero value, empty script) as mandated for the
    /// coinbase of proof-of-stake blocks and the marker output of coinstakes
    pub fn empty() -> Self {
        Self { value: 0, script_public_key: ScriptPublicKey::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_public_key.is_empty()
    }
}

/// Represents a cinder transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u64,
}

impl Transaction {
    pub fn new(version: u32, inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>, lock_time: u64) -> Self {
        Self { version, inputs, outputs, lock_time }
    }

    /// The transaction hash over all fields, including signature scripts
    pub fn id(&self) -> TransactionId {
        let mut hasher = HashWriter::transaction_id();
        hasher.update(self.version.to_le_bytes()).update((self.inputs.len() as u64).to_le_bytes());
        for input in self.inputs.iter() {
            hasher
                .update(input.previous_outpoint.transaction_id)
                .update(input.previous_outpoint.index.to_le_bytes())
                .update((input.signature_script.len() as u64).to_le_bytes())
                .update(&input.signature_script)
                .update(input.sequence.to_le_bytes())
                .update([input.sig_op_count]);
        }
        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for output in self.outputs.iter() {
            hasher
                .update(output.value.to_le_bytes())
                .update(output.script_public_key.version.to_le_bytes())
                .update((output.script_public_key.script.len() as u64).to_le_bytes())
                .update(&output.script_public_key.script);
        }
        hasher.update(self.lock_time.to_le_bytes());
        hasher.finalize()
    }

    /// A coinbase carries exactly one input spending the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_outpoint.is_null()
    }

    /// A coinstake spends real coins and marks itself with an empty first output
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].previous_outpoint.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Serialized size estimation used for mass/fee-rate purposes
    pub fn estimated_size(&self) -> u64 {
        let base = 4 + 8 + 8 + 8; // version, lock time, input and output counts
        let inputs: usize = self.inputs.iter().map(|input| 32 + 4 + 8 + 1 + 8 + input.signature_script.len()).sum();
        let outputs: usize = self.outputs.iter().map(|output| 8 + 2 + 8 + output.script_public_key.script.len()).sum();
        (base + inputs + outputs) as u64
    }

    pub fn sig_op_count(&self) -> u64 {
        self.inputs.iter().map(|input| input.sig_op_count as u64).sum()
    }

    pub fn output_value_total(&self) -> Amount {
        self.outputs.iter().map(|output| output.value).sum()
    }
}

/// Represents a transaction paired with the UTXO entries of its inputs,
/// resolved against a chain + mempool view. Entry `i` corresponds to input `i`.
#[derive(Debug, Clone)]
pub struct MutableTransaction {
    pub tx: Arc<Transaction>,
    pub entries: Vec<Option<Coin>>,
    pub calculated_fee: Option<Amount>,
}

impl MutableTransaction {
    pub fn from_tx(tx: Transaction) -> Self {
        let entries = vec![None; tx.inputs.len()];
        Self { tx: Arc::new(tx), entries, calculated_fee: None }
    }

    pub fn id(&self) -> TransactionId {
        self.tx.id()
    }

    pub fn is_fully_populated(&self) -> bool {
        self.entries.iter().all(|entry| entry.is_some())
    }

    pub fn missing_outpoints(&self) -> impl Iterator<Item = TransactionOutpoint> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, entry)| {
            if entry.is_none() {
                Some(self.tx.inputs[i].previous_outpoint)
            } else {
                None
            }
        })
    }

    pub fn clear_entries(&mut self) {
        self.entries = vec![None; self.tx.inputs.len()];
        self.calculated_fee = None;
    }

    /// Fee per serialized byte, available only after fee calculation
    pub fn calculated_fee_rate(&self) -> Option<f64> {
        self.calculated_fee.map(|fee| fee as f64 / self.tx.estimated_size() as f64)
    }
}
