use crate::errors::{NonStandardError, RuleResult};
use crate::Mempool;
use cinder_consensus_core::tx::Transaction;

/// Maximum signature script size relay policy accepts per input
const MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE: usize = 1650;

impl Mempool {
    /// Relay standardness. Everything here is local policy: a failing
    /// transaction may still be confirmed by a block.
    pub(crate) fn check_transaction_standard(&self, tx: &Transaction) -> RuleResult<()> {
        let id = tx.id();

        if tx.version == 0 || tx.version > 2 {
            return Err(NonStandardError::Version(id, tx.version).into());
        }

        let size = tx.estimated_size();
        if size > self.config.maximum_standard_tx_size {
            return Err(NonStandardError::TooBig(id, size, self.config.maximum_standard_tx_size).into());
        }

        for (i, input) in tx.inputs.iter().enumerate() {
            if input.signature_script.len() > MAXIMUM_STANDARD_SIGNATURE_SCRIPT_SIZE {
                return Err(NonStandardError::SignatureScriptSize(id, i).into());
            }
        }

        for (i, output) in tx.outputs.iter().enumerate() {
            if output.script_public_key.is_empty() {
                return Err(NonStandardError::EmptyScript(id, i).into());
            }
            if output.value < self.config.dust_output_value {
                return Err(NonStandardError::Dust(id, i, output.value).into());
            }
        }

        Ok(())
    }
}
