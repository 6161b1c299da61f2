/// Validation logic for transactions separated from type definitions
use crate::blockchain::Blockchain;
use crate::crypto;
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Validates every input against the confirmed history: the referenced
    /// output must exist, the signature must verify against its owner, and
    /// the outputs may not exceed what the inputs reference. A single failing
    /// input rejects the whole transaction.
    pub fn validate(&self, chain: &Blockchain) -> Result<(), ChainError> {
        if self.is_coinbase() {
            return Err(ChainError::InvalidTransaction(
                "Reward transactions are not validated as spends".to_string(),
            ));
        }
        if self.tx_ins.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Transaction has no inputs".to_string(),
            ));
        }

        if self.id != self.calculate_id() {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction id {} does not match its content",
                self.id
            )));
        }

        let mut input_total = 0u64;
        for tx_in in &self.tx_ins {
            let source = chain.find_tx(&tx_in.tx_id)?.ok_or_else(|| {
                ChainError::InvalidTransaction(format!(
                    "Input references unknown transaction {}",
                    tx_in.tx_id
                ))
            })?;

            let output = usize::try_from(tx_in.index)
                .ok()
                .and_then(|index| source.tx_outs.get(index))
                .ok_or_else(|| {
                    ChainError::InvalidTransaction(format!(
                        "Transaction {} has no output {}",
                        tx_in.tx_id, tx_in.index
                    ))
                })?;

            if !crypto::verify(&tx_in.signature, &self.id, &output.address) {
                return Err(ChainError::InvalidSignature(format!(
                    "Input {}:{} is not signed by its owner",
                    tx_in.tx_id, tx_in.index
                )));
            }
            input_total = input_total.checked_add(output.amount).ok_or_else(|| {
                ChainError::InvalidTransaction(format!("Inputs of transaction {} overflow", self.id))
            })?;
        }

        let output_total = self.total_output()?;
        if output_total > input_total {
            return Err(ChainError::InvalidTransaction(format!(
                "Outputs ({}) exceed inputs ({})",
                output_total, input_total
            )));
        }

        Ok(())
    }
}
