/// Validation logic for transactions separated from type definitions
use crate::crypto;
use crate::error::{ChainError, Result};
use crate::transaction::types::Transaction;

impl Transaction {
    /// Validates the transaction on its own, without access to ledger state:
    /// the id and sender address must be the ones derived from the signed
    /// fields, and the signature must verify under `sender_pubkey`.
    pub fn validate_signature(&self) -> Result<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| ChainError::Validation("Transaction not signed".to_string()))?;

        if self.sender_pubkey.is_empty() {
            return Err(ChainError::Validation(
                "Transaction has no sender public key".to_string(),
            ));
        }

        let message = self.signable_message()?;
        if message.sha256_hex() != self.tx_id {
            return Err(ChainError::Validation(format!(
                "Transaction id {} does not match its contents",
                self.tx_id
            )));
        }

        if crypto::derive_address(&self.sender_pubkey)? != self.sender_address {
            return Err(ChainError::Validation(format!(
                "Sender address {} does not belong to the sender public key",
                self.sender_address
            )));
        }

        crypto::verify_signature(&message, signature, &self.sender_pubkey)
    }

    /// True iff the transaction passes [`Transaction::validate_signature`].
    pub fn is_valid(&self) -> bool {
        self.validate_signature().is_ok()
    }
}
