//! Contract handlers: apply a transaction's payload to ledger state.
//!
//! A handler either applies its change completely or returns an error
//! without touching state. The ledger turns errors into a `false` execution
//! result; they never abort block processing.

use crate::blockchain::{Asset, Blockchain};
use crate::error::{ChainError, Result};
use crate::transaction::{Transaction, ADD_VALIDATOR, MINT_DEGREE};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use tracing::info;

pub type ContractHandler = fn(&mut Blockchain, &Transaction) -> Result<()>;

pub fn default_handlers() -> HashMap<&'static str, ContractHandler> {
    let mut handlers: HashMap<&'static str, ContractHandler> = HashMap::new();
    handlers.insert(MINT_DEGREE, mint_credential);
    handlers.insert(ADD_VALIDATOR, add_validator);
    handlers
}

/// 128 random bits; a fresh draw is taken on the (negligible) chance of a clash.
fn generate_credential_ref(ledger: &Blockchain) -> String {
    loop {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let credential_ref = format!("EDU-{}", hex::encode_upper(bytes));
        if !ledger.state.contains_asset(&credential_ref) {
            return credential_ref;
        }
    }
}

/// Mints an on-chain credential for `recipient_address`. Only members of the
/// authority set may mint.
pub fn mint_credential(ledger: &mut Blockchain, tx: &Transaction) -> Result<()> {
    if !ledger.is_authority(&tx.sender_pubkey) {
        return Err(ChainError::Authorization(format!(
            "{} is not allowed to mint credentials",
            tx.sender_address
        )));
    }

    let (recipient_address, payload_hash) = match tx.payload.mint_fields() {
        Some((recipient_address, payload_hash))
            if !recipient_address.is_empty() && !payload_hash.is_empty() =>
        {
            (recipient_address.to_string(), payload_hash.to_string())
        }
        _ => {
            return Err(ChainError::Validation(
                "MINT_DEGREE payload needs a recipient address and a document hash".to_string(),
            ))
        }
    };

    let credential_ref = generate_credential_ref(ledger);
    ledger.state.record_credential(
        credential_ref.clone(),
        Asset {
            owner: recipient_address.clone(),
            payload_hash: payload_hash.clone(),
            issued_by: tx.sender_pubkey.clone(),
        },
    );
    info!(
        credential = %credential_ref,
        document = %payload_hash,
        recipient = %recipient_address,
        "credential minted"
    );
    Ok(())
}

/// Adds a block-producing authority. Only the root authority may do this;
/// re-adding an existing member is a successful no-op.
pub fn add_validator(ledger: &mut Blockchain, tx: &Transaction) -> Result<()> {
    if tx.sender_pubkey != ledger.root_authority_pubkey {
        return Err(ChainError::Authorization(format!(
            "{} is not the root authority",
            tx.sender_address
        )));
    }

    let new_validator_pubkey = match tx.payload.new_validator_pubkey() {
        Some(pubkey) if !pubkey.is_empty() => pubkey.to_string(),
        _ => {
            return Err(ChainError::Validation(
                "ADD_VALIDATOR payload needs a validator public key".to_string(),
            ))
        }
    };

    if ledger.authority_set.insert(new_validator_pubkey.clone()) {
        info!(validator = %new_validator_pubkey, "validator added");
    } else {
        info!(validator = %new_validator_pubkey, "validator already in authority set");
    }
    Ok(())
}
