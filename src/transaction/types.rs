/// Transaction types for EduChain
use crate::canonical::CanonicalBytes;
use crate::crypto::{self, Address, KeyPair};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum canonical transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

pub const MINT_DEGREE: &str = "MINT_DEGREE";
pub const ADD_VALIDATOR: &str = "ADD_VALIDATOR";

/// The state transition a transaction requests.
///
/// On the wire this is a JSON object whose `"type"` field selects the
/// variant. Objects with an unrecognised or malformed shape are kept verbatim
/// in `Other` so that the signed bytes survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", from = "Value")]
pub enum Payload {
    MintDegree {
        recipient_address: Address,
        /// Off-chain document reference (IPFS hash of the diploma).
        credential_ref: String,
    },
    AddValidator {
        new_validator_pubkey: String,
    },
    Other(Value),
}

impl Payload {
    pub fn mint_degree(recipient_address: impl Into<String>, credential_ref: impl Into<String>) -> Self {
        Payload::MintDegree {
            recipient_address: recipient_address.into(),
            credential_ref: credential_ref.into(),
        }
    }

    pub fn add_validator(new_validator_pubkey: impl Into<String>) -> Self {
        Payload::AddValidator {
            new_validator_pubkey: new_validator_pubkey.into(),
        }
    }

    /// Discriminator used to look up a contract handler.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Payload::MintDegree { .. } => Some(MINT_DEGREE),
            Payload::AddValidator { .. } => Some(ADD_VALIDATOR),
            Payload::Other(value) => value.get("type").and_then(Value::as_str),
        }
    }

    /// `(recipient_address, ipfs_hash)` of a MINT_DEGREE payload. Objects kept
    /// verbatim because they carry extra keys are read too.
    pub fn mint_fields(&self) -> Option<(&str, &str)> {
        match self {
            Payload::MintDegree {
                recipient_address,
                credential_ref,
            } => Some((recipient_address, credential_ref)),
            Payload::Other(value) if self.kind() == Some(MINT_DEGREE) => Some((
                value.get("recipient_address")?.as_str()?,
                value.get("ipfs_hash")?.as_str()?,
            )),
            _ => None,
        }
    }

    /// `new_validator_pubkey` of an ADD_VALIDATOR payload, typed or not.
    pub fn new_validator_pubkey(&self) -> Option<&str> {
        match self {
            Payload::AddValidator {
                new_validator_pubkey,
            } => Some(new_validator_pubkey),
            Payload::Other(value) if self.kind() == Some(ADD_VALIDATOR) => {
                value.get("new_validator_pubkey")?.as_str()
            }
            _ => None,
        }
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::MintDegree {
                recipient_address,
                credential_ref,
            } => json!({
                "type": MINT_DEGREE,
                "recipient_address": recipient_address,
                "ipfs_hash": credential_ref,
            }),
            Payload::AddValidator {
                new_validator_pubkey,
            } => json!({
                "type": ADD_VALIDATOR,
                "new_validator_pubkey": new_validator_pubkey,
            }),
            Payload::Other(value) => value,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Payload::Other(value);
        };
        let string_field = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_owned);
        // Only exact shapes are typed; anything else keeps its original bytes.
        let has_only = |keys: &[&str]| object.len() == keys.len() && keys.iter().all(|k| object.contains_key(*k));

        match object.get("type").and_then(Value::as_str) {
            Some(MINT_DEGREE) if has_only(&["type", "recipient_address", "ipfs_hash"]) => {
                match (string_field("recipient_address"), string_field("ipfs_hash")) {
                    (Some(recipient_address), Some(credential_ref)) => Payload::MintDegree {
                        recipient_address,
                        credential_ref,
                    },
                    _ => Payload::Other(value),
                }
            }
            Some(ADD_VALIDATOR) if has_only(&["type", "new_validator_pubkey"]) => {
                match string_field("new_validator_pubkey") {
                    Some(new_validator_pubkey) => Payload::AddValidator {
                        new_validator_pubkey,
                    },
                    None => Payload::Other(value),
                }
            }
            _ => Payload::Other(value),
        }
    }
}

/// The fields covered by both the transaction id and the signature.
#[derive(Serialize)]
struct SigningView<'a> {
    sender_pubkey: &'a str,
    recipient_address: &'a str,
    payload: &'a Payload,
    timestamp: u64,
}

/// A signed state-transition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub sender_pubkey: String,
    pub sender_address: Address,
    pub recipient_address: Address,
    pub payload: Payload,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Transaction {
    /// Builds an unsigned transaction stamped with the current time.
    pub fn new(
        sender_pubkey: impl Into<String>,
        recipient_address: impl Into<Address>,
        payload: Payload,
    ) -> Result<Self> {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        Self::with_timestamp(sender_pubkey, recipient_address, payload, timestamp)
    }

    pub fn with_timestamp(
        sender_pubkey: impl Into<String>,
        recipient_address: impl Into<Address>,
        payload: Payload,
        timestamp: u64,
    ) -> Result<Self> {
        let sender_pubkey = sender_pubkey.into();
        let sender_address = crypto::derive_address(&sender_pubkey)?;
        let mut tx = Transaction {
            tx_id: String::new(),
            sender_pubkey,
            sender_address,
            recipient_address: recipient_address.into(),
            payload,
            timestamp,
            signature: None,
        };
        tx.tx_id = tx.signable_message()?.sha256_hex();
        Ok(tx)
    }

    /// Canonical bytes of `{sender_pubkey, recipient_address, payload, timestamp}`.
    pub fn signable_message(&self) -> Result<CanonicalBytes> {
        CanonicalBytes::new(&SigningView {
            sender_pubkey: &self.sender_pubkey,
            recipient_address: &self.recipient_address,
            payload: &self.payload,
            timestamp: self.timestamp,
        })
    }

    pub fn sign(&mut self, secret_key_hex: &str) -> Result<()> {
        let keypair = KeyPair::from_secret_hex(secret_key_hex)?;
        self.sign_with(&keypair)
    }

    pub fn sign_with(&mut self, keypair: &KeyPair) -> Result<()> {
        let message = self.signable_message()?;
        self.signature = Some(keypair.sign(&message)?);
        Ok(())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self, max_size: usize) -> Result<()> {
        let size = CanonicalBytes::new(self)?.len();
        if size > max_size {
            return Err(ChainError::Validation(format!(
                "Transaction too large: {} bytes (max: {})",
                size, max_size
            )));
        }
        Ok(())
    }
}
