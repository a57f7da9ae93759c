//! Academic credential tokens.

use crate::canonical::CanonicalBytes;
use crate::crypto::{self, Address, KeyPair};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Descriptive fields of a diploma or certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub student_id: String,
    pub degree_type: String,
    pub document_url: String,
    /// Hash of the off-chain document (e.g. the diploma PDF).
    pub document_hash: String,
    pub institution: String,
    /// RFC 3339 issue time.
    pub issued_at: String,
}

impl CredentialMetadata {
    /// Builds metadata stamped with the current UTC time.
    pub fn new(
        student_id: impl Into<String>,
        degree_type: impl Into<String>,
        document_url: impl Into<String>,
        document_hash: impl Into<String>,
        institution: impl Into<String>,
    ) -> Self {
        CredentialMetadata {
            student_id: student_id.into(),
            degree_type: degree_type.into(),
            document_url: document_url.into(),
            document_hash: document_hash.into(),
            institution: institution.into(),
            issued_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_issued_at(mut self, issued_at: impl Into<String>) -> Self {
        self.issued_at = issued_at.into();
        self
    }
}

#[derive(Serialize)]
struct TokenSigningView<'a> {
    token_id: &'a str,
    metadata: &'a CredentialMetadata,
    issuer_pubkey: &'a str,
    recipient_address: &'a str,
    minted_at: &'a str,
}

/// A signed, revocable credential held by an address.
///
/// `recipient_address` is the address the credential was issued to and is
/// covered by the issuer's signature; `owner_address` is the current holder
/// and changes on transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    pub token_id: String,
    pub metadata: CredentialMetadata,
    pub issuer_pubkey: String,
    pub recipient_address: Address,
    pub owner_address: Address,
    pub minted_at: String,
    #[serde(default)]
    pub issuer_signature: Option<String>,
    #[serde(default)]
    pub revoked: bool,
    /// Derived: `false` unless not revoked and a verifying signature is present.
    #[serde(default)]
    pub valid: bool,
}

impl CredentialToken {
    /// `SHA-256(student_id | issued_at | recipient_address)`.
    pub fn derive_token_id(metadata: &CredentialMetadata, recipient_address: &str) -> String {
        let seed = format!(
            "{}|{}|{}",
            metadata.student_id, metadata.issued_at, recipient_address
        );
        crypto::sha256_hex(seed.as_bytes())
    }

    /// An unsigned token; `valid` stays false until it is signed.
    pub fn new(
        metadata: CredentialMetadata,
        issuer_pubkey: impl Into<String>,
        recipient_address: impl Into<Address>,
    ) -> Self {
        let recipient_address = recipient_address.into();
        CredentialToken {
            token_id: Self::derive_token_id(&metadata, &recipient_address),
            metadata,
            issuer_pubkey: issuer_pubkey.into(),
            owner_address: recipient_address.clone(),
            recipient_address,
            minted_at: chrono::Utc::now().to_rfc3339(),
            issuer_signature: None,
            revoked: false,
            valid: false,
        }
    }

    pub fn signable_message(&self) -> Result<CanonicalBytes> {
        CanonicalBytes::new(&TokenSigningView {
            token_id: &self.token_id,
            metadata: &self.metadata,
            issuer_pubkey: &self.issuer_pubkey,
            recipient_address: &self.recipient_address,
            minted_at: &self.minted_at,
        })
    }

    pub fn sign(&mut self, issuer_secret_hex: &str) -> Result<()> {
        self.sign_with(&KeyPair::from_secret_hex(issuer_secret_hex)?)
    }

    pub fn sign_with(&mut self, issuer: &KeyPair) -> Result<()> {
        let message = self.signable_message()?;
        self.issuer_signature = Some(issuer.sign(&message)?);
        self.refresh_validity();
        Ok(())
    }

    /// True iff a signature is present and verifies under `issuer_pubkey`.
    /// Independent of revocation.
    pub fn verify_signature(&self) -> bool {
        match (&self.issuer_signature, self.signable_message()) {
            (Some(signature), Ok(message)) => {
                crypto::verify(&message, signature, &self.issuer_pubkey)
            }
            _ => false,
        }
    }

    /// Terminal: there is no way back.
    pub fn revoke(&mut self) {
        self.revoked = true;
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        !self.revoked && self.verify_signature()
    }

    pub(crate) fn refresh_validity(&mut self) {
        self.valid = self.is_valid();
    }
}
