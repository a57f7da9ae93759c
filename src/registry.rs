//! Credential registry: mint, transfer, revoke and verify credential tokens.
//!
//! Invariant: for every address, `balances[address]` equals the number of
//! unrevoked tokens whose `owner_address` is that address. Every mutating
//! operation checks all of its preconditions before it touches any field.

use crate::credential::{CredentialMetadata, CredentialToken};
use crate::crypto::{Address, KeyPair};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Revoked,
    BadSignature,
}

/// Public view of a credential. Never carries the issuer signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSummary {
    pub student_id: String,
    pub degree_type: String,
    pub document_url: String,
    pub document_hash: String,
    pub institution: String,
    pub issued_at: String,
    pub issuer_pubkey: String,
    pub recipient_address: Address,
    pub owner_address: Address,
    pub minted_at: String,
}

impl From<&CredentialToken> for CredentialSummary {
    fn from(token: &CredentialToken) -> Self {
        CredentialSummary {
            student_id: token.metadata.student_id.clone(),
            degree_type: token.metadata.degree_type.clone(),
            document_url: token.metadata.document_url.clone(),
            document_hash: token.metadata.document_hash.clone(),
            institution: token.metadata.institution.clone(),
            issued_at: token.metadata.issued_at.clone(),
            issuer_pubkey: token.issuer_pubkey.clone(),
            recipient_address: token.recipient_address.clone(),
            owner_address: token.owner_address.clone(),
            minted_at: token.minted_at.clone(),
        }
    }
}

/// Result of [`CredentialRegistry::verify`]; serializes to
/// `{"valid":false,"token_id":..,"reason":"revoked"}` or
/// `{"valid":true,"token_id":..,<public fields>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub token_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub owner_pubkey: String,
    pub total_supply: u64,
    #[serde(default)]
    pub balances: BTreeMap<Address, u64>,
    pub registry: BTreeMap<String, CredentialToken>,
    #[serde(default)]
    pub revoked_ids: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialRegistry {
    owner_pubkey: String,
    total_supply: u64,
    balances: BTreeMap<Address, u64>,
    registry: BTreeMap<String, CredentialToken>,
    revoked_ids: BTreeSet<String>,
}

impl CredentialRegistry {
    /// `owner_pubkey` is the only key allowed to mint.
    pub fn new(owner_pubkey: impl Into<String>) -> Self {
        CredentialRegistry {
            owner_pubkey: owner_pubkey.into(),
            total_supply: 0,
            balances: BTreeMap::new(),
            registry: BTreeMap::new(),
            revoked_ids: BTreeSet::new(),
        }
    }

    pub fn owner_pubkey(&self) -> &str {
        &self.owner_pubkey
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn revoked_ids(&self) -> &BTreeSet<String> {
        &self.revoked_ids
    }

    pub fn mint(
        &mut self,
        metadata: CredentialMetadata,
        issuer_pubkey: &str,
        issuer_secret_hex: &str,
        recipient_address: &str,
    ) -> Result<CredentialToken> {
        if issuer_pubkey != self.owner_pubkey {
            return Err(ChainError::Authorization(
                "Only the registry owner can mint credentials".to_string(),
            ));
        }
        let issuer = KeyPair::from_secret_hex(issuer_secret_hex)?;
        if issuer.public_key_hex() != issuer_pubkey {
            return Err(ChainError::Authorization(
                "Signing key does not belong to the issuer".to_string(),
            ));
        }

        let mut token = CredentialToken::new(metadata, issuer_pubkey, recipient_address);
        if self.registry.contains_key(&token.token_id) {
            return Err(ChainError::Conflict(format!(
                "Credential {} already exists",
                token.token_id
            )));
        }
        token.sign_with(&issuer)?;

        self.registry.insert(token.token_id.clone(), token.clone());
        self.total_supply += 1;
        *self
            .balances
            .entry(recipient_address.to_string())
            .or_insert(0) += 1;

        info!(
            token_id = %token.token_id,
            recipient = %recipient_address,
            degree = %token.metadata.degree_type,
            "credential minted"
        );
        Ok(token)
    }

    pub fn transfer(&mut self, token_id: &str, from_address: &str, to_address: &str) -> Result<bool> {
        let token = self
            .registry
            .get(token_id)
            .ok_or_else(|| ChainError::NotFound(format!("Credential {} does not exist", token_id)))?;
        if token.revoked {
            return Err(ChainError::Validation(format!(
                "Credential {} has been revoked",
                token_id
            )));
        }
        if token.owner_address != from_address {
            return Err(ChainError::Authorization(format!(
                "{} does not own credential {}",
                from_address, token_id
            )));
        }
        if self.balance(from_address) == 0 {
            return Err(ChainError::Validation(format!(
                "{} has no credential balance to transfer",
                from_address
            )));
        }

        // Owner field and balance table change together.
        if let Some(balance) = self.balances.get_mut(from_address) {
            *balance -= 1;
        }
        *self.balances.entry(to_address.to_string()).or_insert(0) += 1;
        if let Some(token) = self.registry.get_mut(token_id) {
            token.owner_address = to_address.to_string();
        }

        info!(token_id = %token_id, from = %from_address, to = %to_address, "credential transferred");
        Ok(true)
    }

    /// Revokes a credential. Returns `Ok(false)` if it was already revoked.
    pub fn revoke(&mut self, token_id: &str) -> Result<bool> {
        let token = self
            .registry
            .get_mut(token_id)
            .ok_or_else(|| ChainError::NotFound(format!("Credential {} not found", token_id)))?;
        if token.revoked {
            return Ok(false);
        }

        token.revoke();
        let owner = token.owner_address.clone();
        self.revoked_ids.insert(token_id.to_string());
        if let Some(balance) = self.balances.get_mut(&owner) {
            if *balance > 0 {
                *balance -= 1;
            }
        }

        info!(token_id = %token_id, owner = %owner, "credential revoked");
        Ok(true)
    }

    pub fn verify(&self, token_id: &str) -> Result<VerificationReport> {
        let token = self
            .registry
            .get(token_id)
            .ok_or_else(|| ChainError::NotFound(format!("Credential {} does not exist", token_id)))?;

        let reason = if token.revoked {
            Some(InvalidReason::Revoked)
        } else if !token.verify_signature() {
            Some(InvalidReason::BadSignature)
        } else {
            None
        };

        Ok(VerificationReport {
            valid: reason.is_none(),
            token_id: token_id.to_string(),
            reason,
            credential: reason.is_none().then(|| CredentialSummary::from(token)),
        })
    }

    /// Active credential count for `address`; 0 for unknown addresses.
    pub fn balance(&self, address: &str) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn get(&self, token_id: &str) -> Option<&CredentialToken> {
        self.registry.get(token_id)
    }

    /// Unrevoked tokens currently held by `address`.
    pub fn tokens_of(&self, address: &str) -> Vec<&CredentialToken> {
        self.registry
            .values()
            .filter(|token| token.owner_address == address && !token.revoked)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Recomputes balances from token ownership.
    pub fn rebuild_balances(&mut self) {
        self.balances.clear();
        for token in self.registry.values().filter(|t| !t.revoked) {
            *self.balances.entry(token.owner_address.clone()).or_insert(0) += 1;
        }
    }

    pub fn to_snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            owner_pubkey: self.owner_pubkey.clone(),
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            registry: self.registry.clone(),
            revoked_ids: self.revoked_ids.clone(),
        }
    }

    /// Rebuilds a registry. Derived fields (`valid`, balances, the revoked
    /// set) are recomputed from the tokens rather than trusted.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self> {
        let mut registry = CredentialRegistry::new(snapshot.owner_pubkey);

        for (token_id, mut token) in snapshot.registry {
            if token_id != token.token_id {
                return Err(ChainError::Validation(format!(
                    "Registry key {} does not match token id {}",
                    token_id, token.token_id
                )));
            }
            if snapshot.revoked_ids.contains(&token_id) {
                token.revoked = true;
            }
            if token.revoked {
                registry.revoked_ids.insert(token_id.clone());
            }
            token.refresh_validity();
            registry.registry.insert(token_id, token);
        }

        registry.rebuild_balances();
        let stored_nonzero = snapshot.balances.iter().filter(|(_, count)| **count > 0);
        if !stored_nonzero.eq(registry.balances.iter()) {
            warn!("snapshot balances disagree with token ownership; using recomputed balances");
        }

        let minted = registry.registry.len() as u64;
        registry.total_supply = snapshot.total_supply.max(minted);
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Fixture {
        owner: KeyPair,
        registry: CredentialRegistry,
    }

    fn fixture() -> Fixture {
        let owner = KeyPair::generate().unwrap();
        let registry = CredentialRegistry::new(owner.public_key_hex());
        Fixture { owner, registry }
    }

    fn metadata(student_id: &str) -> CredentialMetadata {
        CredentialMetadata::new(
            student_id,
            "Bachelor",
            "ipfs://QmExample123",
            "abc123def456",
            "FPT University",
        )
    }

    fn mint(f: &mut Fixture, student_id: &str, recipient: &str) -> CredentialToken {
        let pk = f.owner.public_key_hex();
        let sk = f.owner.secret_key_hex();
        f.registry
            .mint(metadata(student_id), &pk, &sk, recipient)
            .unwrap()
    }

    fn assert_balances_match_ownership(registry: &CredentialRegistry, addresses: &[&str]) {
        for address in addresses {
            assert_eq!(
                registry.balance(address),
                registry.tokens_of(address).len() as u64,
                "balance drift for {}",
                address
            );
        }
    }

    #[test]
    fn test_mint_by_owner() {
        let mut f = fixture();
        let token = mint(&mut f, "20210001", "0xalice");
        assert_eq!(f.registry.total_supply(), 1);
        assert_eq!(f.registry.balance("0xalice"), 1);
        assert!(token.valid);
        assert!(f.registry.get(&token.token_id).is_some());
    }

    #[test]
    fn test_mint_by_stranger_is_forbidden() {
        let mut f = fixture();
        let stranger = KeyPair::generate().unwrap();
        let err = f
            .registry
            .mint(
                metadata("1"),
                &stranger.public_key_hex(),
                &stranger.secret_key_hex(),
                "0xalice",
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(f.registry.total_supply(), 0);
        assert_eq!(f.registry.balance("0xalice"), 0);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_mint_with_mismatched_secret() {
        let mut f = fixture();
        let stranger = KeyPair::generate().unwrap();
        let pk = f.owner.public_key_hex();
        let err = f
            .registry
            .mint(metadata("1"), &pk, &stranger.secret_key_hex(), "0xalice")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_duplicate_token_id_conflicts() {
        let mut f = fixture();
        let pk = f.owner.public_key_hex();
        let sk = f.owner.secret_key_hex();
        let meta = metadata("20210001").with_issued_at("2024-01-01T00:00:00+00:00");
        f.registry.mint(meta.clone(), &pk, &sk, "0xalice").unwrap();
        let err = f.registry.mint(meta, &pk, &sk, "0xalice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.registry.total_supply(), 1);
        assert_eq!(f.registry.balance("0xalice"), 1);
    }

    #[test]
    fn test_transfer_moves_owner_and_balance() {
        let mut f = fixture();
        let token = mint(&mut f, "1", "0xalice");
        assert!(f.registry.transfer(&token.token_id, "0xalice", "0xbob").unwrap());

        assert_eq!(f.registry.balance("0xalice"), 0);
        assert_eq!(f.registry.balance("0xbob"), 1);
        let stored = f.registry.get(&token.token_id).unwrap();
        assert_eq!(stored.owner_address, "0xbob");
        assert_eq!(stored.recipient_address, "0xalice");
        assert!(f.registry.verify(&token.token_id).unwrap().valid);
        assert_balances_match_ownership(&f.registry, &["0xalice", "0xbob"]);
    }

    #[test]
    fn test_transfer_by_non_owner_is_forbidden() {
        let mut f = fixture();
        let token = mint(&mut f, "1", "0xalice");
        let err = f
            .registry
            .transfer(&token.token_id, "0xmallory", "0xbob")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(f.registry.balance("0xalice"), 1);
        assert_eq!(f.registry.balance("0xmallory"), 0);
        assert_eq!(f.registry.balance("0xbob"), 0);
        assert_eq!(
            f.registry.get(&token.token_id).unwrap().owner_address,
            "0xalice"
        );
    }

    #[test]
    fn test_transfer_unknown_and_revoked() {
        let mut f = fixture();
        assert_eq!(
            f.registry.transfer("nope", "0xa", "0xb").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let token = mint(&mut f, "1", "0xalice");
        f.registry.revoke(&token.token_id).unwrap();
        assert_eq!(
            f.registry
                .transfer(&token.token_id, "0xalice", "0xbob")
                .unwrap_err()
                .kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_revoke_then_verify() {
        let mut f = fixture();
        let token = mint(&mut f, "1", "0xalice");
        assert!(f.registry.revoke(&token.token_id).unwrap());
        assert!(!f.registry.revoke(&token.token_id).unwrap());

        let report = f.registry.verify(&token.token_id).unwrap();
        assert!(!report.valid);
        assert_eq!(report.reason, Some(InvalidReason::Revoked));
        assert!(report.credential.is_none());
        assert_eq!(f.registry.balance("0xalice"), 0);
        assert_eq!(f.registry.total_supply(), 1);
        assert!(f.registry.revoked_ids().contains(&token.token_id));
        assert_balances_match_ownership(&f.registry, &["0xalice"]);

        assert_eq!(
            f.registry.revoke("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_bad_signature_is_distinguished() {
        let mut f = fixture();
        let token = mint(&mut f, "1", "0xalice");
        let mut snapshot = f.registry.to_snapshot();
        snapshot
            .registry
            .get_mut(&token.token_id)
            .unwrap()
            .metadata
            .degree_type = "PhD".to_string();
        let tampered = CredentialRegistry::from_snapshot(snapshot).unwrap();

        let report = tampered.verify(&token.token_id).unwrap();
        assert!(!report.valid);
        assert_eq!(report.reason, Some(InvalidReason::BadSignature));
        assert!(!tampered.get(&token.token_id).unwrap().valid);
    }

    #[test]
    fn test_verify_report_shape() {
        let mut f = fixture();
        let token = mint(&mut f, "20210002", "0xalice");
        let value = serde_json::to_value(f.registry.verify(&token.token_id).unwrap()).unwrap();
        assert_eq!(value["valid"], true);
        assert_eq!(value["student_id"], "20210002");
        assert_eq!(value["owner_address"], "0xalice");
        assert!(value.get("issuer_signature").is_none());
        assert!(value.get("reason").is_none());

        f.registry.revoke(&token.token_id).unwrap();
        let value = serde_json::to_value(f.registry.verify(&token.token_id).unwrap()).unwrap();
        assert_eq!(value["valid"], false);
        assert_eq!(value["reason"], "revoked");

        assert_eq!(
            f.registry.verify("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_unknown_address_balance() {
        let f = fixture();
        assert_eq!(f.registry.balance("0xnobody"), 0);
    }

    #[test]
    fn test_snapshot_recomputes_derived_fields() {
        let mut f = fixture();
        let a = mint(&mut f, "1", "0xalice");
        let b = mint(&mut f, "2", "0xalice");
        f.registry.transfer(&b.token_id, "0xalice", "0xbob").unwrap();
        f.registry.revoke(&a.token_id).unwrap();

        let mut snapshot = f.registry.to_snapshot();
        snapshot.balances.insert("0xalice".to_string(), 7);
        for token in snapshot.registry.values_mut() {
            token.valid = true;
        }
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored =
            CredentialRegistry::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.balance("0xalice"), 0);
        assert_eq!(restored.balance("0xbob"), 1);
        assert_eq!(restored.total_supply(), 2);
        assert!(!restored.get(&a.token_id).unwrap().valid);
        assert!(restored.get(&b.token_id).unwrap().valid);
        assert!(restored.verify(&b.token_id).unwrap().valid);
    }
}
