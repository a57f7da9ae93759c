use crate::crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-address record of the credentials minted to it on-chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub credential_refs: Vec<String>,
}

/// An on-chain credential asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub owner: Address,
    /// Off-chain document reference the credential was minted against.
    pub payload_hash: String,
    /// Public key of the authority that minted it.
    pub issued_by: String,
}

/// Key-value state mutated by contract handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    pub accounts: BTreeMap<Address, Account>,
    pub assets: BTreeMap<String, Asset>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_asset(&self, credential_ref: &str) -> bool {
        self.assets.contains_key(credential_ref)
    }

    pub fn asset(&self, credential_ref: &str) -> Option<&Asset> {
        self.assets.get(credential_ref)
    }

    /// Credential refs held by `address`, in mint order.
    pub fn credentials_of(&self, address: &str) -> &[String] {
        self.accounts
            .get(address)
            .map(|account| account.credential_refs.as_slice())
            .unwrap_or(&[])
    }

    /// Writes the asset and links it to the owner's account, creating the
    /// account on first use. Both maps change together.
    pub fn record_credential(&mut self, credential_ref: String, asset: Asset) {
        let account = self.accounts.entry(asset.owner.clone()).or_default();
        if !account.credential_refs.contains(&credential_ref) {
            account.credential_refs.push(credential_ref.clone());
        }
        self.assets.insert(credential_ref, asset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creates_account() {
        let mut state = WorldState::new();
        assert!(state.credentials_of("0xabc").is_empty());

        state.record_credential(
            "EDU-1".to_string(),
            Asset {
                owner: "0xabc".to_string(),
                payload_hash: "Qm".to_string(),
                issued_by: "pk".to_string(),
            },
        );
        state.record_credential(
            "EDU-2".to_string(),
            Asset {
                owner: "0xabc".to_string(),
                payload_hash: "Qm2".to_string(),
                issued_by: "pk".to_string(),
            },
        );

        assert_eq!(state.credentials_of("0xabc"), ["EDU-1", "EDU-2"]);
        assert_eq!(state.asset("EDU-2").unwrap().payload_hash, "Qm2");
    }
}
