//! Single-writer node: the ledger and the credential registry behind one lock.
//!
//! Every mutating entry point takes the write lock for its whole duration, so
//! a block append (validation, execution of each transaction, mempool purge)
//! is observed from outside either not at all or completely. Queries share
//! the read lock.

use crate::blockchain::{Block, Blockchain, LedgerSnapshot};
use crate::config::Config;
use crate::credential::{CredentialMetadata, CredentialToken};
use crate::crypto::KeyPair;
use crate::error::{ChainError, Result};
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use crate::registry::{CredentialRegistry, RegistrySnapshot, VerificationReport};
use crate::scheduler::Scheduler;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LedgerState {
    pub chain: Blockchain,
    pub registry: CredentialRegistry,
}

pub struct Node {
    state: RwLock<LedgerState>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl Node {
    pub fn new(chain: Blockchain, registry: CredentialRegistry) -> Self {
        Node {
            state: RwLock::new(LedgerState { chain, registry }),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Opens the configured store, falling back to in-memory persistence when
    /// the database is disabled or cannot be opened.
    pub fn open_persistence(config: &Config) -> Arc<dyn Persistence> {
        if !config.database.enabled {
            return Arc::new(InMemoryPersistence::new());
        }
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Failed to create data dir {:?}: {}", parent, e);
                }
            }
        }
        match Database::open(&config.database.path) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                    config.database.path, e
                );
                Arc::new(InMemoryPersistence::new())
            }
        }
    }

    /// Restores ledger and registry from `persistence`. The registry falls
    /// back to an empty one owned by the root authority when none was saved.
    pub fn restore(
        persistence: Arc<dyn Persistence>,
        scheduler: Arc<dyn Scheduler>,
        config: &Config,
    ) -> Result<Self> {
        let ledger = persistence
            .load_ledger()?
            .ok_or_else(|| ChainError::NotFound("No ledger snapshot stored".to_string()))?;
        let chain = Blockchain::from_snapshot(ledger, scheduler)?
            .with_batch_limit(config.ledger.batch_limit)
            .with_max_transaction_size(config.ledger.max_transaction_size);
        let registry = match persistence.load_registry()? {
            Some(snapshot) => CredentialRegistry::from_snapshot(snapshot)?,
            None => CredentialRegistry::new(chain.root_authority_pubkey()),
        };
        info!(
            height = ?chain.height(),
            credentials = registry.len(),
            "node restored from persistence"
        );
        Ok(Node::new(chain, registry).with_persistence(persistence))
    }

    pub fn submit_transaction(&self, tx: Transaction) -> bool {
        self.state.write().chain.submit_transaction(tx)
    }

    /// Mines the next block as `authority` and persists it.
    pub fn mine_block(&self, authority: &KeyPair) -> Option<Block> {
        let mut state = self.state.write();
        let block = state.chain.mine_block_with(authority)?;
        self.persist_ledger(&state.chain);
        Some(block)
    }

    pub fn append_block(&self, block: Block) -> bool {
        let mut state = self.state.write();
        let appended = state.chain.append_block(block);
        if appended {
            self.persist_ledger(&state.chain);
        }
        appended
    }

    pub fn mint(
        &self,
        metadata: CredentialMetadata,
        issuer_pubkey: &str,
        issuer_secret_hex: &str,
        recipient_address: &str,
    ) -> Result<CredentialToken> {
        let mut state = self.state.write();
        let token = state
            .registry
            .mint(metadata, issuer_pubkey, issuer_secret_hex, recipient_address)?;
        self.persist_registry(&state.registry);
        Ok(token)
    }

    pub fn transfer(&self, token_id: &str, from_address: &str, to_address: &str) -> Result<bool> {
        let mut state = self.state.write();
        let moved = state.registry.transfer(token_id, from_address, to_address)?;
        if moved {
            self.persist_registry(&state.registry);
        }
        Ok(moved)
    }

    pub fn revoke(&self, token_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let revoked = state.registry.revoke(token_id)?;
        if revoked {
            self.persist_registry(&state.registry);
        }
        Ok(revoked)
    }

    pub fn verify(&self, token_id: &str) -> Result<VerificationReport> {
        self.state.read().registry.verify(token_id)
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.state.read().registry.balance(address)
    }

    pub fn height(&self) -> Option<u64> {
        self.state.read().chain.height()
    }

    pub fn last_block(&self) -> Option<Block> {
        self.state.read().chain.last_block().cloned()
    }

    pub fn mempool_len(&self) -> usize {
        self.state.read().chain.mempool_len()
    }

    /// Runs `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn snapshot(&self) -> (LedgerSnapshot, RegistrySnapshot) {
        let state = self.state.read();
        (state.chain.to_snapshot(), state.registry.to_snapshot())
    }

    /// Writes both snapshots in one step; errors are returned, not logged.
    pub fn persist(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let (ledger, registry) = self.snapshot();
        persistence.save_state(&ledger, &registry)
    }

    // A failed write must not undo an in-memory state change that other
    // readers may already have observed.
    fn persist_ledger(&self, chain: &Blockchain) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_ledger(&chain.to_snapshot()) {
                error!("Failed to persist ledger: {}", e);
            }
        }
    }

    fn persist_registry(&self, registry: &CredentialRegistry) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_registry(&registry.to_snapshot()) {
                error!("Failed to persist registry: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FixedScheduler;
    use crate::transaction::Payload;

    fn node(root: &KeyPair) -> Node {
        let mut chain = Blockchain::new(
            root.public_key_hex(),
            Vec::new(),
            Arc::new(FixedScheduler::new(root.public_key_hex())),
        );
        chain.init_genesis(root.public_key_hex()).unwrap();
        Node::new(chain, CredentialRegistry::new(root.public_key_hex()))
    }

    #[test]
    fn test_mine_through_node() {
        let root = KeyPair::generate().unwrap();
        let node = node(&root);
        let mut tx = Transaction::new(
            root.public_key_hex(),
            "0xstudent",
            Payload::mint_degree("0xstudent", "QmDiploma"),
        )
        .unwrap();
        tx.sign_with(&root).unwrap();

        assert!(node.submit_transaction(tx));
        assert_eq!(node.mempool_len(), 1);
        let block = node.mine_block(&root).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(node.height(), Some(1));
        assert_eq!(node.mempool_len(), 0);
        assert_eq!(
            node.read(|s| s.chain.state().credentials_of("0xstudent").len()),
            1
        );
    }

    #[test]
    fn test_registry_through_node() {
        let root = KeyPair::generate().unwrap();
        let node = node(&root);
        let meta = CredentialMetadata::new("s1", "BSc", "ipfs://x", "h", "Uni");
        let token = node
            .mint(meta, &root.public_key_hex(), &root.secret_key_hex(), "0xa")
            .unwrap();
        assert_eq!(node.balance("0xa"), 1);
        assert!(node.transfer(&token.token_id, "0xa", "0xb").unwrap());
        assert!(node.revoke(&token.token_id).unwrap());
        assert!(!node.verify(&token.token_id).unwrap().valid);
        assert_eq!(node.balance("0xb"), 0);
    }

    #[test]
    fn test_persist_and_restore() {
        let root = KeyPair::generate().unwrap();
        let store: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let node = node(&root).with_persistence(store.clone());
        node.mine_block(&root).unwrap();
        let meta = CredentialMetadata::new("s1", "BSc", "ipfs://x", "h", "Uni");
        let token = node
            .mint(meta, &root.public_key_hex(), &root.secret_key_hex(), "0xa")
            .unwrap();

        let restored = Node::restore(
            store,
            Arc::new(FixedScheduler::new(root.public_key_hex())),
            &Config::default(),
        )
        .unwrap();
        assert_eq!(restored.height(), Some(1));
        assert!(restored.verify(&token.token_id).unwrap().valid);
        assert_eq!(restored.balance("0xa"), 1);
    }

    #[test]
    fn test_persist_stores_genesis_and_both_snapshots() {
        let root = KeyPair::generate().unwrap();
        let db = Arc::new(Database::open(":memory:").unwrap());
        let node = node(&root).with_persistence(db.clone());
        let meta = CredentialMetadata::new("s1", "BSc", "ipfs://x", "h", "Uni");
        node.mint(meta, &root.public_key_hex(), &root.secret_key_hex(), "0xa")
            .unwrap();
        node.persist().unwrap();

        let (ledger, registry) = node.snapshot();
        assert_eq!(db.load_ledger().unwrap(), Some(ledger));
        assert_eq!(db.load_registry().unwrap(), Some(registry));
        let blocks = db.load_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].height, 0);
    }

    #[test]
    fn test_restore_without_snapshot() {
        let store: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let err = Node::restore(
            store,
            Arc::new(FixedScheduler::new("pk")),
            &Config::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChainError::NotFound(_)));
    }

    #[test]
    fn test_concurrent_readers_see_whole_blocks() {
        let root = KeyPair::generate().unwrap();
        let node = node(&root);
        for i in 0..5 {
            let mut tx = Transaction::with_timestamp(
                root.public_key_hex(),
                "0xstudent",
                Payload::mint_degree("0xstudent", format!("Qm{}", i)),
                1_700_000_000_000 + i,
            )
            .unwrap();
            tx.sign_with(&root).unwrap();
            node.submit_transaction(tx);
        }

        std::thread::scope(|scope| {
            scope.spawn(|| {
                node.mine_block(&root).unwrap();
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    let (pending, minted) = node.read(|s| {
                        (
                            s.chain.mempool_len(),
                            s.chain.state().credentials_of("0xstudent").len(),
                        )
                    });
                    assert!((pending, minted) == (5, 0) || (pending, minted) == (0, 5));
                });
            }
        });
    }
}
