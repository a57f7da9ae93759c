use crate::blockchain::core::state::WorldState;
use crate::blockchain::core::validation::check_block;
use crate::canonical::CanonicalBytes;
use crate::contracts::{self, ContractHandler};
use crate::crypto::{self, KeyPair};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::scheduler::Scheduler;
use crate::transaction::{Transaction, MAX_TRANSACTION_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const GENESIS_PREV_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
/// Out-of-band marker standing in for the genesis authority signature.
pub const GENESIS_SIGNATURE: &str = "GENESIS_SIGNATURE";
/// 2023-01-01T00:00:00Z, so every node derives the same genesis digest.
pub const GENESIS_TIMESTAMP: u64 = 1672531200000;
/// Default maximum number of transactions pulled into one block.
pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// The fields covered by the block digest.
#[derive(Serialize)]
struct BlockHeaderView<'a> {
    height: u64,
    timestamp: u64,
    prev_digest: &'a str,
    authority_pubkey: &'a str,
    content_digest: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub prev_digest: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub authority_pubkey: String,
    #[serde(default)]
    pub authority_signature: Option<String>,
    pub content_digest: String,
    pub digest: String,
}

impl Block {
    pub fn new(
        height: u64,
        prev_digest: impl Into<String>,
        authority_pubkey: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Result<Self> {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        Self::with_timestamp(height, prev_digest, authority_pubkey, transactions, timestamp)
    }

    pub fn with_timestamp(
        height: u64,
        prev_digest: impl Into<String>,
        authority_pubkey: impl Into<String>,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Result<Self> {
        let mut block = Block {
            height,
            prev_digest: prev_digest.into(),
            timestamp,
            content_digest: Block::calculate_content_digest(&transactions),
            transactions,
            authority_pubkey: authority_pubkey.into(),
            authority_signature: None,
            digest: String::new(),
        };
        block.digest = block.recompute_digest()?;
        Ok(block)
    }

    /// Flat digest over the sorted transaction ids; not a Merkle tree.
    pub fn calculate_content_digest(transactions: &[Transaction]) -> String {
        let mut ids: Vec<&str> = transactions.iter().map(|tx| tx.tx_id.as_str()).collect();
        ids.sort_unstable();
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn recompute_content_digest(&self) -> String {
        Block::calculate_content_digest(&self.transactions)
    }

    pub fn recompute_digest(&self) -> Result<String> {
        let header = CanonicalBytes::new(&BlockHeaderView {
            height: self.height,
            timestamp: self.timestamp,
            prev_digest: &self.prev_digest,
            authority_pubkey: &self.authority_pubkey,
            content_digest: &self.content_digest,
        })?;
        Ok(header.sha256_hex())
    }

    /// The authority signs the digest, not the full block.
    pub fn signable_message(&self) -> Result<CanonicalBytes> {
        CanonicalBytes::new(&self.digest)
    }

    pub fn sign(&mut self, secret_key_hex: &str) -> Result<()> {
        self.sign_with(&KeyPair::from_secret_hex(secret_key_hex)?)
    }

    pub fn sign_with(&mut self, keypair: &KeyPair) -> Result<()> {
        let message = self.signable_message()?;
        self.authority_signature = Some(keypair.sign(&message)?);
        Ok(())
    }

    pub fn has_valid_signature(&self) -> bool {
        match (&self.authority_signature, self.signable_message()) {
            (Some(signature), Ok(message)) => {
                crypto::verify(&message, signature, &self.authority_pubkey)
            }
            _ => false,
        }
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.transactions.iter().any(|tx| tx.tx_id == tx_id)
    }
}

/// Everything needed to rebuild a [`Blockchain`], signatures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    pub mempool: Vec<Transaction>,
    pub authority_set: BTreeSet<String>,
    pub root_authority_pubkey: String,
    pub state: WorldState,
}

/// The single-writer ledger: chain, mempool, authority set and world state.
#[derive(Clone)]
pub struct Blockchain {
    pub(crate) chain: Vec<Block>,
    pub(crate) mempool: Mempool,
    pub(crate) authority_set: BTreeSet<String>,
    pub(crate) root_authority_pubkey: String,
    pub(crate) state: WorldState,
    /// Ids of every transaction already included in a block.
    included: HashSet<String>,
    scheduler: Arc<dyn Scheduler>,
    handlers: HashMap<&'static str, ContractHandler>,
    batch_limit: usize,
    max_transaction_size: usize,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("height", &self.chain.last().map(|b| b.height))
            .field("mempool", &self.mempool.len())
            .field("authority_set", &self.authority_set)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Blockchain {
    /// Creates an empty ledger. The root authority is always a member of the
    /// authority set. Call [`Blockchain::init_genesis`] before anything else.
    pub fn new(
        root_authority_pubkey: impl Into<String>,
        initial_authorities: impl IntoIterator<Item = String>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let root_authority_pubkey = root_authority_pubkey.into();
        let mut authority_set: BTreeSet<String> = initial_authorities.into_iter().collect();
        authority_set.insert(root_authority_pubkey.clone());

        Blockchain {
            chain: Vec::new(),
            mempool: Mempool::new(),
            authority_set,
            root_authority_pubkey,
            state: WorldState::new(),
            included: HashSet::new(),
            scheduler,
            handlers: contracts::default_handlers(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            max_transaction_size: MAX_TRANSACTION_SIZE,
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    pub fn with_max_transaction_size(mut self, max_transaction_size: usize) -> Self {
        self.max_transaction_size = max_transaction_size;
        self
    }

    /// Registers (or replaces) the handler for a payload discriminator.
    pub fn register_handler(&mut self, kind: &'static str, handler: ContractHandler) {
        self.handlers.insert(kind, handler);
    }

    /// Appends the height-0 block. Trusted by convention: its signature is a
    /// sentinel, not a verifiable signature.
    pub fn init_genesis(&mut self, authority_pubkey: impl Into<String>) -> Result<&Block> {
        if !self.chain.is_empty() {
            return Err(ChainError::Conflict(
                "Genesis block can only be applied to an empty chain.".to_string(),
            ));
        }
        let mut genesis = Block::with_timestamp(
            0,
            GENESIS_PREV_DIGEST,
            authority_pubkey,
            Vec::new(),
            GENESIS_TIMESTAMP,
        )?;
        genesis.authority_signature = Some(GENESIS_SIGNATURE.to_string());
        info!(digest = %genesis.digest, "genesis block created");
        self.chain.push(genesis);
        Ok(&self.chain[0])
    }

    pub fn is_initialized(&self) -> bool {
        !self.chain.is_empty()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Height of the tip, or `None` before genesis.
    pub fn height(&self) -> Option<u64> {
        self.chain.last().map(|b| b.height)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn block_at(&self, height: u64) -> Result<&Block> {
        self.chain
            .get(height as usize)
            .ok_or_else(|| ChainError::NotFound(format!("No block at height {}", height)))
    }

    /// Finds an included transaction and the height of its block.
    pub fn find_transaction(&self, tx_id: &str) -> Result<(u64, &Transaction)> {
        self.chain
            .iter()
            .find_map(|block| {
                block
                    .transactions
                    .iter()
                    .find(|tx| tx.tx_id == tx_id)
                    .map(|tx| (block.height, tx))
            })
            .ok_or_else(|| ChainError::NotFound(format!("Transaction {} not in chain", tx_id)))
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Pending transaction ids in admission order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.mempool.ids().cloned().collect()
    }

    pub fn authority_set(&self) -> &BTreeSet<String> {
        &self.authority_set
    }

    pub fn is_authority(&self, pubkey: &str) -> bool {
        self.authority_set.contains(pubkey)
    }

    pub fn root_authority_pubkey(&self) -> &str {
        &self.root_authority_pubkey
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    pub fn expected_authority(&self, height: u64) -> Option<String> {
        self.scheduler
            .expected_authority(height, &self.authority_set)
    }

    /// Admits a transaction iff it is validly signed, within the size limit,
    /// not already pooled and not already included. Rejection is not an error.
    pub fn submit_transaction(&mut self, tx: Transaction) -> bool {
        if !self.is_initialized() {
            warn!(tx_id = %tx.tx_id, "transaction rejected: ledger has no genesis block");
            return false;
        }
        if let Err(e) = tx.validate_signature() {
            debug!(tx_id = %tx.tx_id, error = %e, "transaction rejected");
            return false;
        }
        if let Err(e) = tx.validate_size(self.max_transaction_size) {
            debug!(tx_id = %tx.tx_id, error = %e, "transaction rejected");
            return false;
        }
        if self.is_included(&tx.tx_id) {
            debug!(tx_id = %tx.tx_id, "transaction rejected: already included in a block");
            return false;
        }
        let tx_id = tx.tx_id.clone();
        let admitted = self.mempool.add_transaction(tx);
        if admitted {
            debug!(tx_id = %tx_id, pending = self.mempool.len(), "transaction admitted");
        } else {
            debug!(tx_id = %tx_id, "transaction already pooled");
        }
        admitted
    }

    /// True iff the transaction has been included in some block.
    pub fn is_included(&self, tx_id: &str) -> bool {
        self.included.contains(tx_id)
    }

    /// True iff `block` may extend the current tip.
    pub fn validate_block(&self, block: &Block) -> bool {
        self.check_next_block(block).is_ok()
    }

    fn check_next_block(&self, block: &Block) -> Result<()> {
        let last = self
            .last_block()
            .ok_or_else(|| ChainError::Validation("Ledger has no genesis block".to_string()))?;
        check_block(block, last, self.expected_authority(block.height).as_deref())?;
        check_no_replay(block, &self.included)
    }

    /// Builds, signs and appends the next block if `secret_key_hex` belongs to
    /// the authority scheduled for the next height.
    pub fn mine_block(&mut self, secret_key_hex: &str) -> Option<Block> {
        match KeyPair::from_secret_hex(secret_key_hex) {
            Ok(keypair) => self.mine_block_with(&keypair),
            Err(e) => {
                warn!(error = %e, "cannot mine: invalid authority key");
                None
            }
        }
    }

    pub fn mine_block_with(&mut self, keypair: &KeyPair) -> Option<Block> {
        let authority_pubkey = keypair.public_key_hex();
        let last = self.last_block()?;
        let next_height = last.height + 1;
        let prev_digest = last.digest.clone();

        if self.expected_authority(next_height).as_deref() != Some(authority_pubkey.as_str()) {
            debug!(height = next_height, "not this authority's turn to produce a block");
            return None;
        }

        let transactions = self.mempool.oldest(self.batch_limit);
        let mut block = match Block::new(next_height, prev_digest, authority_pubkey, transactions) {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "failed to build block");
                return None;
            }
        };
        if let Err(e) = block.sign_with(keypair) {
            warn!(error = %e, "failed to sign block");
            return None;
        }

        if self.append_block(block.clone()) {
            Some(block)
        } else {
            None
        }
    }

    /// Validates and appends `block`, then executes its transactions in order.
    ///
    /// Inclusion is final: a transaction whose handler rejects it stays
    /// recorded in the block but leaves no state change, and it is removed
    /// from the mempool either way. Returns `true` once the block is appended.
    pub fn append_block(&mut self, block: Block) -> bool {
        if let Err(e) = self.check_next_block(&block) {
            warn!(height = block.height, error = %e, "block rejected");
            return false;
        }

        let transactions = block.transactions.clone();
        info!(
            height = block.height,
            digest = %block.digest,
            transactions = transactions.len(),
            "block appended"
        );
        self.chain.push(block);

        self.included
            .extend(transactions.iter().map(|tx| tx.tx_id.clone()));
        for tx in &transactions {
            let applied = self.execute(tx);
            debug!(tx_id = %tx.tx_id, applied, "transaction executed");
            self.mempool.remove_transaction(&tx.tx_id);
        }
        true
    }

    /// Dispatches `tx` to the handler for its payload kind. Unknown kinds and
    /// handler failures both yield `false`; neither ever aborts processing.
    pub fn execute(&mut self, tx: &Transaction) -> bool {
        let handler = tx
            .payload
            .kind()
            .and_then(|kind| self.handlers.get(kind).copied());
        let Some(handler) = handler else {
            warn!(tx_id = %tx.tx_id, kind = ?tx.payload.kind(), "no contract handler for payload");
            return false;
        };
        match handler(self, tx) {
            Ok(()) => true,
            Err(e) => {
                warn!(tx_id = %tx.tx_id, error = %e, "contract rejected transaction");
                false
            }
        }
    }

    /// Re-verifies linkage, digests and signatures of the whole chain.
    /// Genesis is trusted by its sentinel; historical schedule membership is
    /// not re-derived since the authority set may have changed since.
    pub fn validate_chain(&self) -> Result<()> {
        let genesis = self
            .chain
            .first()
            .ok_or_else(|| ChainError::Validation("Chain is empty".to_string()))?;
        if genesis.height != 0 || genesis.prev_digest != GENESIS_PREV_DIGEST {
            return Err(ChainError::Validation("Malformed genesis block".to_string()));
        }
        if genesis.recompute_digest()? != genesis.digest {
            return Err(ChainError::Validation("Genesis digest mismatch".to_string()));
        }
        let mut included = HashSet::new();
        for pair in self.chain.windows(2) {
            let (prev, block) = (&pair[0], &pair[1]);
            check_block(block, prev, Some(block.authority_pubkey.as_str()))?;
            check_no_replay(block, &included)?;
            included.extend(block.transactions.iter().map(|tx| tx.tx_id.clone()));
        }
        Ok(())
    }

    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            mempool: self.mempool.transactions(),
            authority_set: self.authority_set.clone(),
            root_authority_pubkey: self.root_authority_pubkey.clone(),
            state: self.state.clone(),
        }
    }

    /// Rebuilds a ledger from a snapshot, re-validating the chain first.
    pub fn from_snapshot(snapshot: LedgerSnapshot, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        let mut ledger = Blockchain::new(
            snapshot.root_authority_pubkey,
            snapshot.authority_set,
            scheduler,
        );
        ledger.chain = snapshot.chain;
        ledger.validate_chain()?;
        ledger.included = ledger
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.tx_id.clone()))
            .collect();
        ledger.state = snapshot.state;
        for tx in snapshot.mempool {
            if !tx.is_valid() || ledger.is_included(&tx.tx_id) {
                warn!(tx_id = %tx.tx_id, "dropping stale or invalid pending transaction from snapshot");
                continue;
            }
            ledger.mempool.add_transaction(tx);
        }
        Ok(ledger)
    }
}

/// A block may not carry a transaction twice, nor one already on chain.
fn check_no_replay(block: &Block, included: &HashSet<String>) -> Result<()> {
    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if included.contains(&tx.tx_id) || !seen.insert(tx.tx_id.as_str()) {
            return Err(ChainError::Validation(format!(
                "Transaction {} in block {} was already included",
                tx.tx_id, block.height
            )));
        }
    }
    Ok(())
}
