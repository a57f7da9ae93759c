//! Database persistence layer for EduChain
//!
//! Blocks are stored one row per height for inspection; the authoritative
//! restore path is the pair of ledger/registry snapshots.

use crate::blockchain::{Block, LedgerSnapshot};
use crate::error::{ChainError, Result};
use crate::registry::RegistrySnapshot;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const LEDGER_KEY: &str = "ledger";
const REGISTRY_KEY: &str = "registry";

/// Abstraction for persistence backends. Implementations should provide
/// atomic saving/loading of ledger and registry state.
pub trait Persistence: Send + Sync {
    fn save_block(&self, block: &Block) -> Result<()>;
    fn load_blocks(&self) -> Result<Vec<Block>>;
    /// Saves the ledger snapshot together with every block not yet stored.
    fn save_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()>;
    fn load_ledger(&self) -> Result<Option<LedgerSnapshot>>;
    fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()>;
    fn load_registry(&self) -> Result<Option<RegistrySnapshot>>;
    /// Saves a ledger/registry pair so that readers never load one without the other.
    fn save_state(&self, ledger: &LedgerSnapshot, registry: &RegistrySnapshot) -> Result<()>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::Database("Mutex poisoned".to_string())
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                digest TEXT NOT NULL,
                prev_digest TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                authority_pubkey TEXT NOT NULL,
                content_digest TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::Database(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::Database(format!("Failed to create snapshots table: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn insert_block(conn: &Connection, block: &Block) -> Result<()> {
        let body = serde_json::to_string(block)?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (height, digest, prev_digest, timestamp, authority_pubkey, content_digest, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                block.height as i64,
                block.digest,
                block.prev_digest,
                block.timestamp as i64,
                block.authority_pubkey,
                block.content_digest,
                body,
            ],
        )
        .map_err(|e| ChainError::Database(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    /// Inserts the blocks above the highest stored height.
    fn insert_missing_blocks(conn: &Connection, chain: &[Block]) -> Result<()> {
        let stored: Option<i64> = conn
            .query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))
            .map_err(|e| ChainError::Database(format!("Failed to read block height: {}", e)))?;
        for block in chain
            .iter()
            .filter(|b| stored.map_or(true, |h| b.height as i64 > h))
        {
            Database::insert_block(conn, block)?;
        }
        Ok(())
    }

    fn put_snapshot(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| ChainError::Database(format!("Failed to save {} snapshot: {}", key, e)))?;
        Ok(())
    }

    fn get_snapshot(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl Persistence for Database {
    fn save_block(&self, block: &Block) -> Result<()> {
        let conn = self.conn.lock().map_err(poisoned)?;
        Database::insert_block(&conn, block)
    }

    fn load_blocks(&self) -> Result<Vec<Block>> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn
            .prepare("SELECT body FROM blocks ORDER BY height ASC")
            .map_err(|e| ChainError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ChainError::Database(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let body = row.map_err(|e| ChainError::Database(format!("Failed to read row: {}", e)))?;
            blocks.push(serde_json::from_str(&body)?);
        }
        Ok(blocks)
    }

    /// Atomically writes the missing blocks and the ledger snapshot.
    fn save_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| ChainError::Database(format!("Failed to start transaction: {}", e)))?;

        Database::insert_missing_blocks(&tx, &snapshot.chain)?;
        Database::put_snapshot(&tx, LEDGER_KEY, &value)?;

        tx.commit()
            .map_err(|e| ChainError::Database(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn save_state(&self, ledger: &LedgerSnapshot, registry: &RegistrySnapshot) -> Result<()> {
        let ledger_value = serde_json::to_string(ledger)?;
        let registry_value = serde_json::to_string(registry)?;
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| ChainError::Database(format!("Failed to start transaction: {}", e)))?;

        Database::insert_missing_blocks(&tx, &ledger.chain)?;
        Database::put_snapshot(&tx, LEDGER_KEY, &ledger_value)?;
        Database::put_snapshot(&tx, REGISTRY_KEY, &registry_value)?;

        tx.commit()
            .map_err(|e| ChainError::Database(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn load_ledger(&self) -> Result<Option<LedgerSnapshot>> {
        match self.get_snapshot(LEDGER_KEY)? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().map_err(poisoned)?;
        Database::put_snapshot(&conn, REGISTRY_KEY, &value)
    }

    fn load_registry(&self) -> Result<Option<RegistrySnapshot>> {
        match self.get_snapshot(REGISTRY_KEY)? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Vec<Block>>>,
    pub ledger: Arc<Mutex<Option<LedgerSnapshot>>>,
    pub registry: Arc<Mutex<Option<RegistrySnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_block(&self, block: &Block) -> Result<()> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.retain(|b| b.height != block.height);
        blocks.push(block.clone());
        blocks.sort_by_key(|b| b.height);
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.blocks.lock().map_err(poisoned)?.clone())
    }

    fn save_ledger(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        {
            let mut blocks = self.blocks.lock().map_err(poisoned)?;
            let stored = blocks.last().map(|b| b.height);
            blocks.extend(
                snapshot
                    .chain
                    .iter()
                    .filter(|b| stored.map_or(true, |h| b.height > h))
                    .cloned(),
            );
        }
        *self.ledger.lock().map_err(poisoned)? = Some(snapshot.clone());
        Ok(())
    }

    fn load_ledger(&self) -> Result<Option<LedgerSnapshot>> {
        Ok(self.ledger.lock().map_err(poisoned)?.clone())
    }

    fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        *self.registry.lock().map_err(poisoned)? = Some(snapshot.clone());
        Ok(())
    }

    fn load_registry(&self) -> Result<Option<RegistrySnapshot>> {
        Ok(self.registry.lock().map_err(poisoned)?.clone())
    }

    fn save_state(&self, ledger: &LedgerSnapshot, registry: &RegistrySnapshot) -> Result<()> {
        self.save_ledger(ledger)?;
        self.save_registry(registry)
    }
}
