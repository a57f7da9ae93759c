//! Configuration management for EduChain

use crate::crypto;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_max_transaction_size")]
    pub max_transaction_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    #[serde(default = "default_keccak_backend")]
    pub keccak_backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_db_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            max_transaction_size: default_max_transaction_size(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            keccak_backend: default_keccak_backend(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            enabled: default_db_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_batch_limit() -> usize {
    crate::blockchain::DEFAULT_BATCH_LIMIT
}

fn default_max_transaction_size() -> usize {
    crate::transaction::MAX_TRANSACTION_SIZE
}

fn default_keccak_backend() -> String {
    "sha3".to_string()
}

fn default_db_path() -> String {
    "./data/educhain.db".to_string()
}

fn default_db_enabled() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.batch_limit == 0 {
            return Err(ChainError::Config(
                "ledger.batch_limit must be at least 1".to_string(),
            ));
        }
        if self.ledger.max_transaction_size == 0 {
            return Err(ChainError::Config(
                "ledger.max_transaction_size must be positive".to_string(),
            ));
        }
        if self.database.enabled && self.database.path.is_empty() {
            return Err(ChainError::Config(
                "database.path must be set when the database is enabled".to_string(),
            ));
        }
        crypto::keccak_backend_by_name(&self.crypto.keccak_backend)
            .map_err(|e| ChainError::Config(e.to_string()))?;
        Ok(())
    }

    /// Installs the configured Keccak backend for this process. Installing
    /// the same choice twice is tolerated; a different one is a conflict.
    pub fn install_crypto(&self) -> Result<()> {
        let backend = crypto::keccak_backend_by_name(&self.crypto.keccak_backend)
            .map_err(|e| ChainError::Config(e.to_string()))?;
        match crypto::install_keccak_backend(backend) {
            Ok(()) => Ok(()),
            Err(ChainError::Conflict(_))
                if crypto::keccak_backend().name() == self.crypto.keccak_backend =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Loads `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let source = fs::read_to_string(path)?;
    Config::from_toml(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let config = load_config("/nonexistent/educhain.toml").unwrap();
        assert_eq!(config.ledger.batch_limit, 10);
        assert_eq!(config.ledger.max_transaction_size, 100_000);
        assert_eq!(config.crypto.keccak_backend, "sha3");
        assert_eq!(config.database.path, "./data/educhain.db");
        assert!(config.database.enabled);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = Config::from_toml("[ledger]\nbatch_limit = 3\n").unwrap();
        assert_eq!(config.ledger.batch_limit, 3);
        assert_eq!(config.ledger.max_transaction_size, 100_000);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_rejects_zero_batch_limit() {
        let err = Config::from_toml("[ledger]\nbatch_limit = 0\n").unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = Config::from_toml("[crypto]\nkeccak_backend = \"sha3-fips\"\n").unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn test_rejects_empty_db_path() {
        let err = Config::from_toml("[database]\npath = \"\"\n").unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
        assert!(Config::from_toml("[database]\npath = \"\"\nenabled = false\n").is_ok());
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml("[ledger\nbatch_limit = 3").unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn test_install_crypto_is_repeatable() {
        let config = Config::default();
        config.install_crypto().unwrap();
        config.install_crypto().unwrap();
    }
}
