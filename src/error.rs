//! Error types for EduChain

use thiserror::Error;

/// Coarse classification of a [`ChainError`], for callers that need to tell
/// "forbidden" from "missing" from "conflicting" from "malformed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    NotFound,
    Validation,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Authorization error: {0}")]
    Authorization(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Authorization(_) => ErrorKind::Authorization,
            ChainError::NotFound(_) => ErrorKind::NotFound,
            ChainError::Validation(_) => ErrorKind::Validation,
            ChainError::Conflict(_) => ErrorKind::Conflict,
            ChainError::Crypto(_)
            | ChainError::Serialization(_)
            | ChainError::Database(_)
            | ChainError::Config(_)
            | ChainError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
