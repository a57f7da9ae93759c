//! EduChain - a proof-of-authority ledger for academic credentials
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, chain management, world state and block validation
//! - [`transaction`] - Signed transactions and their payloads
//! - [`mempool`] - Pending transaction pool
//!
//! ## Consensus
//! - [`scheduler`] - Which authority may produce the block at a given height
//! - [`contracts`] - Payload handlers that apply transactions to state
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 keys, signatures and address derivation
//! - [`canonical`] - Deterministic byte encoding for hashing and signing
//!
//! ## Credentials
//! - [`credential`] - Credential metadata and signed tokens
//! - [`registry`] - Mint, transfer, revoke and verify credential tokens
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//! - [`node`] - Single-writer guard over ledger and registry
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus
// ============================================================================
pub mod contracts;
pub mod scheduler;

// ============================================================================
// Cryptography
// ============================================================================
pub mod canonical;
pub mod crypto;

// ============================================================================
// Credentials
// ============================================================================
pub mod credential;
pub mod registry;

// ============================================================================
// State Management
// ============================================================================
pub mod node;
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
