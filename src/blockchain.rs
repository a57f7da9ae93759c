// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// chain management, world state and block validation.

pub mod core;
pub use self::core::*;
