//! Block-production schedule.
//!
//! The ledger never decides who may produce a block; it asks a [`Scheduler`].

use std::collections::BTreeSet;
use std::fmt;

pub trait Scheduler: Send + Sync + fmt::Debug {
    /// The public key expected to produce the block at `height`, or `None`
    /// when the authority set is empty. Must be a pure function of its inputs.
    fn expected_authority(&self, height: u64, authorities: &BTreeSet<String>) -> Option<String>;
}

/// Rotates through the authority set in lexicographic key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinScheduler;

impl Scheduler for RoundRobinScheduler {
    fn expected_authority(&self, height: u64, authorities: &BTreeSet<String>) -> Option<String> {
        if authorities.is_empty() {
            return None;
        }
        let slot = (height % authorities.len() as u64) as usize;
        authorities.iter().nth(slot).cloned()
    }
}

/// Always expects the same producer. Handy for single-authority deployments.
#[derive(Debug, Clone)]
pub struct FixedScheduler {
    pub authority: String,
}

impl FixedScheduler {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }
}

impl Scheduler for FixedScheduler {
    fn expected_authority(&self, _height: u64, _authorities: &BTreeSet<String>) -> Option<String> {
        Some(self.authority.clone())
    }
}
