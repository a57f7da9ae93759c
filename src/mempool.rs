//! Pending-transaction pool, ordered by admission.

use crate::transaction::Transaction;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    order: VecDeque<String>,
    transactions: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a transaction; returns `false` if its id is already pooled.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if self.transactions.contains_key(&tx.tx_id) {
            return false;
        }
        self.order.push_back(tx.tx_id.clone());
        self.transactions.insert(tx.tx_id.clone(), tx);
        true
    }

    pub fn remove_transaction(&mut self, tx_id: &str) -> Option<Transaction> {
        let removed = self.transactions.remove(tx_id)?;
        self.order.retain(|id| id != tx_id);
        Some(removed)
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.transactions.contains_key(tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.transactions.get(tx_id)
    }

    /// The `limit` oldest transactions, oldest first.
    pub fn oldest(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .take(limit)
            .filter_map(|id| self.transactions.get(id).cloned())
            .collect()
    }

    /// All transactions in admission order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.oldest(self.order.len())
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::transaction::Payload;

    fn tx(keypair: &KeyPair, timestamp: u64) -> Transaction {
        Transaction::with_timestamp(
            keypair.public_key_hex(),
            "0xstudent",
            Payload::add_validator("ff"),
            timestamp,
        )
        .unwrap()
    }

    #[test]
    fn test_admission_order_preserved() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        let txs: Vec<_> = (0..5).map(|i| tx(&keypair, 100 - i)).collect();
        for t in &txs {
            assert!(pool.add_transaction(t.clone()));
        }
        let oldest: Vec<_> = pool.oldest(3).into_iter().map(|t| t.tx_id).collect();
        let expected: Vec<_> = txs[..3].iter().map(|t| t.tx_id.clone()).collect();
        assert_eq!(oldest, expected);
    }

    #[test]
    fn test_duplicate_rejected() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        let t = tx(&keypair, 1);
        assert!(pool.add_transaction(t.clone()));
        assert!(!pool.add_transaction(t));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove() {
        let keypair = KeyPair::generate().unwrap();
        let mut pool = Mempool::new();
        let a = tx(&keypair, 1);
        let b = tx(&keypair, 2);
        pool.add_transaction(a.clone());
        pool.add_transaction(b.clone());
        assert!(pool.remove_transaction(&a.tx_id).is_some());
        assert!(pool.remove_transaction(&a.tx_id).is_none());
        assert_eq!(pool.ids().cloned().collect::<Vec<_>>(), vec![b.tx_id]);
    }
}
