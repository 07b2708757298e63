//! Serialized-but-not-yet-relayed transactions, keyed by ledger index.

use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct UncommittedStore {
    blobs: BTreeMap<usize, Vec<u8>>,
}

impl UncommittedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, transaction_index: usize) -> bool {
        self.blobs.contains_key(&transaction_index)
    }

    pub fn get(&self, transaction_index: usize) -> Option<&Vec<u8>> {
        self.blobs.get(&transaction_index)
    }

    pub fn insert(&mut self, transaction_index: usize, blob: Vec<u8>) {
        debug_assert!(!self.blobs.contains_key(&transaction_index));
        self.blobs.insert(transaction_index, blob);
    }

    pub fn remove(&mut self, transaction_index: usize) -> Option<Vec<u8>> {
        self.blobs.remove(&transaction_index)
    }

    pub fn remove_many(&mut self, transaction_indexes: &[usize]) {
        for index in transaction_indexes {
            self.blobs.remove(index);
        }
    }

    pub fn indexes(&self) -> Vec<usize> {
        self.blobs.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&usize, &Vec<u8>)> {
        self.blobs.iter()
    }

    pub fn clear(&mut self) {
        self.blobs.clear();
    }
}
