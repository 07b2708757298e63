//! The set of wallet records under the common view key: dense
//! insertion-order storage with a spend-key side index, plus lookup by the
//! owning transfer container.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, WalletError};
use crate::sync::ContainerHandle;
use crate::types::{PublicKey, SecretKey, WalletTrackingMode, NULL_SECRET_KEY};

pub(crate) struct WalletRecord {
    pub spend_public_key: PublicKey,
    pub spend_secret_key: SecretKey,
    pub creation_timestamp: u64,
    pub actual_balance: u64,
    pub pending_balance: u64,
    pub container: ContainerHandle,
}

#[derive(Default)]
pub(crate) struct KeyStore {
    records: Vec<WalletRecord>,
    by_spend_key: HashMap<PublicKey, usize>,
}

impl KeyStore {
    pub fn new() -> Self {
        KeyStore { records: Vec::new(), by_spend_key: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WalletRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletRecord> {
        self.records.iter()
    }

    pub fn contains(&self, spend_public_key: &PublicKey) -> bool {
        self.by_spend_key.contains_key(spend_public_key)
    }

    pub fn by_spend_key(&self, spend_public_key: &PublicKey) -> Option<&WalletRecord> {
        self.by_spend_key.get(spend_public_key).map(|&i| &self.records[i])
    }

    pub fn by_spend_key_mut(&mut self, spend_public_key: &PublicKey) -> Option<&mut WalletRecord> {
        let index = *self.by_spend_key.get(spend_public_key)?;
        Some(&mut self.records[index])
    }

    pub fn by_container(&self, container: &ContainerHandle) -> Option<&WalletRecord> {
        self.records
            .iter()
            .find(|record| Arc::ptr_eq(&record.container, container))
    }

    pub fn by_container_mut(&mut self, container: &ContainerHandle) -> Option<&mut WalletRecord> {
        self.records
            .iter_mut()
            .find(|record| Arc::ptr_eq(&record.container, container))
    }

    pub fn index_of(&self, spend_public_key: &PublicKey) -> Option<usize> {
        self.by_spend_key.get(spend_public_key).copied()
    }

    /// Tracking-ness of the whole wallet, decided by the first record.
    pub fn tracking_mode(&self) -> WalletTrackingMode {
        match self.records.first() {
            None => WalletTrackingMode::NoAddresses,
            Some(record) if record.spend_secret_key == NULL_SECRET_KEY => WalletTrackingMode::Tracking,
            Some(_) => WalletTrackingMode::NotTracking,
        }
    }

    /// Inserts a record, enforcing spend-key uniqueness and mode
    /// consistency with the existing records.
    pub fn insert(&mut self, record: WalletRecord) -> Result<()> {
        let mode = self.tracking_mode();
        let is_watch_only = record.spend_secret_key == NULL_SECRET_KEY;
        if (mode == WalletTrackingMode::Tracking && !is_watch_only)
            || (mode == WalletTrackingMode::NotTracking && is_watch_only)
        {
            return Err(WalletError::BadAddress);
        }

        if self.by_spend_key.contains_key(&record.spend_public_key) {
            return Err(WalletError::AddressAlreadyExists);
        }

        self.by_spend_key.insert(record.spend_public_key, self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// Removes by spend key; subsequent records shift down one dense index.
    pub fn remove(&mut self, spend_public_key: &PublicKey) -> Option<WalletRecord> {
        let index = self.by_spend_key.remove(spend_public_key)?;
        let record = self.records.remove(index);
        for (position, shifted) in self.records.iter().enumerate().skip(index) {
            self.by_spend_key.insert(shifted.spend_public_key, position);
        }
        Some(record)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_spend_key.clear();
    }
}
