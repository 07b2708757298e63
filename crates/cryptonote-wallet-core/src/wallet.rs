//! The wallet runtime: one value owning every record under a single view
//! key, the transaction ledger and the event queue, guarded by a single
//! ready-event critical section.
//!
//! Every mutating public operation locks the state mutex for its whole
//! duration, including across node RPC waits, so user actions and inbound
//! sync callbacks serialize against each other.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use parking_lot::Mutex;
use zeroize::Zeroize;

use crate::block_log::BlockHashLog;
use crate::codec::{
    RecordSnapshot, UnlockJobSnapshot, WalletCache, WalletCodec, WalletDetails, WalletSnapshot,
};
use crate::crypto::{AccountKeys, CryptoOps};
use crate::currency::CurrencyParams;
use crate::error::{Result, WalletError};
use crate::events::EventQueue;
use crate::keystore::{KeyStore, WalletRecord};
use crate::ledger::TransactionLedger;
use crate::node::NodeClient;
use crate::sync::{
    AccountSubscription, ContainerHandle, OutputFilter, OutputType, SyncEngine, SyncStart,
};
use crate::types::{
    AccountAddress, KeyPair, PublicKey, SecretKey, WalletEvent, WalletTrackingMode,
    WalletTransactionState, NULL_SECRET_KEY,
};
use crate::uncommitted::UncommittedStore;
use crate::unlock::UnlockSchedule;

/// Sync-start slack subtracted from an account's creation timestamp, so a
/// subscription never misses blocks mined just before the clock reading.
const ACCOUNT_CREATE_TIME_ACCURACY: u64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WalletPhase {
    NotInitialized,
    Initialized,
}

pub(crate) struct WalletState {
    pub phase: WalletPhase,
    pub view_public_key: PublicKey,
    pub view_secret_key: SecretKey,
    pub password: String,
    pub keystore: KeyStore,
    pub block_log: BlockHashLog,
    pub ledger: TransactionLedger,
    pub unlock_schedule: UnlockSchedule,
    pub uncommitted: UncommittedStore,
    pub actual_balance: u64,
    pub pending_balance: u64,
    pub fusion_cache: HashMap<usize, bool>,
    pub sync_started: bool,
}

impl WalletState {
    fn new() -> Self {
        WalletState {
            phase: WalletPhase::NotInitialized,
            view_public_key: [0u8; 32],
            view_secret_key: [0u8; 32],
            password: String::new(),
            keystore: KeyStore::new(),
            block_log: BlockHashLog::new(),
            ledger: TransactionLedger::new(),
            unlock_schedule: UnlockSchedule::new(),
            uncommitted: UncommittedStore::new(),
            actual_balance: 0,
            pending_balance: 0,
            fusion_cache: HashMap::new(),
            sync_started: false,
        }
    }

    /// Refreshes one record's balances from its container and moves the
    /// global counters by the difference.
    pub fn update_balance(&mut self, container: &ContainerHandle) {
        let actual = container.balance(OutputFilter::ALL_UNLOCKED);
        let pending = container.balance(OutputFilter::ALL_LOCKED);

        let Some(record) = self.keystore.by_container_mut(container) else {
            return;
        };
        let old_actual = record.actual_balance;
        let old_pending = record.pending_balance;
        record.actual_balance = actual;
        record.pending_balance = pending;

        if old_actual < actual {
            self.actual_balance += actual - old_actual;
        } else {
            self.actual_balance -= old_actual - actual;
        }

        if old_pending < pending {
            self.pending_balance += pending - old_pending;
        } else {
            self.pending_balance -= old_pending - pending;
        }
    }
}

pub struct Wallet {
    pub(crate) currency: CurrencyParams,
    pub(crate) node: Arc<dyn NodeClient>,
    pub(crate) sync: Arc<dyn SyncEngine>,
    pub(crate) crypto: Arc<dyn CryptoOps>,
    pub(crate) codec: Arc<dyn WalletCodec>,
    pub(crate) transaction_soft_lock_time: u32,
    pub(crate) upper_transaction_size_limit: usize,
    pub(crate) events: EventQueue,
    pub(crate) state: Mutex<WalletState>,
}

impl Wallet {
    pub fn new(
        currency: CurrencyParams,
        node: Arc<dyn NodeClient>,
        sync: Arc<dyn SyncEngine>,
        crypto: Arc<dyn CryptoOps>,
        codec: Arc<dyn WalletCodec>,
        transaction_soft_lock_time: u32,
    ) -> Self {
        let upper_transaction_size_limit =
            currency.block_granted_full_reward_zone * 2 - currency.miner_tx_blob_reserved_size;
        Wallet {
            currency,
            node,
            sync,
            crypto,
            codec,
            transaction_soft_lock_time,
            upper_transaction_size_limit,
            events: EventQueue::new(),
            state: Mutex::new(WalletState::new()),
        }
    }

    // --- lifecycle ---

    pub fn initialize(&self, password: &str) -> Result<()> {
        let (view_public_key, view_secret_key) = self.crypto.generate_keys();
        let mut state = self.state.lock();
        self.init_with_keys(&mut state, view_public_key, view_secret_key, password)
    }

    pub fn initialize_with_view_key(&self, view_secret_key: &SecretKey, password: &str) -> Result<()> {
        let view_public_key = self
            .crypto
            .secret_key_to_public_key(view_secret_key)
            .ok_or(WalletError::KeyGenerationError)?;
        let mut state = self.state.lock();
        self.init_with_keys(&mut state, view_public_key, *view_secret_key, password)
    }

    fn init_with_keys(
        &self,
        state: &mut WalletState,
        view_public_key: PublicKey,
        view_secret_key: SecretKey,
        password: &str,
    ) -> Result<()> {
        if state.phase != WalletPhase::NotInitialized {
            return Err(WalletError::AlreadyInitialized);
        }
        self.ensure_not_stopped()?;

        state.view_public_key = view_public_key;
        state.view_secret_key = view_secret_key;
        state.password = password.to_string();

        debug_assert!(state.block_log.is_empty());
        state.block_log.push(self.currency.genesis_block_hash);

        state.phase = WalletPhase::Initialized;
        info!("wallet initialized, view key {}", hex::encode(view_public_key));
        Ok(())
    }

    pub fn load(&self, source: &mut dyn Read, password: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != WalletPhase::NotInitialized {
            return Err(WalletError::WrongState);
        }
        self.ensure_not_stopped()?;
        self.do_load(&mut state, source, password)
    }

    fn do_load(&self, state: &mut WalletState, source: &mut dyn Read, password: &str) -> Result<()> {
        self.stop_sync(state);

        // Re-register every one-time output key the engine's containers
        // already know, so restored wallets keep recognizing outputs whose
        // keys were reused across transactions.
        for address in self.sync.subscriptions() {
            if let Some(container) = self.sync.container(&address) {
                for output in container.outputs(OutputFilter::ALL) {
                    if output.output_type != OutputType::Invalid {
                        self.sync.register_seen_public_key(
                            &address,
                            &output.transaction_hash,
                            &output.output_key,
                        );
                    }
                }
            }
        }

        let snapshot = self.codec.load(password, source)?;

        state.view_public_key = snapshot.view_public_key;
        state.view_secret_key = snapshot.view_secret_key;
        state.password = password.to_string();

        for record in &snapshot.records {
            self.add_wallet_record(
                state,
                record.spend_public_key,
                record.spend_secret_key,
                record.creation_timestamp,
            )?;
        }

        if let Some(details) = snapshot.details {
            state.ledger.restore(details.transactions, details.transfers);
        }

        match snapshot.cache {
            Some(cache) => {
                state.block_log.clear();
                state.block_log.extend(cache.block_hashes);
                for job in cache.unlock_jobs {
                    if let Some(record) = state.keystore.by_spend_key(&job.spend_public_key) {
                        let container = record.container.clone();
                        state.unlock_schedule.insert(job.transaction_hash, job.unlock_height, container);
                    }
                }
                for (index, blob) in cache.uncommitted {
                    state.uncommitted.insert(index, blob);
                }
                for (spend_public_key, actual, pending) in cache.record_balances {
                    if let Some(record) = state.keystore.by_spend_key_mut(&spend_public_key) {
                        record.actual_balance = actual;
                        record.pending_balance = pending;
                    }
                }
                state.actual_balance = cache.actual_balance;
                state.pending_balance = cache.pending_balance;
            }
            None => {
                let containers: Vec<ContainerHandle> =
                    state.keystore.iter().map(|record| record.container.clone()).collect();
                for container in containers {
                    state.update_balance(&container);
                }
            }
        }

        if state.keystore.is_empty() {
            state.block_log.clear();
            state.block_log.push(self.currency.genesis_block_hash);
        } else {
            if state.block_log.is_empty() {
                state.block_log.extend(self.sync.known_block_hashes());
            }
            if state.block_log.is_empty() {
                state.block_log.push(self.currency.genesis_block_hash);
            }
            self.start_sync(state);
        }

        state.phase = WalletPhase::Initialized;
        info!(
            "wallet loaded: {} addresses, {} transactions",
            state.keystore.len(),
            state.ledger.len()
        );
        Ok(())
    }

    pub fn save(&self, destination: &mut dyn Write, save_details: bool, save_cache: bool) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        self.stop_sync(&mut state);
        self.write_snapshot(&state, destination, save_details, save_cache)?;
        self.start_sync(&mut state);
        Ok(())
    }

    fn write_snapshot(
        &self,
        state: &WalletState,
        destination: &mut dyn Write,
        save_details: bool,
        save_cache: bool,
    ) -> Result<()> {
        let details = save_details.then(|| {
            let (transactions, transfers) = if save_cache {
                state
                    .ledger
                    .filtered_details(|tx| tx.state == WalletTransactionState::Deleted)
            } else {
                state.ledger.filtered_details(|tx| {
                    tx.state == WalletTransactionState::Created
                        || tx.state == WalletTransactionState::Deleted
                })
            };
            WalletDetails { transactions, transfers }
        });

        let cache = save_cache.then(|| WalletCache {
            block_hashes: (0..state.block_log.len())
                .filter_map(|height| state.block_log.hash_at(height).copied())
                .collect(),
            unlock_jobs: state
                .unlock_schedule
                .iter()
                .filter_map(|job| {
                    state.keystore.iter().find_map(|record| {
                        Arc::ptr_eq(&record.container, &job.container).then(|| UnlockJobSnapshot {
                            unlock_height: job.unlock_height,
                            transaction_hash: job.transaction_hash,
                            spend_public_key: record.spend_public_key,
                        })
                    })
                })
                .collect(),
            uncommitted: state
                .uncommitted
                .entries()
                .map(|(index, blob)| (*index, blob.clone()))
                .collect(),
            actual_balance: state.actual_balance,
            pending_balance: state.pending_balance,
            record_balances: state
                .keystore
                .iter()
                .map(|record| (record.spend_public_key, record.actual_balance, record.pending_balance))
                .collect(),
        });

        let snapshot = WalletSnapshot {
            view_public_key: state.view_public_key,
            view_secret_key: state.view_secret_key,
            records: state
                .keystore
                .iter()
                .map(|record| RecordSnapshot {
                    spend_public_key: record.spend_public_key,
                    spend_secret_key: record.spend_secret_key,
                    creation_timestamp: record.creation_timestamp,
                })
                .collect(),
            details,
            cache,
        };

        self.codec.save(&state.password, &snapshot, destination)?;
        Ok(())
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        if state.password != old_password {
            return Err(WalletError::WrongPassword);
        }

        state.password = new_password.to_string();
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.do_shutdown(&mut state);
        Ok(())
    }

    pub(crate) fn do_shutdown(&self, state: &mut WalletState) {
        self.stop_sync(state);

        for address in self.sync.subscriptions() {
            self.sync.unsubscribe(&address);
        }

        state.keystore.clear();
        state.unlock_schedule.clear();
        state.ledger.clear();
        state.uncommitted.clear();
        state.actual_balance = 0;
        state.pending_balance = 0;
        state.fusion_cache.clear();
        state.block_log.clear();

        self.events.clear();

        state.password.zeroize();
        state.view_secret_key.zeroize();
        state.phase = WalletPhase::NotInitialized;
        info!("wallet shut down");
    }

    /// Sets the cancellation flag and wakes any blocked event consumer.
    pub fn stop(&self) {
        self.events.cancel();
    }

    /// Clears the cancellation flag set by [`Wallet::stop`].
    pub fn start(&self) {
        self.events.resume();
    }

    /// Blocks until an event is available; fails with `OperationCancelled`
    /// once the wallet is stopped.
    pub fn get_event(&self) -> Result<WalletEvent> {
        {
            let state = self.state.lock();
            self.ensure_initialized(&state)?;
            self.ensure_not_stopped()?;
        }
        self.events.next()
    }

    // --- addresses ---

    pub fn create_address(&self) -> Result<String> {
        let (spend_public_key, spend_secret_key) = self.crypto.generate_keys();
        let creation_timestamp = unix_time();
        let mut state = self.state.lock();
        self.do_create_address(&mut state, spend_public_key, spend_secret_key, creation_timestamp)
    }

    pub fn create_address_from_secret_key(&self, spend_secret_key: &SecretKey) -> Result<String> {
        let spend_public_key = self
            .crypto
            .secret_key_to_public_key(spend_secret_key)
            .ok_or(WalletError::KeyGenerationError)?;
        let mut state = self.state.lock();
        self.do_create_address(&mut state, spend_public_key, *spend_secret_key, 0)
    }

    pub fn create_address_from_public_key(&self, spend_public_key: &PublicKey) -> Result<String> {
        if !self.crypto.check_key(spend_public_key) {
            return Err(WalletError::WrongParameters);
        }
        let mut state = self.state.lock();
        self.do_create_address(&mut state, *spend_public_key, NULL_SECRET_KEY, 0)
    }

    fn do_create_address(
        &self,
        state: &mut WalletState,
        spend_public_key: PublicKey,
        spend_secret_key: SecretKey,
        creation_timestamp: u64,
    ) -> Result<String> {
        self.ensure_initialized(state)?;
        self.ensure_not_stopped()?;

        self.stop_sync(state);
        let result = self.create_address_inner(state, spend_public_key, spend_secret_key, creation_timestamp);
        self.start_sync(state);
        result
    }

    fn create_address_inner(
        &self,
        state: &mut WalletState,
        spend_public_key: PublicKey,
        spend_secret_key: SecretKey,
        creation_timestamp: u64,
    ) -> Result<String> {
        let address =
            self.add_wallet_record(state, spend_public_key, spend_secret_key, creation_timestamp)?;

        // A subscription's sync start is fixed at creation; when the new key
        // is older than the engine's tolerance, bounce the whole wallet
        // through save/load so syncing restarts from the earliest record.
        let current_time = unix_time();
        if creation_timestamp + self.currency.block_future_time_limit < current_time {
            info!("rewinding sync for address created at {creation_timestamp}");
            let password = state.password.clone();
            let mut buffer = Vec::new();
            self.write_snapshot(state, &mut buffer, true, false)?;
            self.do_shutdown(state);
            self.do_load(state, &mut buffer.as_slice(), &password)?;
        }

        Ok(address)
    }

    pub(crate) fn add_wallet_record(
        &self,
        state: &mut WalletState,
        spend_public_key: PublicKey,
        spend_secret_key: SecretKey,
        creation_timestamp: u64,
    ) -> Result<String> {
        let mode = state.keystore.tracking_mode();
        let is_watch_only = spend_secret_key == NULL_SECRET_KEY;
        if (mode == WalletTrackingMode::Tracking && !is_watch_only)
            || (mode == WalletTrackingMode::NotTracking && is_watch_only)
        {
            return Err(WalletError::BadAddress);
        }
        if state.keystore.contains(&spend_public_key) {
            return Err(WalletError::AddressAlreadyExists);
        }

        let address = AccountAddress {
            spend_public_key,
            view_public_key: state.view_public_key,
        };
        let subscription = AccountSubscription {
            address,
            view_secret_key: state.view_secret_key,
            spend_secret_key,
            sync_start: SyncStart {
                height: 0,
                timestamp: creation_timestamp.max(ACCOUNT_CREATE_TIME_ACCURACY)
                    - ACCOUNT_CREATE_TIME_ACCURACY,
            },
            transaction_spendable_age: self.transaction_soft_lock_time,
        };

        let container = self.sync.subscribe(subscription);
        state.keystore.insert(WalletRecord {
            spend_public_key,
            spend_secret_key,
            creation_timestamp,
            actual_balance: 0,
            pending_balance: 0,
            container,
        })?;

        if state.keystore.len() == 1 {
            state.block_log.extend(self.sync.known_block_hashes());
        }

        Ok(self.currency.account_address_as_string(&address))
    }

    pub fn delete_address(&self, address: &str) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        let parsed = self.parse_address(address)?;
        let record = state
            .keystore
            .by_spend_key(&parsed.spend_public_key)
            .ok_or(WalletError::ObjectNotFound)?;
        let container = record.container.clone();
        let record_actual = record.actual_balance;
        let record_pending = record.pending_balance;

        self.stop_sync(&mut state);

        state.actual_balance -= record_actual;
        state.pending_balance -= record_pending;

        self.sync.unsubscribe(&parsed);
        state.unlock_schedule.remove_by_container(&container);

        let mut deleted_transactions = Vec::new();
        let updated_transactions = {
            let view_public_key = state.view_public_key;
            let currency = &self.currency;
            let WalletState { ledger, keystore, .. } = &mut *state;
            ledger.delete_transfers_for_address(
                address,
                |candidate| {
                    currency.parse_account_address_string(candidate).is_some_and(|a| {
                        a.view_public_key == view_public_key && keystore.contains(&a.spend_public_key)
                    })
                },
                &mut deleted_transactions,
            )
        };
        state.uncommitted.remove_many(&deleted_transactions);

        state.keystore.remove(&parsed.spend_public_key);

        if state.keystore.is_empty() {
            state.block_log.clear();
            state.block_log.push(self.currency.genesis_block_hash);
        } else {
            self.start_sync(&mut state);
        }

        info!(
            "deleted address {address}: {} transactions updated, {} deleted",
            updated_transactions.len(),
            deleted_transactions.len()
        );
        for transaction_index in updated_transactions {
            self.events.push(WalletEvent::TransactionUpdated { transaction_index });
        }
        Ok(())
    }

    // --- shared guards and helpers ---

    pub(crate) fn ensure_initialized(&self, state: &WalletState) -> Result<()> {
        if state.phase != WalletPhase::Initialized {
            return Err(WalletError::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn ensure_not_stopped(&self) -> Result<()> {
        if self.events.is_stopped() {
            return Err(WalletError::OperationCancelled);
        }
        Ok(())
    }

    pub(crate) fn ensure_not_tracking(&self, state: &WalletState) -> Result<()> {
        if state.keystore.tracking_mode() == WalletTrackingMode::Tracking {
            return Err(WalletError::TrackingMode);
        }
        Ok(())
    }

    pub(crate) fn parse_address(&self, address: &str) -> Result<AccountAddress> {
        self.currency
            .parse_account_address_string(address)
            .ok_or(WalletError::BadAddress)
    }

    pub(crate) fn is_my_address(&self, state: &WalletState, address: &str) -> bool {
        self.currency
            .parse_account_address_string(address)
            .is_some_and(|parsed| {
                parsed.view_public_key == state.view_public_key
                    && state.keystore.contains(&parsed.spend_public_key)
            })
    }

    pub(crate) fn address_of_record(&self, state: &WalletState, spend_public_key: &PublicKey) -> String {
        self.currency.account_address_as_string(&AccountAddress {
            spend_public_key: *spend_public_key,
            view_public_key: state.view_public_key,
        })
    }

    pub(crate) fn make_account_keys(&self, state: &WalletState, record: &WalletRecord) -> AccountKeys {
        AccountKeys {
            address: AccountAddress {
                spend_public_key: record.spend_public_key,
                view_public_key: state.view_public_key,
            },
            view_secret_key: state.view_secret_key,
            spend_secret_key: record.spend_secret_key,
        }
    }

    pub(crate) fn start_sync(&self, state: &mut WalletState) {
        if !state.keystore.is_empty() && !state.sync_started {
            self.sync.start();
            state.sync_started = true;
        }
    }

    pub(crate) fn stop_sync(&self, state: &mut WalletState) {
        if state.sync_started {
            self.sync.stop();
            state.sync_started = false;
        }
    }

    pub(crate) fn update_transaction_state_and_push_event(
        &self,
        state: &mut WalletState,
        transaction_index: usize,
        new_state: WalletTransactionState,
    ) {
        let current = state
            .ledger
            .get(transaction_index)
            .map(|tx| tx.state);
        if current != Some(new_state) {
            if current.is_none() {
                warn!("state update for unknown transaction index {transaction_index}");
                return;
            }
            state.ledger.modify(transaction_index, |tx| tx.state = new_state);
            self.events.push(WalletEvent::TransactionUpdated { transaction_index });
        }
    }

    pub fn view_key_pair(&self) -> Result<KeyPair> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(KeyPair {
            public_key: state.view_public_key,
            secret_key: state.view_secret_key,
        })
    }
}

pub(crate) fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
