//! In-process doubles for the wallet's collaborators: sync engine with
//! scriptable containers, node client, crypto backend and a byte-level
//! transaction builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use cryptonote_wallet_core::{
    AccountAddress, AccountKeys, AccountSubscription, BincodeCodec, ContainerHandle,
    ContainerTransaction, CryptoOps, CurrencyParams, Hash, InputKeyInfo, NodeCallback, NodeClient,
    NodeError, OutputFilter, OutputType, PublicKey, RandomOutputEntry, RandomOutsForAmount,
    SecretKey, StateFilter, SyncEngine, SyncError, TransactionBuilder, TransactionInformation,
    TransactionOutputInformation, TransferContainer, Wallet, WalletEvent,
};

pub const PASSWORD: &str = "hunter2";
pub const SOFT_LOCK_TIME: u32 = 10;

// --- crypto ---

pub struct MockCryptoOps {
    counter: AtomicU8,
}

impl MockCryptoOps {
    pub fn new() -> Self {
        MockCryptoOps { counter: AtomicU8::new(0) }
    }
}

fn derive_public(secret: &SecretKey) -> PublicKey {
    let mut public = [0u8; 32];
    for (dst, src) in public.iter_mut().zip(secret.iter()) {
        *dst = src.wrapping_add(0x40);
    }
    public
}

impl CryptoOps for MockCryptoOps {
    fn generate_keys(&self) -> (PublicKey, SecretKey) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let secret = [n; 32];
        (derive_public(&secret), secret)
    }

    fn secret_key_to_public_key(&self, secret: &SecretKey) -> Option<PublicKey> {
        if *secret == [0xFF; 32] {
            return None;
        }
        Some(derive_public(secret))
    }

    fn check_key(&self, public: &PublicKey) -> bool {
        *public != [0u8; 32]
    }

    fn random_seed(&self) -> [u8; 32] {
        [9u8; 32]
    }

    fn create_transaction(&self) -> Box<dyn TransactionBuilder> {
        Box::new(MockTransactionBuilder::default())
    }
}

// --- transaction builder ---

#[derive(Default)]
pub struct MockTransactionBuilder {
    outputs: Vec<(u64, AccountAddress)>,
    inputs: Vec<InputKeyInfo>,
    unlock_time: u64,
    extra: Vec<u8>,
    signatures: usize,
}

fn fold_digest(data: &[u8]) -> Hash {
    let mut digest = [0u8; 32];
    for (position, byte) in data.iter().enumerate() {
        let slot = position % 32;
        digest[slot] = digest[slot].wrapping_mul(31).wrapping_add(*byte);
    }
    digest
}

impl TransactionBuilder for MockTransactionBuilder {
    fn add_output(&mut self, amount: u64, receiver: &AccountAddress) {
        self.outputs.push((amount, *receiver));
    }

    fn set_unlock_time(&mut self, unlock_time: u64) {
        self.unlock_time = unlock_time;
    }

    fn append_extra(&mut self, extra: &[u8]) {
        self.extra.extend_from_slice(extra);
    }

    fn add_input(
        &mut self,
        _keys: &AccountKeys,
        info: &InputKeyInfo,
    ) -> Result<(), cryptonote_wallet_core::crypto::CryptoError> {
        self.inputs.push(info.clone());
        Ok(())
    }

    fn sign_input(
        &mut self,
        input_index: usize,
    ) -> Result<(), cryptonote_wallet_core::crypto::CryptoError> {
        if input_index >= self.inputs.len() {
            return Err(cryptonote_wallet_core::crypto::CryptoError(
                "input index out of range".into(),
            ));
        }
        self.signatures += 1;
        Ok(())
    }

    fn input_total_amount(&self) -> u64 {
        self.inputs.iter().map(|input| input.amount).sum()
    }

    fn output_total_amount(&self) -> u64 {
        self.outputs.iter().map(|(amount, _)| amount).sum()
    }

    fn unlock_time(&self) -> u64 {
        self.unlock_time
    }

    fn extra(&self) -> Vec<u8> {
        self.extra.clone()
    }

    fn transaction_hash(&self) -> Hash {
        fold_digest(&self.transaction_data())
    }

    fn transaction_secret_key(&self) -> SecretKey {
        [0xEE; 32]
    }

    fn transaction_data(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&self.unlock_time.to_le_bytes());
        blob.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for (amount, receiver) in &self.outputs {
            blob.extend_from_slice(&amount.to_le_bytes());
            blob.extend_from_slice(&receiver.spend_public_key);
        }
        for input in &self.inputs {
            blob.extend_from_slice(&input.amount.to_le_bytes());
            for member in &input.outputs {
                blob.extend_from_slice(&member.output_index.to_le_bytes());
                blob.extend_from_slice(&member.target_key);
            }
        }
        blob.extend_from_slice(&self.extra);
        blob
    }
}

// --- transfer container ---

#[derive(Default)]
pub struct ContainerData {
    pub unlocked: Vec<TransactionOutputInformation>,
    pub locked: Vec<TransactionOutputInformation>,
    pub transactions: HashMap<Hash, ContainerTransaction>,
    pub tx_outputs: HashMap<Hash, Vec<TransactionOutputInformation>>,
    pub tx_inputs: HashMap<Hash, Vec<TransactionOutputInformation>>,
}

#[derive(Default)]
pub struct MockContainer {
    pub data: Mutex<ContainerData>,
}

impl MockContainer {
    pub fn seed_output(&self, out: TransactionOutputInformation, locked: bool) {
        let mut data = self.data.lock().unwrap();
        if locked {
            data.locked.push(out);
        } else {
            data.unlocked.push(out);
        }
    }

    pub fn unlock_all(&self) {
        let mut data = self.data.lock().unwrap();
        let locked = std::mem::take(&mut data.locked);
        data.unlocked.extend(locked);
    }

    /// Marks an unlocked output as spent, dropping it from the pool.
    pub fn spend_unlocked(&self, global_output_index: u32) {
        let mut data = self.data.lock().unwrap();
        data.unlocked.retain(|out| out.global_output_index != global_output_index);
    }

    pub fn set_transaction(&self, seen: ContainerTransaction) {
        let mut data = self.data.lock().unwrap();
        data.transactions.insert(seen.info.transaction_hash, seen);
    }

    pub fn remove_transaction(&self, hash: &Hash) {
        self.data.lock().unwrap().transactions.remove(hash);
    }

    pub fn set_transaction_io(
        &self,
        hash: Hash,
        inputs: Vec<TransactionOutputInformation>,
        outputs: Vec<TransactionOutputInformation>,
    ) {
        let mut data = self.data.lock().unwrap();
        data.tx_inputs.insert(hash, inputs);
        data.tx_outputs.insert(hash, outputs);
    }
}

impl TransferContainer for MockContainer {
    fn balance(&self, filter: OutputFilter) -> u64 {
        let data = self.data.lock().unwrap();
        match filter.state {
            StateFilter::Unlocked => data.unlocked.iter().map(|out| out.amount).sum(),
            StateFilter::Locked => data.locked.iter().map(|out| out.amount).sum(),
            StateFilter::All => data
                .unlocked
                .iter()
                .chain(data.locked.iter())
                .map(|out| out.amount)
                .sum(),
        }
    }

    fn outputs(&self, filter: OutputFilter) -> Vec<TransactionOutputInformation> {
        let data = self.data.lock().unwrap();
        match filter.state {
            StateFilter::Unlocked => data.unlocked.clone(),
            StateFilter::Locked => data.locked.clone(),
            StateFilter::All => {
                let mut all = data.unlocked.clone();
                all.extend(data.locked.iter().copied());
                all
            }
        }
    }

    fn transaction_outputs(&self, hash: &Hash, _filter: OutputFilter) -> Vec<TransactionOutputInformation> {
        self.data
            .lock()
            .unwrap()
            .tx_outputs
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    fn transaction_inputs(&self, hash: &Hash, _filter: OutputFilter) -> Vec<TransactionOutputInformation> {
        self.data
            .lock()
            .unwrap()
            .tx_inputs
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    fn transaction_information(&self, hash: &Hash) -> Option<ContainerTransaction> {
        self.data.lock().unwrap().transactions.get(hash).cloned()
    }
}

// --- sync engine ---

#[derive(Default)]
pub struct MockSyncEngine {
    pub containers: Mutex<HashMap<AccountAddress, Arc<MockContainer>>>,
    pub known_blocks: Mutex<Vec<Hash>>,
    pub unconfirmed: Mutex<Vec<Hash>>,
    pub seen_keys: Mutex<Vec<(AccountAddress, Hash, PublicKey)>>,
    pub started: AtomicBool,
    pub start_count: AtomicU32,
    pub stop_count: AtomicU32,
    pub fail_add_unconfirmed: AtomicBool,
    pub fail_remove_unconfirmed: AtomicBool,
}

impl MockSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mock_container(&self, address: &AccountAddress) -> Arc<MockContainer> {
        self.containers
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .expect("no container for address")
    }
}

impl SyncEngine for MockSyncEngine {
    fn subscribe(&self, subscription: AccountSubscription) -> ContainerHandle {
        let mut containers = self.containers.lock().unwrap();
        containers
            .entry(subscription.address)
            .or_insert_with(|| Arc::new(MockContainer::default()))
            .clone()
    }

    fn unsubscribe(&self, address: &AccountAddress) {
        self.containers.lock().unwrap().remove(address);
    }

    fn subscriptions(&self) -> Vec<AccountAddress> {
        self.containers.lock().unwrap().keys().copied().collect()
    }

    fn container(&self, address: &AccountAddress) -> Option<ContainerHandle> {
        self.containers
            .lock()
            .unwrap()
            .get(address)
            .map(|container| handle(container.clone()))
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        self.start_count.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
    }

    fn known_block_hashes(&self) -> Vec<Hash> {
        self.known_blocks.lock().unwrap().clone()
    }

    fn add_unconfirmed_transaction(&self, _blob: &[u8], hash: &Hash) -> Result<(), SyncError> {
        if self.fail_add_unconfirmed.load(Ordering::SeqCst) {
            return Err(SyncError("add_unconfirmed failed".into()));
        }
        self.unconfirmed.lock().unwrap().push(*hash);
        Ok(())
    }

    fn remove_unconfirmed_transaction(&self, hash: &Hash) -> Result<(), SyncError> {
        if self.fail_remove_unconfirmed.load(Ordering::SeqCst) {
            return Err(SyncError("remove_unconfirmed failed".into()));
        }
        self.unconfirmed.lock().unwrap().retain(|known| known != hash);
        Ok(())
    }

    fn register_seen_public_key(&self, address: &AccountAddress, hash: &Hash, key: &PublicKey) {
        self.seen_keys.lock().unwrap().push((*address, *hash, *key));
    }
}

// --- node client ---

pub struct MockNodeClient {
    pub minimal_fee: AtomicU64,
    pub height: AtomicU32,
    pub relayed: Mutex<Vec<Vec<u8>>>,
    pub fail_relay: AtomicBool,
    pub fail_random_outs: AtomicBool,
    /// Candidates returned per requested amount; lets tests starve rings.
    pub outs_per_amount: AtomicU64,
}

impl MockNodeClient {
    pub fn new() -> Self {
        MockNodeClient {
            minimal_fee: AtomicU64::new(0),
            height: AtomicU32::new(1_000),
            relayed: Mutex::new(Vec::new()),
            fail_relay: AtomicBool::new(false),
            fail_random_outs: AtomicBool::new(false),
            outs_per_amount: AtomicU64::new(16),
        }
    }
}

impl NodeClient for MockNodeClient {
    fn get_random_outs_by_amounts(
        &self,
        amounts: Vec<u64>,
        outs_count: u64,
        callback: NodeCallback<Vec<RandomOutsForAmount>>,
    ) {
        if self.fail_random_outs.load(Ordering::SeqCst) {
            callback(Err(NodeError("random outs unavailable".into())));
            return;
        }

        let available = self.outs_per_amount.load(Ordering::SeqCst).min(outs_count);
        let result = amounts
            .iter()
            .enumerate()
            .map(|(amount_index, &amount)| RandomOutsForAmount {
                amount,
                outs: (0..available)
                    .map(|candidate| RandomOutputEntry {
                        global_amount_index: 10_000 + amount_index as u64 * 100 + candidate,
                        out_key: [candidate as u8 + 1; 32],
                    })
                    .collect(),
            })
            .collect();
        callback(Ok(result));
    }

    fn relay_transaction(&self, transaction_blob: Vec<u8>, callback: NodeCallback<()>) {
        if self.fail_relay.load(Ordering::SeqCst) {
            callback(Err(NodeError("relay rejected".into())));
            return;
        }
        self.relayed.lock().unwrap().push(transaction_blob);
        callback(Ok(()));
    }

    fn last_known_block_height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    fn minimal_fee(&self) -> u64 {
        self.minimal_fee.load(Ordering::SeqCst)
    }
}

// --- harness ---

pub struct TestWallet {
    pub wallet: Wallet,
    pub node: Arc<MockNodeClient>,
    pub sync: Arc<MockSyncEngine>,
    pub crypto: Arc<MockCryptoOps>,
    pub currency: CurrencyParams,
    next_global_index: AtomicU32,
}

pub fn test_currency() -> CurrencyParams {
    CurrencyParams {
        genesis_block_hash: [0xAB; 32],
        default_dust_threshold: 10,
        fusion_tx_min_input_count: 3,
        fusion_tx_min_in_out_count_ratio: 3,
        fusion_tx_max_size: 8_000,
        ..CurrencyParams::default()
    }
}

pub fn harness() -> TestWallet {
    harness_with_currency(test_currency())
}

pub fn harness_with_currency(currency: CurrencyParams) -> TestWallet {
    let node = Arc::new(MockNodeClient::new());
    let sync = Arc::new(MockSyncEngine::new());
    let crypto = Arc::new(MockCryptoOps::new());
    let wallet = Wallet::new(
        currency.clone(),
        node.clone(),
        sync.clone(),
        crypto.clone(),
        Arc::new(BincodeCodec::new()),
        SOFT_LOCK_TIME,
    );
    TestWallet {
        wallet,
        node,
        sync,
        crypto,
        currency,
        next_global_index: AtomicU32::new(100),
    }
}

/// Coerces a concrete mock container into the wallet-facing handle type.
pub fn handle(container: Arc<MockContainer>) -> ContainerHandle {
    container
}

impl TestWallet {
    pub fn container_of(&self, address: &str) -> Arc<MockContainer> {
        let parsed = self
            .currency
            .parse_account_address_string(address)
            .expect("test address parses");
        self.sync.mock_container(&parsed)
    }

    pub fn container_handle_of(&self, address: &str) -> ContainerHandle {
        handle(self.container_of(address))
    }

    /// Credits `address` with one spendable output observed in a coinbase
    /// style transaction at `block_height`, driving the wallet through the
    /// regular container update path.
    pub fn fund(&self, address: &str, amount: u64, block_height: u32, hash: Hash, locked: bool) {
        let container = self.container_of(address);
        let global_output_index = self.next_global_index.fetch_add(1, Ordering::SeqCst);
        container.seed_output(
            TransactionOutputInformation {
                output_type: OutputType::Key,
                amount,
                global_output_index,
                output_in_transaction: 0,
                transaction_public_key: [3u8; 32],
                output_key: [4u8; 32],
                transaction_hash: hash,
            },
            locked,
        );
        container.set_transaction(ContainerTransaction {
            info: TransactionInformation {
                transaction_hash: hash,
                block_height,
                timestamp: 1_650_000_000,
                unlock_time: 0,
                total_amount_in: 0,
                total_amount_out: amount,
                extra: Vec::new(),
            },
            inputs_amount: 0,
            outputs_amount: amount,
        });
        self.wallet.on_transaction_updated(&hash, &[handle(container)]);
    }

    /// Pushes a sync-completed fence and drains the queue up to it.
    pub fn events_until_fence(&self) -> Vec<WalletEvent> {
        self.wallet.on_sync_completed();
        let mut events = Vec::new();
        loop {
            let event = self.wallet.get_event().expect("event queue alive");
            if event == WalletEvent::SyncCompleted {
                return events;
            }
            events.push(event);
        }
    }
}
