//! Boundary to the blockchain synchronizer and its per-subscription
//! transfer containers. The engine owns the containers; the wallet holds
//! shared handles whose lifetime is bounded by the subscription.

use std::sync::Arc;

use thiserror::Error;

use crate::types::{AccountAddress, Hash, PublicKey, SecretKey};

#[derive(Clone, Debug, Error)]
#[error("sync engine failure: {0}")]
pub struct SyncError(pub String);

/// State filter over container outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateFilter {
    Unlocked,
    Locked,
    All,
}

/// Type filter over container outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeFilter {
    Key,
    Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFilter {
    pub types: TypeFilter,
    pub state: StateFilter,
}

impl OutputFilter {
    pub const KEY_UNLOCKED: OutputFilter = OutputFilter { types: TypeFilter::Key, state: StateFilter::Unlocked };
    pub const KEY_ALL: OutputFilter = OutputFilter { types: TypeFilter::Key, state: StateFilter::All };
    pub const ALL_UNLOCKED: OutputFilter = OutputFilter { types: TypeFilter::Any, state: StateFilter::Unlocked };
    pub const ALL_LOCKED: OutputFilter = OutputFilter { types: TypeFilter::Any, state: StateFilter::Locked };
    pub const ALL: OutputFilter = OutputFilter { types: TypeFilter::Any, state: StateFilter::All };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputType {
    Invalid,
    Key,
}

/// One output a container has attributed to its subscription.
#[derive(Clone, Copy, Debug)]
pub struct TransactionOutputInformation {
    pub output_type: OutputType,
    pub amount: u64,
    pub global_output_index: u32,
    pub output_in_transaction: u32,
    pub transaction_public_key: PublicKey,
    pub output_key: PublicKey,
    pub transaction_hash: Hash,
}

/// Chain-level facts a container knows about one transaction.
#[derive(Clone, Debug)]
pub struct TransactionInformation {
    pub transaction_hash: Hash,
    pub block_height: u32,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub total_amount_in: u64,
    pub total_amount_out: u64,
    pub extra: Vec<u8>,
}

/// [`TransactionInformation`] plus the slice of it this container saw.
#[derive(Clone, Debug)]
pub struct ContainerTransaction {
    pub info: TransactionInformation,
    pub inputs_amount: u64,
    pub outputs_amount: u64,
}

pub trait TransferContainer: Send + Sync {
    fn balance(&self, filter: OutputFilter) -> u64;

    fn outputs(&self, filter: OutputFilter) -> Vec<TransactionOutputInformation>;

    fn transaction_outputs(&self, hash: &Hash, filter: OutputFilter) -> Vec<TransactionOutputInformation>;

    fn transaction_inputs(&self, hash: &Hash, filter: OutputFilter) -> Vec<TransactionOutputInformation>;

    fn transaction_information(&self, hash: &Hash) -> Option<ContainerTransaction>;
}

pub type ContainerHandle = Arc<dyn TransferContainer>;

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncStart {
    pub height: u32,
    pub timestamp: u64,
}

#[derive(Clone, Debug)]
pub struct AccountSubscription {
    pub address: AccountAddress,
    pub view_secret_key: SecretKey,
    pub spend_secret_key: SecretKey,
    pub sync_start: SyncStart,
    pub transaction_spendable_age: u32,
}

pub trait SyncEngine: Send + Sync {
    fn subscribe(&self, subscription: AccountSubscription) -> ContainerHandle;

    fn unsubscribe(&self, address: &AccountAddress);

    fn subscriptions(&self) -> Vec<AccountAddress>;

    fn container(&self, address: &AccountAddress) -> Option<ContainerHandle>;

    fn start(&self);

    fn stop(&self);

    /// Block hashes the engine has fully processed for this view key.
    fn known_block_hashes(&self) -> Vec<Hash>;

    /// Registers a not-yet-mined transaction so containers begin observing
    /// it before the chain confirms it.
    fn add_unconfirmed_transaction(
        &self,
        transaction_blob: &[u8],
        transaction_hash: &Hash,
    ) -> std::result::Result<(), SyncError>;

    fn remove_unconfirmed_transaction(
        &self,
        transaction_hash: &Hash,
    ) -> std::result::Result<(), SyncError>;

    /// Re-registers an already-seen one-time output key for a subscription,
    /// so that restored wallets keep recognizing outputs whose keys were
    /// reused across transactions.
    fn register_seen_public_key(
        &self,
        address: &AccountAddress,
        transaction_hash: &Hash,
        output_key: &PublicKey,
    );
}
