use serde::{Deserialize, Serialize};

pub type Hash = [u8; 32];
pub type PublicKey = [u8; 32];
pub type SecretKey = [u8; 32];

/// Sentinel secret for watch-only records; the wallet as a whole is in
/// tracking mode when its first record carries this.
pub const NULL_SECRET_KEY: SecretKey = [0u8; 32];

/// Block height of a transaction that has not been mined yet.
pub const UNCONFIRMED_TRANSACTION_HEIGHT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

/// The two public halves of a CryptoNote account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTransactionState {
    Created,
    Succeeded,
    Failed,
    Cancelled,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub state: WalletTransactionState,
    pub timestamp: u64,
    pub block_height: u32,
    pub hash: Hash,
    /// Net change to this wallet; negative when the wallet spends.
    pub total_amount: i64,
    pub fee: u64,
    pub creation_time: u64,
    pub unlock_time: u64,
    pub extra: Vec<u8>,
    /// One-time transaction secret, present for outgoing transactions only.
    pub secret_key: Option<SecretKey>,
    pub is_base: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletTransferType {
    Usual,
    Donation,
    Change,
}

/// One per-address line item of a transaction. An empty address stands for
/// the unknown counterparty row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransfer {
    pub transfer_type: WalletTransferType,
    pub address: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletOrder {
    pub address: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DonationSettings {
    pub address: String,
    pub threshold: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TransactionParameters {
    pub source_addresses: Vec<String>,
    pub destinations: Vec<WalletOrder>,
    pub fee: u64,
    pub mix_in: u64,
    pub extra: Vec<u8>,
    pub unlock_timestamp: u64,
    pub donation: DonationSettings,
    pub change_destination: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    TransactionCreated { transaction_index: usize },
    TransactionUpdated { transaction_index: usize },
    BalanceUnlocked,
    SyncProgressUpdated { processed_block_count: u32, total_block_count: u32 },
    SyncCompleted,
}

#[derive(Clone, Debug)]
pub struct WalletTransactionWithTransfers {
    pub transaction: WalletTransaction,
    pub transfers: Vec<WalletTransfer>,
}

#[derive(Clone, Debug)]
pub struct TransactionsInBlockInfo {
    pub block_hash: Hash,
    pub transactions: Vec<WalletTransactionWithTransfers>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletTrackingMode {
    NoAddresses,
    Tracking,
    NotTracking,
}

/// Outcome of a fusion readiness estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FusionEstimate {
    pub fusion_ready_count: usize,
    pub total_output_count: usize,
}
