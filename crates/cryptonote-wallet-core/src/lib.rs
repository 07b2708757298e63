//! cryptonote-wallet-core — the wallet runtime for a CryptoNote currency.
//!
//! Pieces:
//! - Wallet: lifecycle, key store, balances, the ready-event critical section
//! - TransactionLedger + reconciliation: per-address transfer rows kept in
//!   step with what the sync engine's containers observed
//! - Send pipeline: input selection, mixin rings, decomposition, donation,
//!   change, two-phase save+relay with rollback
//! - Fusion: zero-fee dust consolidation
//! - EventQueue: blocking consumption of wallet events
//! - Boundaries: NodeClient, SyncEngine/TransferContainer, CryptoOps,
//!   WalletCodec traits plus the concrete CurrencyParams value object
//!
//! This crate holds no networking or curve math; it drives those through
//! the boundary traits.

mod block_log;
pub mod codec;
mod completion;
pub mod crypto;
pub mod currency;
pub mod error;
mod events;
mod fusion;
mod keystore;
mod ledger;
pub mod node;
mod pipeline;
mod queries;
mod reconcile;
pub mod sync;
pub mod types;
mod uncommitted;
mod unlock;
mod wallet;

pub use codec::{BincodeCodec, WalletCodec, WalletSnapshot};
pub use crypto::{
    AccountKeys, CryptoError, CryptoOps, GlobalOutput, InputKeyInfo, RealOutput, TransactionBuilder,
};
pub use currency::CurrencyParams;
pub use error::{Result, WalletError};
pub use node::{NodeCallback, NodeClient, NodeError, RandomOutputEntry, RandomOutsForAmount};
pub use sync::{
    AccountSubscription, ContainerHandle, ContainerTransaction, OutputFilter, OutputType,
    StateFilter, SyncEngine, SyncError, SyncStart, TransactionInformation,
    TransactionOutputInformation, TransferContainer, TypeFilter,
};
pub use types::{
    AccountAddress, DonationSettings, FusionEstimate, Hash, KeyPair, PublicKey, SecretKey,
    TransactionParameters, TransactionsInBlockInfo, WalletEvent, WalletOrder, WalletTrackingMode,
    WalletTransaction, WalletTransactionState, WalletTransactionWithTransfers, WalletTransfer,
    WalletTransferType, NULL_SECRET_KEY, UNCONFIRMED_TRANSACTION_HEIGHT,
};
pub use wallet::Wallet;
