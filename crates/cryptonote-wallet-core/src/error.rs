//! Error taxonomy surfaced by every public wallet operation.

use thiserror::Error;

use crate::node::NodeError;
use crate::sync::SyncError;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet is not initialized")]
    NotInitialized,
    #[error("wallet is already initialized")]
    AlreadyInitialized,
    #[error("operation is not permitted in the current wallet state")]
    WrongState,
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("wrong password")]
    WrongPassword,
    #[error("bad address")]
    BadAddress,
    #[error("address already exists")]
    AddressAlreadyExists,
    #[error("object not found")]
    ObjectNotFound,
    #[error("requested wallet record is not found")]
    WalletNotFound,
    #[error("index is out of range")]
    IndexOutOfRange,
    #[error("destination list is empty")]
    ZeroDestination,
    #[error("wrong amount")]
    WrongAmount,
    #[error("amount sum overflow")]
    SumOverflow,
    #[error("fee is too small")]
    FeeTooSmall,
    #[error("transaction size is too big")]
    TransactionSizeTooBig,
    #[error("transaction extra is too large")]
    ExtraTooLarge,
    #[error("mixin count is too big")]
    MixinCountTooBig,
    #[error("wallet is in tracking mode")]
    TrackingMode,
    #[error("key generation failed")]
    KeyGenerationError,
    #[error("change destination address is required")]
    ChangeAddressRequired,
    #[error("change destination address is not found in the wallet")]
    ChangeAddressNotFound,
    #[error("transaction can not be committed")]
    TxTransferImpossible,
    #[error("transaction can not be cancelled")]
    TxCancelImpossible,
    #[error("wrong parameters")]
    WrongParameters,
    #[error("internal wallet error")]
    InternalWalletError,
    #[error("wallet file codec failure: {0}")]
    Codec(String),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
