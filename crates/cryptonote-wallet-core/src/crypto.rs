//! Boundary to the cryptographic backend: key handling, randomness and the
//! transaction builder used by the send pipeline. The wallet never touches
//! curve math directly; it drives these traits.

use thiserror::Error;

use crate::types::{AccountAddress, Hash, PublicKey, SecretKey};

#[derive(Debug, Error)]
#[error("crypto backend failure: {0}")]
pub struct CryptoError(pub String);

/// Keys needed to spend from one wallet record.
#[derive(Clone, Copy, Debug)]
pub struct AccountKeys {
    pub address: AccountAddress,
    pub view_secret_key: SecretKey,
    pub spend_secret_key: SecretKey,
}

/// One ring member referenced by global output index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalOutput {
    pub output_index: u32,
    pub target_key: PublicKey,
}

/// Position of the real spent output inside its ring.
#[derive(Clone, Copy, Debug)]
pub struct RealOutput {
    pub transaction_public_key: PublicKey,
    /// Index of the real member within [`InputKeyInfo::outputs`].
    pub transaction_index: usize,
    pub output_in_transaction: u32,
}

#[derive(Clone, Debug)]
pub struct InputKeyInfo {
    pub amount: u64,
    pub outputs: Vec<GlobalOutput>,
    pub real_output: RealOutput,
}

pub trait CryptoOps: Send + Sync {
    fn generate_keys(&self) -> (PublicKey, SecretKey);

    /// Derives the public key for `secret`; `None` when the scalar is not a
    /// valid secret key.
    fn secret_key_to_public_key(&self, secret: &SecretKey) -> Option<PublicKey>;

    fn check_key(&self, public: &PublicKey) -> bool;

    /// 32 bytes of cryptographic randomness, used to seed the wallet's
    /// deterministic shuffles.
    fn random_seed(&self) -> [u8; 32];

    fn create_transaction(&self) -> Box<dyn TransactionBuilder>;
}

/// Incremental construction of one signed transaction. Inputs must be added
/// in the same order they were selected, and signed in that order.
pub trait TransactionBuilder {
    fn add_output(&mut self, amount: u64, receiver: &AccountAddress);

    fn set_unlock_time(&mut self, unlock_time: u64);

    fn append_extra(&mut self, extra: &[u8]);

    /// Adds a ring-signed input. The builder derives and retains the
    /// ephemeral keys needed later by [`TransactionBuilder::sign_input`].
    fn add_input(
        &mut self,
        keys: &AccountKeys,
        info: &InputKeyInfo,
    ) -> std::result::Result<(), CryptoError>;

    fn sign_input(&mut self, input_index: usize) -> std::result::Result<(), CryptoError>;

    fn input_total_amount(&self) -> u64;

    fn output_total_amount(&self) -> u64;

    fn unlock_time(&self) -> u64;

    fn extra(&self) -> Vec<u8>;

    fn transaction_hash(&self) -> Hash;

    fn transaction_secret_key(&self) -> SecretKey;

    /// Serialized transaction blob as it would be relayed.
    fn transaction_data(&self) -> Vec<u8>;
}
