//! Wallet file codec boundary and the stock bincode implementation.
//!
//! The snapshot is what the wallet hands over for persistence; how it is
//! framed on disk is the codec's business. [`BincodeCodec`] writes a small
//! header with a salted password digest followed by the bincode body.

use std::io::{Read, Write};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::error::WalletError;
use crate::types::{Hash, PublicKey, SecretKey, WalletTransaction, WalletTransfer};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("wallet file i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet file is malformed: {0}")]
    Format(String),
    #[error("wrong password")]
    WrongPassword,
}

impl From<CodecError> for WalletError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::WrongPassword => WalletError::WrongPassword,
            other => WalletError::Codec(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub spend_public_key: PublicKey,
    pub spend_secret_key: SecretKey,
    pub creation_timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnlockJobSnapshot {
    pub unlock_height: u32,
    pub transaction_hash: Hash,
    /// Spend key of the record whose container the job watches.
    pub spend_public_key: PublicKey,
}

/// Everything the wallet persists. `details` and `cache` are optional
/// sections controlled by the save flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub view_public_key: PublicKey,
    pub view_secret_key: SecretKey,
    pub records: Vec<RecordSnapshot>,
    pub details: Option<WalletDetails>,
    pub cache: Option<WalletCache>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletDetails {
    pub transactions: Vec<WalletTransaction>,
    pub transfers: Vec<(usize, WalletTransfer)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletCache {
    pub block_hashes: Vec<Hash>,
    pub unlock_jobs: Vec<UnlockJobSnapshot>,
    pub uncommitted: Vec<(usize, Vec<u8>)>,
    pub actual_balance: u64,
    pub pending_balance: u64,
    pub record_balances: Vec<(PublicKey, u64, u64)>,
}

pub trait WalletCodec: Send + Sync {
    fn save(
        &self,
        password: &str,
        snapshot: &WalletSnapshot,
        destination: &mut dyn Write,
    ) -> std::result::Result<(), CodecError>;

    fn load(
        &self,
        password: &str,
        source: &mut dyn Read,
    ) -> std::result::Result<WalletSnapshot, CodecError>;
}

const MAGIC: &[u8; 8] = b"cnwallet";
const SALT_LEN: usize = 16;

/// Stock codec: magic, salt, keccak(salt || password), bincode body.
#[derive(Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        BincodeCodec
    }
}

fn password_digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

impl WalletCodec for BincodeCodec {
    fn save(
        &self,
        password: &str,
        snapshot: &WalletSnapshot,
        destination: &mut dyn Write,
    ) -> std::result::Result<(), CodecError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        destination.write_all(MAGIC)?;
        destination.write_all(&salt)?;
        destination.write_all(&password_digest(&salt, password))?;

        let body = bincode::serialize(snapshot)
            .map_err(|e| CodecError::Format(e.to_string()))?;
        destination.write_all(&body)?;
        Ok(())
    }

    fn load(
        &self,
        password: &str,
        source: &mut dyn Read,
    ) -> std::result::Result<WalletSnapshot, CodecError> {
        let mut magic = [0u8; 8];
        source.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CodecError::Format("bad magic".into()));
        }

        let mut salt = [0u8; SALT_LEN];
        source.read_exact(&mut salt)?;
        let mut digest = [0u8; 32];
        source.read_exact(&mut digest)?;
        if digest != password_digest(&salt, password) {
            return Err(CodecError::WrongPassword);
        }

        let mut body = Vec::new();
        source.read_to_end(&mut body)?;
        bincode::deserialize(&body).map_err(|e| CodecError::Format(e.to_string()))
    }
}
