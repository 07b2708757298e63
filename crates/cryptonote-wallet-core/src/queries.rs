//! Read-side API: balances, addresses, blocks and transaction history.

use crate::error::{Result, WalletError};
use crate::types::{
    Hash, KeyPair, SecretKey, TransactionsInBlockInfo, WalletTrackingMode, WalletTransaction,
    WalletTransactionState, WalletTransactionWithTransfers, WalletTransfer,
    UNCONFIRMED_TRANSACTION_HEIGHT,
};
use crate::wallet::Wallet;

impl Wallet {
    pub fn actual_balance(&self) -> Result<u64> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.actual_balance)
    }

    pub fn pending_balance(&self) -> Result<u64> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.pending_balance)
    }

    pub fn actual_balance_of(&self, address: &str) -> Result<u64> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let parsed = self.parse_address(address)?;
        let record = state
            .keystore
            .by_spend_key(&parsed.spend_public_key)
            .ok_or(WalletError::WalletNotFound)?;
        Ok(record.actual_balance)
    }

    pub fn pending_balance_of(&self, address: &str) -> Result<u64> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let parsed = self.parse_address(address)?;
        let record = state
            .keystore
            .by_spend_key(&parsed.spend_public_key)
            .ok_or(WalletError::WalletNotFound)?;
        Ok(record.pending_balance)
    }

    pub fn address_count(&self) -> Result<usize> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.keystore.len())
    }

    pub fn address(&self, index: usize) -> Result<String> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let record = state.keystore.get(index).ok_or(WalletError::IndexOutOfRange)?;
        Ok(self.address_of_record(&state, &record.spend_public_key))
    }

    pub fn address_spend_key_pair(&self, index: usize) -> Result<KeyPair> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let record = state.keystore.get(index).ok_or(WalletError::IndexOutOfRange)?;
        Ok(KeyPair {
            public_key: record.spend_public_key,
            secret_key: record.spend_secret_key,
        })
    }

    pub fn address_spend_key_pair_of(&self, address: &str) -> Result<KeyPair> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let parsed = self.parse_address(address)?;
        let record = state
            .keystore
            .by_spend_key(&parsed.spend_public_key)
            .ok_or(WalletError::ObjectNotFound)?;
        Ok(KeyPair {
            public_key: record.spend_public_key,
            secret_key: record.spend_secret_key,
        })
    }

    pub fn tracking_mode(&self) -> Result<WalletTrackingMode> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        Ok(state.keystore.tracking_mode())
    }

    pub fn block_count(&self) -> Result<u32> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        debug_assert!(!state.block_log.is_empty());
        Ok(state.block_log.len() as u32)
    }

    pub fn block_hashes(&self, start_block_index: u32, count: usize) -> Result<Vec<Hash>> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.block_log.range(start_block_index as usize, count).to_vec())
    }

    pub fn transaction_count(&self) -> Result<usize> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.ledger.len())
    }

    pub fn transaction(&self, transaction_index: usize) -> Result<WalletTransaction> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        state
            .ledger
            .get(transaction_index)
            .cloned()
            .ok_or(WalletError::IndexOutOfRange)
    }

    pub fn transaction_by_hash(&self, transaction_hash: &Hash) -> Result<WalletTransactionWithTransfers> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let index = state
            .ledger
            .index_of(transaction_hash)
            .ok_or(WalletError::ObjectNotFound)?;
        Ok(WalletTransactionWithTransfers {
            transaction: state.ledger.get(index).cloned().expect("index from ledger"),
            transfers: state.ledger.transfers_of(index),
        })
    }

    pub fn transaction_secret_key(&self, transaction_index: usize) -> Result<SecretKey> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        let transaction = state
            .ledger
            .get(transaction_index)
            .ok_or(WalletError::IndexOutOfRange)?;
        transaction.secret_key.ok_or(WalletError::ObjectNotFound)
    }

    pub fn transaction_transfer_count(&self, transaction_index: usize) -> Result<usize> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        Ok(state.ledger.transfer_count(transaction_index))
    }

    pub fn transaction_transfer(
        &self,
        transaction_index: usize,
        transfer_index: usize,
    ) -> Result<WalletTransfer> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        state
            .ledger
            .transfer_at(transaction_index, transfer_index)
            .cloned()
            .ok_or(WalletError::IndexOutOfRange)
    }

    /// SUCCEEDED transactions grouped per block, for `count` blocks starting
    /// at `start_block_index`.
    pub fn transactions_in_blocks(
        &self,
        start_block_index: u32,
        count: usize,
    ) -> Result<Vec<TransactionsInBlockInfo>> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        if count == 0 {
            return Err(WalletError::WrongParameters);
        }

        let mut result = Vec::new();
        let start = start_block_index as usize;
        if start >= state.block_log.len() {
            return Ok(result);
        }

        let stop = state.block_log.len().min(start + count);
        for height in start..stop {
            let block_hash = *state.block_log.hash_at(height).expect("height in range");
            let mut transactions = Vec::new();
            for &transaction_index in state.ledger.indices_at_height(height as u32) {
                let transaction = state
                    .ledger
                    .get(transaction_index)
                    .expect("index from height map");
                if transaction.state == WalletTransactionState::Succeeded {
                    transactions.push(WalletTransactionWithTransfers {
                        transaction: transaction.clone(),
                        transfers: state.ledger.transfers_of(transaction_index),
                    });
                }
            }
            result.push(TransactionsInBlockInfo { block_hash, transactions });
        }

        Ok(result)
    }

    /// As [`Wallet::transactions_in_blocks`], starting from a known block
    /// hash. An unknown hash yields an empty list.
    pub fn transactions_by_block_hash(
        &self,
        block_hash: &Hash,
        count: usize,
    ) -> Result<Vec<TransactionsInBlockInfo>> {
        let start_block_index = {
            let state = self.state.lock();
            self.ensure_initialized(&state)?;
            self.ensure_not_stopped()?;
            state.block_log.height_of(block_hash)
        };

        match start_block_index {
            Some(height) => self.transactions_in_blocks(height as u32, count),
            None => Ok(Vec::new()),
        }
    }

    pub fn unconfirmed_transactions(&self) -> Result<Vec<WalletTransactionWithTransfers>> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        let mut result = Vec::new();
        for &transaction_index in state.ledger.indices_at_height(UNCONFIRMED_TRANSACTION_HEIGHT) {
            let transaction = state
                .ledger
                .get(transaction_index)
                .expect("index from height map");
            if transaction.state != WalletTransactionState::Succeeded {
                continue;
            }
            result.push(WalletTransactionWithTransfers {
                transaction: transaction.clone(),
                transfers: state.ledger.transfers_of(transaction_index),
            });
        }
        Ok(result)
    }

    /// Ledger indices of transactions built with `make_transaction` and not
    /// yet committed.
    pub fn delayed_transaction_indexes(&self) -> Result<Vec<usize>> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        self.ensure_not_tracking(&state)?;
        Ok(state.uncommitted.indexes())
    }
}
