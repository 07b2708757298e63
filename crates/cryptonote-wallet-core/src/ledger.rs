//! Ordered log of wallet transactions plus the adjacent transfer list.
//!
//! Transactions live in a dense vector (the transaction index used across
//! the whole wallet is the position here) with side maps by hash and block
//! height. Transfers are `(transaction index, transfer)` pairs kept sorted
//! by transaction index, so a transaction's transfer block is a contiguous
//! range.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{
    Hash, WalletTransaction, WalletTransactionState, WalletTransfer, WalletTransferType,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TransferAmounts {
    pub input: i64,
    pub output: i64,
}

#[derive(Default)]
pub(crate) struct TransactionLedger {
    transactions: Vec<WalletTransaction>,
    by_hash: HashMap<Hash, usize>,
    by_height: BTreeMap<u32, Vec<usize>>,
    transfers: Vec<(usize, WalletTransfer)>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn get(&self, index: usize) -> Option<&WalletTransaction> {
        self.transactions.get(index)
    }

    pub fn index_of(&self, hash: &Hash) -> Option<usize> {
        self.by_hash.get(hash).copied()
    }

    pub fn indices_at_height(&self, height: u32) -> &[usize] {
        self.by_height.get(&height).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, transaction: WalletTransaction) -> usize {
        let index = self.transactions.len();
        self.by_hash.insert(transaction.hash, index);
        self.by_height.entry(transaction.block_height).or_default().push(index);
        self.transactions.push(transaction);
        index
    }

    /// Applies `f` to the transaction, keeping the height side index in
    /// step when the block height changes.
    pub fn modify<F: FnOnce(&mut WalletTransaction)>(&mut self, index: usize, f: F) {
        let old_height = self.transactions[index].block_height;
        f(&mut self.transactions[index]);
        let new_height = self.transactions[index].block_height;
        if new_height != old_height {
            if let Some(bucket) = self.by_height.get_mut(&old_height) {
                bucket.retain(|&i| i != index);
                if bucket.is_empty() {
                    self.by_height.remove(&old_height);
                }
            }
            let bucket = self.by_height.entry(new_height).or_default();
            let position = bucket.partition_point(|&i| i < index);
            bucket.insert(position, index);
        }
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.by_hash.clear();
        self.by_height.clear();
        self.transfers.clear();
    }

    /// Rebuilds the ledger from persisted state.
    pub fn restore(
        &mut self,
        transactions: Vec<WalletTransaction>,
        transfers: Vec<(usize, WalletTransfer)>,
    ) {
        self.clear();
        for transaction in transactions {
            self.push(transaction);
        }
        self.transfers = transfers;
    }

    // --- transfer block primitives ---

    /// Contiguous `[start, end)` range of the transfer list belonging to
    /// one transaction.
    pub fn transfers_range(&self, transaction_index: usize) -> (usize, usize) {
        let start = self.transfers.partition_point(|(i, _)| *i < transaction_index);
        let end = self.transfers.partition_point(|(i, _)| *i <= transaction_index);
        (start, end)
    }

    pub fn transfer_count(&self, transaction_index: usize) -> usize {
        let (start, end) = self.transfers_range(transaction_index);
        end - start
    }

    pub fn transfer_at(&self, transaction_index: usize, transfer_index: usize) -> Option<&WalletTransfer> {
        let (start, end) = self.transfers_range(transaction_index);
        let position = start + transfer_index;
        (position < end).then(|| &self.transfers[position].1)
    }

    pub fn transfers_of(&self, transaction_index: usize) -> Vec<WalletTransfer> {
        let (start, end) = self.transfers_range(transaction_index);
        self.transfers[start..end].iter().map(|(_, t)| t.clone()).collect()
    }

    /// Appends an outgoing transfer at the tail of the list; used only for
    /// the freshly inserted last transaction.
    pub fn push_transfer(&mut self, transaction_index: usize, transfer: WalletTransfer) {
        debug_assert!(self.transfers.last().map_or(true, |(i, _)| *i <= transaction_index));
        self.transfers.push((transaction_index, transfer));
    }

    /// Per-address input/output sums of the known (non-empty-address) rows.
    pub fn known_transfers_map(
        &self,
        transaction_index: usize,
        first_transfer_index: usize,
    ) -> HashMap<String, TransferAmounts> {
        let mut map: HashMap<String, TransferAmounts> = HashMap::new();
        let mut i = first_transfer_index;
        while i < self.transfers.len() && self.transfers[i].0 == transaction_index {
            let transfer = &self.transfers[i].1;
            if !transfer.address.is_empty() {
                let entry = map.entry(transfer.address.clone()).or_default();
                if transfer.amount < 0 {
                    entry.input += transfer.amount;
                } else {
                    entry.output += transfer.amount;
                }
            }
            i += 1;
        }
        map
    }

    /// Sets the single `(address, direction)` row to `amount`, merging
    /// duplicates into the first row and appending the row if absent.
    pub fn adjust_transfer(
        &mut self,
        transaction_index: usize,
        first_transfer_index: usize,
        address: &str,
        amount: i64,
    ) -> bool {
        debug_assert!(amount != 0);

        let mut updated = false;
        let update_outputs = amount > 0;
        let mut first_found = false;
        let mut i = first_transfer_index;
        while i < self.transfers.len() && self.transfers[i].0 == transaction_index {
            let transfer = &mut self.transfers[i].1;
            let is_output = transfer.amount > 0;
            if is_output == update_outputs && transfer.address == address {
                if first_found {
                    self.transfers.remove(i);
                    updated = true;
                    continue;
                }
                if transfer.amount != amount {
                    transfer.amount = amount;
                    updated = true;
                }
                first_found = true;
            }
            i += 1;
        }

        if !first_found {
            let transfer = WalletTransfer {
                transfer_type: WalletTransferType::Usual,
                address: address.to_string(),
                amount,
            };
            self.transfers.insert(i, (transaction_index, transfer));
            updated = true;
        }

        updated
    }

    /// Inserts a new row at the end of the transaction's transfer block.
    pub fn append_transfer(
        &mut self,
        transaction_index: usize,
        first_transfer_index: usize,
        address: &str,
        amount: i64,
    ) {
        let mut i = first_transfer_index;
        while i < self.transfers.len() && self.transfers[i].0 <= transaction_index {
            i += 1;
        }
        let transfer = WalletTransfer {
            transfer_type: WalletTransferType::Usual,
            address: address.to_string(),
            amount,
        };
        self.transfers.insert(i, (transaction_index, transfer));
    }

    pub fn erase_transfers(
        &mut self,
        transaction_index: usize,
        first_transfer_index: usize,
        mut predicate: impl FnMut(bool, &str) -> bool,
    ) -> bool {
        let mut erased = false;
        let mut i = first_transfer_index;
        while i < self.transfers.len() && self.transfers[i].0 == transaction_index {
            let is_output = self.transfers[i].1.amount > 0;
            if predicate(is_output, &self.transfers[i].1.address) {
                self.transfers.remove(i);
                erased = true;
            } else {
                i += 1;
            }
        }
        erased
    }

    pub fn erase_transfers_by_address(
        &mut self,
        transaction_index: usize,
        first_transfer_index: usize,
        address: &str,
        erase_outputs: bool,
    ) -> bool {
        self.erase_transfers(transaction_index, first_transfer_index, |is_output, transfer_address| {
            erase_outputs == is_output && transfer_address == address
        })
    }

    /// Erases rows of the given direction whose address is not in
    /// `known_addresses`.
    pub fn erase_foreign_transfers(
        &mut self,
        transaction_index: usize,
        first_transfer_index: usize,
        known_addresses: &HashSet<String>,
        erase_outputs: bool,
    ) -> bool {
        self.erase_transfers(transaction_index, first_transfer_index, |is_output, transfer_address| {
            erase_outputs == is_output && !known_addresses.contains(transfer_address)
        })
    }

    /// Single pass over the transfer list removing one wallet address:
    /// output rows of `address` are dropped into the transaction's total,
    /// input rows are demoted to the unknown row, and transactions with no
    /// wallet-owned rows left are marked deleted. Returns the indices of
    /// transactions whose transfers changed.
    pub fn delete_transfers_for_address(
        &mut self,
        address: &str,
        is_my_address: impl Fn(&str) -> bool,
        deleted_transaction_indexes: &mut Vec<usize>,
    ) -> Vec<usize> {
        debug_assert!(!address.is_empty());

        let mut deleted_inputs: i64 = 0;
        let mut deleted_outputs: i64 = 0;
        let mut unknown_inputs: i64 = 0;
        let mut transfers_left = false;
        let mut first_transaction_transfer = 0usize;
        let mut updated_transactions = Vec::new();

        let mut i = 0usize;
        while i < self.transfers.len() {
            {
                let transfer = &mut self.transfers[i].1;
                if transfer.address == address {
                    if transfer.amount >= 0 {
                        deleted_outputs += transfer.amount;
                    } else {
                        deleted_inputs += transfer.amount;
                        transfer.address = String::new();
                    }
                } else if transfer.address.is_empty() {
                    if transfer.amount < 0 {
                        unknown_inputs += transfer.amount;
                    }
                } else if is_my_address(&transfer.address) {
                    transfers_left = true;
                }
            }

            let transaction_index = self.transfers[i].0;
            let last_of_group =
                i + 1 == self.transfers.len() || self.transfers[i + 1].0 != transaction_index;
            if last_of_group {
                let before_merge = self.transfers.len();
                if deleted_inputs != 0 {
                    self.adjust_transfer(
                        transaction_index,
                        first_transaction_transfer,
                        "",
                        deleted_inputs + unknown_inputs,
                    );
                }
                debug_assert!(before_merge >= self.transfers.len());
                i -= before_merge - self.transfers.len();

                self.modify(transaction_index, |transaction| {
                    transaction.total_amount -= deleted_inputs + deleted_outputs;
                    if !transfers_left {
                        transaction.state = WalletTransactionState::Deleted;
                    }
                });

                if !transfers_left {
                    deleted_transaction_indexes.push(transaction_index);
                }
                if deleted_inputs != 0 || deleted_outputs != 0 {
                    updated_transactions.push(transaction_index);
                }

                deleted_inputs = 0;
                deleted_outputs = 0;
                unknown_inputs = 0;
                transfers_left = false;
                first_transaction_transfer = i + 1;
            }

            i += 1;
        }

        updated_transactions
    }

    /// Copy of the log with transactions matching `drop` removed and the
    /// surviving transfers re-densified to the shifted indices.
    pub fn filtered_details(
        &self,
        mut drop: impl FnMut(&WalletTransaction) -> bool,
    ) -> (Vec<WalletTransaction>, Vec<(usize, WalletTransfer)>) {
        let mut transactions = Vec::new();
        let mut transfers = Vec::new();
        let mut dropped = 0usize;

        for (index, transaction) in self.transactions.iter().enumerate() {
            if drop(transaction) {
                dropped += 1;
                continue;
            }
            transactions.push(transaction.clone());
            let (start, end) = self.transfers_range(index);
            for (_, transfer) in &self.transfers[start..end] {
                transfers.push((index - dropped, transfer.clone()));
            }
        }

        (transactions, transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNCONFIRMED_TRANSACTION_HEIGHT;

    fn transaction(hash_byte: u8, height: u32) -> WalletTransaction {
        WalletTransaction {
            state: WalletTransactionState::Succeeded,
            timestamp: 0,
            block_height: height,
            hash: [hash_byte; 32],
            total_amount: 0,
            fee: 0,
            creation_time: 0,
            unlock_time: 0,
            extra: Vec::new(),
            secret_key: None,
            is_base: false,
        }
    }

    fn transfer(address: &str, amount: i64) -> WalletTransfer {
        WalletTransfer {
            transfer_type: WalletTransferType::Usual,
            address: address.to_string(),
            amount,
        }
    }

    #[test]
    fn height_index_follows_modification() {
        let mut ledger = TransactionLedger::new();
        let index = ledger.push(transaction(1, UNCONFIRMED_TRANSACTION_HEIGHT));
        assert_eq!(ledger.indices_at_height(UNCONFIRMED_TRANSACTION_HEIGHT), &[index]);
        ledger.modify(index, |tx| tx.block_height = 50);
        assert!(ledger.indices_at_height(UNCONFIRMED_TRANSACTION_HEIGHT).is_empty());
        assert_eq!(ledger.indices_at_height(50), &[index]);
    }

    #[test]
    fn adjust_merges_duplicate_rows() {
        let mut ledger = TransactionLedger::new();
        ledger.push(transaction(1, 1));
        ledger.push_transfer(0, transfer("a", -30));
        ledger.push_transfer(0, transfer("a", -20));
        ledger.push_transfer(0, transfer("b", 10));

        assert!(ledger.adjust_transfer(0, 0, "a", -50));
        let transfers = ledger.transfers_of(0);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0], transfer("a", -50));
        assert_eq!(transfers[1], transfer("b", 10));
    }

    #[test]
    fn adjust_appends_missing_row_after_group() {
        let mut ledger = TransactionLedger::new();
        ledger.push(transaction(1, 1));
        ledger.push(transaction(2, 1));
        ledger.push_transfer(0, transfer("a", 5));
        ledger.push_transfer(1, transfer("b", 5));

        assert!(ledger.adjust_transfer(0, 0, "c", 7));
        assert_eq!(ledger.transfers_of(0).len(), 2);
        assert_eq!(ledger.transfers_of(1).len(), 1);
        assert_eq!(ledger.transfer_at(0, 1), Some(&transfer("c", 7)));
    }

    #[test]
    fn erase_by_address_respects_direction() {
        let mut ledger = TransactionLedger::new();
        ledger.push(transaction(1, 1));
        ledger.push_transfer(0, transfer("a", -30));
        ledger.push_transfer(0, transfer("a", 40));

        assert!(ledger.erase_transfers_by_address(0, 0, "a", false));
        let transfers = ledger.transfers_of(0);
        assert_eq!(transfers, vec![transfer("a", 40)]);
    }

    #[test]
    fn delete_address_demotes_inputs_and_marks_deleted() {
        let mut ledger = TransactionLedger::new();
        ledger.push(transaction(1, 1));
        // only "gone" touches this transaction; it spends 100 and keeps 60
        ledger.push_transfer(0, transfer("gone", -100));
        ledger.push_transfer(0, transfer("gone", 60));
        ledger.push_transfer(0, transfer("other", 40));

        let mut deleted = Vec::new();
        let updated =
            ledger.delete_transfers_for_address("gone", |a| a == "gone" || a == "keeper", &mut deleted);

        assert_eq!(updated, vec![0]);
        assert_eq!(deleted, vec![0]);
        assert_eq!(ledger.get(0).unwrap().state, WalletTransactionState::Deleted);
        // -100 input demoted to unknown, +60 output removed from the total
        assert_eq!(ledger.get(0).unwrap().total_amount, 40);
        let transfers = ledger.transfers_of(0);
        assert!(transfers.iter().any(|t| t.address.is_empty() && t.amount == -100));
    }

    #[test]
    fn filtered_details_shifts_transfer_indices() {
        let mut ledger = TransactionLedger::new();
        let mut created = transaction(1, UNCONFIRMED_TRANSACTION_HEIGHT);
        created.state = WalletTransactionState::Created;
        ledger.push(created);
        ledger.push(transaction(2, 5));
        ledger.push_transfer(0, transfer("a", 5));
        ledger.push_transfer(1, transfer("b", 9));

        let (transactions, transfers) =
            ledger.filtered_details(|tx| tx.state == WalletTransactionState::Created);
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].hash, [2u8; 32]);
        assert_eq!(transfers, vec![(0, transfer("b", 9))]);
    }
}
