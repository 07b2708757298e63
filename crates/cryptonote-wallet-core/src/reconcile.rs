//! Inbound sync-observer surface and the transfer reconciliation that keeps
//! every transaction's transfer block consistent with what this wallet's
//! containers observed.
//!
//! The driver (the sync engine's notification thread) calls the `on_*`
//! methods directly; each one acquires the ready-event critical section and
//! silently returns when the wallet is not initialized.

use std::collections::HashSet;

use log::{debug, warn};

use crate::sync::{ContainerHandle, TransactionInformation};
use crate::types::{
    Hash, WalletEvent, WalletTransaction, WalletTransactionState, UNCONFIRMED_TRANSACTION_HEIGHT,
};
use crate::wallet::{Wallet, WalletPhase, WalletState};

/// The signed slice of a transaction one container saw: `input` is the
/// negated amount it spent, `output` the amount it received.
#[derive(Clone)]
pub(crate) struct ContainerAmounts {
    pub container: ContainerHandle,
    pub input: i64,
    pub output: i64,
}

impl Wallet {
    /// One or more of this wallet's containers observed a change to a
    /// transaction.
    pub fn on_transaction_updated(&self, transaction_hash: &Hash, containers: &[ContainerHandle]) {
        debug_assert!(!containers.is_empty());

        // Read the containers' view before entering the critical section;
        // the container is guaranteed to know the transaction at callback
        // time, not necessarily later.
        let mut info: Option<TransactionInformation> = None;
        let mut container_amounts = Vec::with_capacity(containers.len());
        for container in containers {
            match container.transaction_information(transaction_hash) {
                Some(seen) => {
                    container_amounts.push(ContainerAmounts {
                        container: container.clone(),
                        input: -(seen.inputs_amount as i64),
                        output: seen.outputs_amount as i64,
                    });
                    if info.is_none() {
                        info = Some(seen.info);
                    }
                }
                None => warn!(
                    "container update for transaction {} it does not know",
                    hex::encode(transaction_hash)
                ),
            }
        }
        let Some(info) = info else { return };

        let mut state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }
        self.transaction_updated(&mut state, &info, &container_amounts);
    }

    fn transaction_updated(
        &self,
        state: &mut WalletState,
        info: &TransactionInformation,
        container_amounts: &[ContainerAmounts],
    ) {
        let mut updated = false;
        let mut is_new = false;

        let total_amount: i64 = container_amounts
            .iter()
            .map(|amounts| amounts.input + amounts.output)
            .sum();

        let transaction_index = match state.ledger.index_of(&info.transaction_hash) {
            Some(index) => {
                updated |= update_transaction_info(state, index, info, total_amount);
                index
            }
            None => {
                is_new = true;
                let index = insert_blockchain_transaction(state, info, total_amount);
                let inserted = state
                    .ledger
                    .get(index)
                    .cloned()
                    .expect("transaction just inserted");
                let is_fusion = self.is_fusion_wallet_transaction(state, &inserted);
                state.fusion_cache.insert(index, is_fusion);
                index
            }
        };

        if info.block_height != UNCONFIRMED_TRANSACTION_HEIGHT {
            // A mined transaction may still sit in the uncommitted store if
            // the commit notification raced the chain.
            state.uncommitted.remove(transaction_index);
        }

        for amounts in container_amounts {
            state.update_balance(&amounts.container);

            if info.block_height != UNCONFIRMED_TRANSACTION_HEIGHT {
                let unlock_height =
                    (info.block_height + self.transaction_soft_lock_time).max(info.unlock_time as u32);
                state.unlock_schedule.insert(
                    info.transaction_hash,
                    unlock_height,
                    amounts.container.clone(),
                );
            }
        }

        updated |= self.update_transaction_transfers(
            state,
            transaction_index,
            container_amounts,
            -(info.total_amount_in as i64),
            info.total_amount_out as i64,
        );

        if is_new {
            debug!(
                "transaction {} entered the ledger at index {transaction_index}",
                hex::encode(info.transaction_hash)
            );
            self.events.push(WalletEvent::TransactionCreated { transaction_index });
        } else if updated {
            self.events.push(WalletEvent::TransactionUpdated { transaction_index });
        }
    }

    /// A container reports the transaction was dropped, e.g. orphaned by a
    /// reorg.
    pub fn on_transaction_deleted(&self, container: &ContainerHandle, transaction_hash: &Hash) {
        let mut state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }

        let Some(transaction_index) = state.ledger.index_of(transaction_hash) else {
            return;
        };

        state.update_balance(container);
        state.unlock_schedule.remove_by_hash(transaction_hash);

        let mut updated = false;
        state.ledger.modify(transaction_index, |transaction| {
            if transaction.state == WalletTransactionState::Created
                || transaction.state == WalletTransactionState::Succeeded
            {
                transaction.state = WalletTransactionState::Cancelled;
                updated = true;
            }
            if transaction.block_height != UNCONFIRMED_TRANSACTION_HEIGHT {
                transaction.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
                updated = true;
            }
        });

        if updated {
            debug!("transaction {} cancelled", hex::encode(transaction_hash));
            self.events.push(WalletEvent::TransactionUpdated { transaction_index });
        }
    }

    pub fn on_blocks_added(&self, block_hashes: &[Hash]) {
        let mut state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }
        state.block_log.extend(block_hashes.iter().copied());
    }

    pub fn on_blockchain_detach(&self, block_height: u32) {
        let mut state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }
        state.block_log.detach(block_height as usize);
    }

    pub fn on_sync_progress_updated(&self, processed_block_count: u32, total_block_count: u32) {
        debug_assert!(processed_block_count > 0);

        let mut state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }

        self.events.push(WalletEvent::SyncProgressUpdated {
            processed_block_count,
            total_block_count,
        });

        self.unlock_balances(&mut state, processed_block_count - 1);
    }

    /// The engine hit an error for one subscription; the wallet keeps its
    /// state and waits for the engine to recover.
    pub fn on_sync_error(&self, height: u32, error: &str) {
        warn!("sync engine error at height {height}: {error}");
    }

    pub fn on_sync_completed(&self) {
        let state = self.state.lock();
        if state.phase != WalletPhase::Initialized {
            return;
        }
        self.events.push(WalletEvent::SyncCompleted);
    }

    fn unlock_balances(&self, state: &mut WalletState, current_height: u32) {
        let due = state.unlock_schedule.take_due(current_height);
        if due.is_empty() {
            return;
        }

        for job in &due {
            state.update_balance(&job.container);
        }
        debug!("{} unlock jobs fired at height {current_height}", due.len());
        self.events.push(WalletEvent::BalanceUnlocked);
    }

    /// Rewrites one transaction's transfer block so per-address rows match
    /// the containers' view and the unknown row absorbs the counterparty
    /// residual.
    fn update_transaction_transfers(
        &self,
        state: &mut WalletState,
        transaction_index: usize,
        container_amounts: &[ContainerAmounts],
        all_inputs_amount: i64,
        all_outputs_amount: i64,
    ) -> bool {
        debug_assert!(all_inputs_amount <= 0);
        debug_assert!(all_outputs_amount >= 0);

        let mut updated = false;

        let (first_transfer_index, _) = state.ledger.transfers_range(transaction_index);
        let initial_transfers = state
            .ledger
            .known_transfers_map(transaction_index, first_transfer_index);

        let mut my_input_addresses = HashSet::new();
        let mut my_output_addresses = HashSet::new();
        let mut my_inputs_amount: i64 = 0;
        let mut my_outputs_amount: i64 = 0;

        for amounts in container_amounts {
            let Some(record) = state.keystore.by_container(&amounts.container) else {
                warn!("transfer update for a container without a wallet record");
                continue;
            };
            let spend_public_key = record.spend_public_key;
            let address = self.address_of_record(state, &spend_public_key);

            let known = initial_transfers.get(&address).copied().unwrap_or_default();
            updated |= update_address_transfers(
                state,
                transaction_index,
                first_transfer_index,
                &address,
                known.input,
                amounts.input,
            );
            updated |= update_address_transfers(
                state,
                transaction_index,
                first_transfer_index,
                &address,
                known.output,
                amounts.output,
            );

            my_inputs_amount += amounts.input;
            my_outputs_amount += amounts.output;

            if amounts.input != 0 {
                my_input_addresses.insert(address.clone());
            }
            if amounts.output != 0 {
                my_output_addresses.insert(address);
            }
        }

        debug_assert!(my_inputs_amount >= all_inputs_amount);
        debug_assert!(my_outputs_amount <= all_outputs_amount);

        let refreshed = state
            .ledger
            .known_transfers_map(transaction_index, first_transfer_index);
        let known_inputs_amount: i64 = refreshed.values().map(|amounts| amounts.input).sum();
        let known_outputs_amount: i64 = refreshed.values().map(|amounts| amounts.output).sum();

        updated |= update_unknown_transfers(
            state,
            transaction_index,
            first_transfer_index,
            &my_input_addresses,
            known_inputs_amount,
            my_inputs_amount,
            all_inputs_amount,
            false,
        );
        updated |= update_unknown_transfers(
            state,
            transaction_index,
            first_transfer_index,
            &my_output_addresses,
            known_outputs_amount,
            my_outputs_amount,
            all_outputs_amount,
            true,
        );

        updated
    }
}

/// Moves the `(address, direction)` row from `known_amount` to
/// `target_amount`: append when absent, erase when going to zero, adjust
/// (merging duplicates) otherwise.
fn update_address_transfers(
    state: &mut WalletState,
    transaction_index: usize,
    first_transfer_index: usize,
    address: &str,
    known_amount: i64,
    target_amount: i64,
) -> bool {
    debug_assert!(
        (known_amount > 0 && target_amount > 0)
            || (known_amount < 0 && target_amount < 0)
            || known_amount == 0
            || target_amount == 0
    );

    if known_amount == target_amount {
        return false;
    }

    if known_amount == 0 {
        state
            .ledger
            .append_transfer(transaction_index, first_transfer_index, address, target_amount);
        true
    } else if target_amount == 0 {
        state.ledger.erase_transfers_by_address(
            transaction_index,
            first_transfer_index,
            address,
            known_amount > 0,
        )
    } else {
        state
            .ledger
            .adjust_transfer(transaction_index, first_transfer_index, address, target_amount)
    }
}

/// Reconciles the synthetic unknown-counterparty row for one direction.
#[allow(clippy::too_many_arguments)]
fn update_unknown_transfers(
    state: &mut WalletState,
    transaction_index: usize,
    first_transfer_index: usize,
    my_addresses: &HashSet<String>,
    known_amount: i64,
    my_amount: i64,
    total_amount: i64,
    is_output: bool,
) -> bool {
    let mut updated = false;

    if known_amount.abs() > total_amount.abs() {
        updated |= state.ledger.erase_foreign_transfers(
            transaction_index,
            first_transfer_index,
            my_addresses,
            is_output,
        );
        if total_amount == my_amount {
            updated |= state.ledger.erase_transfers_by_address(
                transaction_index,
                first_transfer_index,
                "",
                is_output,
            );
        } else {
            debug_assert!(total_amount.abs() > my_amount.abs());
            updated |= state.ledger.adjust_transfer(
                transaction_index,
                first_transfer_index,
                "",
                total_amount - my_amount,
            );
        }
    } else if known_amount == total_amount {
        updated |= state.ledger.erase_transfers_by_address(
            transaction_index,
            first_transfer_index,
            "",
            is_output,
        );
    } else {
        debug_assert!(total_amount.abs() > known_amount.abs());
        updated |= state.ledger.adjust_transfer(
            transaction_index,
            first_transfer_index,
            "",
            total_amount - known_amount,
        );
    }

    updated
}

fn update_transaction_info(
    state: &mut WalletState,
    transaction_index: usize,
    info: &TransactionInformation,
    total_amount: i64,
) -> bool {
    let mut updated = false;

    state.ledger.modify(transaction_index, |transaction| {
        if transaction.block_height != info.block_height {
            transaction.block_height = info.block_height;
            updated = true;
        }

        if transaction.timestamp != info.timestamp {
            transaction.timestamp = info.timestamp;
            updated = true;
        }

        let is_succeeded = transaction.state == WalletTransactionState::Succeeded;
        // Once relayed, a transaction can no longer be CREATED or FAILED;
        // a deleted-then-reobserved one comes back as SUCCEEDED.
        let was_sent = transaction.state != WalletTransactionState::Created
            && transaction.state != WalletTransactionState::Failed;
        let is_confirmed = transaction.block_height != UNCONFIRMED_TRANSACTION_HEIGHT;
        if !is_succeeded && (was_sent || is_confirmed) {
            transaction.state = WalletTransactionState::Succeeded;
            updated = true;
        }

        if transaction.total_amount != total_amount {
            transaction.total_amount = total_amount;
            updated = true;
        }

        if transaction.extra.is_empty() && !info.extra.is_empty() {
            transaction.extra = info.extra.clone();
            updated = true;
        }

        let is_base = info.total_amount_in == 0;
        if transaction.is_base != is_base {
            transaction.is_base = is_base;
            updated = true;
        }
    });

    updated
}

fn insert_blockchain_transaction(
    state: &mut WalletState,
    info: &TransactionInformation,
    total_amount: i64,
) -> usize {
    let is_base = info.total_amount_in == 0;
    let transaction = WalletTransaction {
        state: WalletTransactionState::Succeeded,
        timestamp: info.timestamp,
        block_height: info.block_height,
        hash: info.transaction_hash,
        total_amount,
        fee: if is_base {
            0
        } else {
            info.total_amount_in - info.total_amount_out
        },
        creation_time: info.timestamp,
        unlock_time: info.unlock_time,
        extra: info.extra.clone(),
        secret_key: None,
        is_base,
    };
    state.ledger.push(transaction)
}
