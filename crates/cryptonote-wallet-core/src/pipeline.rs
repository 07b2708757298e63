//! The outgoing transaction pipeline: parameter validation, input
//! selection, mixin ring assembly, amount decomposition, signing and the
//! two-phase save-then-relay with rollback.

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::completion::wait_for;
use crate::crypto::{GlobalOutput, InputKeyInfo, RealOutput, TransactionBuilder};
use crate::error::{Result, WalletError};
use crate::node::RandomOutsForAmount;
use crate::sync::{OutputFilter, TransactionOutputInformation};
use crate::types::{
    AccountAddress, DonationSettings, SecretKey, TransactionParameters, WalletEvent, WalletOrder,
    WalletTransaction, WalletTransactionState, WalletTransfer, WalletTransferType,
    UNCONFIRMED_TRANSACTION_HEIGHT,
};
use crate::wallet::{unix_time, Wallet, WalletState};

/// Unlocked outputs of one record, consumed by the selector.
pub(crate) struct WalletOuts {
    pub wallet_index: usize,
    pub outs: Vec<TransactionOutputInformation>,
}

/// One selected output together with its owning record.
pub(crate) struct OutputToTransfer {
    pub out: TransactionOutputInformation,
    pub wallet_index: usize,
}

pub(crate) struct InputInfo {
    pub key_info: InputKeyInfo,
    pub wallet_index: usize,
}

/// Decomposed summands bound for one receiver.
pub(crate) struct ReceiverAmounts {
    pub receiver: AccountAddress,
    pub amounts: Vec<u64>,
}

pub(crate) struct PreparedTransaction {
    pub builder: Box<dyn TransactionBuilder>,
    pub destinations: Vec<WalletTransfer>,
    pub secret_key: SecretKey,
}

impl Wallet {
    /// Builds, signs, saves and relays a transaction in one call. Returns
    /// the ledger index and the transaction's one-time secret key.
    pub fn transfer(&self, parameters: &TransactionParameters) -> Result<(usize, SecretKey)> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_tracking(&state)?;
        self.ensure_not_stopped()?;

        self.do_transfer(&mut state, parameters, true)
    }

    /// Like [`Wallet::transfer`] but keeps the signed transaction in the
    /// uncommitted store; relay it later with [`Wallet::commit_transaction`].
    pub fn make_transaction(&self, parameters: &TransactionParameters) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_tracking(&state)?;
        self.ensure_not_stopped()?;

        self.do_transfer(&mut state, parameters, false).map(|(index, _)| index)
    }

    fn do_transfer(
        &self,
        state: &mut WalletState,
        parameters: &TransactionParameters,
        send: bool,
    ) -> Result<(usize, SecretKey)> {
        self.validate_transaction_parameters(state, parameters)?;
        let change_destination = self.get_change_destination(
            state,
            &parameters.change_destination,
            &parameters.source_addresses,
        )?;

        let wallets = if !parameters.source_addresses.is_empty() {
            self.pick_wallets(state, &parameters.source_addresses)?
        } else {
            self.pick_wallets_with_money(state)
        };

        let prepared = self.prepare_transaction(
            state,
            wallets,
            &parameters.destinations,
            parameters.fee,
            parameters.mix_in,
            &parameters.extra,
            parameters.unlock_timestamp,
            &parameters.donation,
            &change_destination,
        )?;

        let secret_key = prepared.secret_key;
        let transaction_index = self.validate_save_and_send_transaction(
            state,
            prepared.builder.as_ref(),
            &prepared.destinations,
            false,
            send,
        )?;
        Ok((transaction_index, secret_key))
    }

    /// Relays a transaction previously produced by
    /// [`Wallet::make_transaction`].
    pub fn commit_transaction(&self, transaction_index: usize) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        self.ensure_not_tracking(&state)?;

        if transaction_index >= state.ledger.len() {
            return Err(WalletError::IndexOutOfRange);
        }
        let is_created = state
            .ledger
            .get(transaction_index)
            .is_some_and(|tx| tx.state == WalletTransactionState::Created);
        if !state.uncommitted.contains(transaction_index) || !is_created {
            return Err(WalletError::TxTransferImpossible);
        }

        let blob = state
            .uncommitted
            .get(transaction_index)
            .cloned()
            .expect("checked above");
        self.send_transaction(&blob)?;

        self.update_transaction_state_and_push_event(
            &mut state,
            transaction_index,
            WalletTransactionState::Succeeded,
        );
        state.uncommitted.remove(transaction_index);
        info!("transaction {transaction_index} committed");
        Ok(())
    }

    /// Drops an uncommitted transaction and unregisters it from the sync
    /// engine.
    pub fn rollback_uncommitted_transaction(&self, transaction_index: usize) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;
        self.ensure_not_tracking(&state)?;

        if transaction_index >= state.ledger.len() {
            return Err(WalletError::IndexOutOfRange);
        }
        let is_created = state
            .ledger
            .get(transaction_index)
            .is_some_and(|tx| tx.state == WalletTransactionState::Created);
        if !state.uncommitted.contains(transaction_index) || !is_created {
            return Err(WalletError::TxCancelImpossible);
        }

        let transaction_hash = state
            .ledger
            .get(transaction_index)
            .expect("checked above")
            .hash;
        self.sync.remove_unconfirmed_transaction(&transaction_hash)?;
        state.uncommitted.remove(transaction_index);
        info!("transaction {transaction_index} rolled back");
        Ok(())
    }

    // --- validation ---

    fn validate_transaction_parameters(
        &self,
        state: &WalletState,
        parameters: &TransactionParameters,
    ) -> Result<()> {
        if parameters.destinations.is_empty() {
            return Err(WalletError::ZeroDestination);
        }

        let minimal_fee = self.node.minimal_fee();
        if parameters.fee < minimal_fee {
            warn!(
                "fee {} is below the node minimum {}",
                self.currency.format_amount(parameters.fee),
                self.currency.format_amount(minimal_fee)
            );
            return Err(WalletError::FeeTooSmall);
        }

        if parameters.donation.address.is_empty() != (parameters.donation.threshold == 0) {
            return Err(WalletError::WrongParameters);
        }

        for source_address in &parameters.source_addresses {
            if self.parse_address(source_address).is_err() || !self.is_my_address(state, source_address)
            {
                return Err(WalletError::BadAddress);
            }
        }

        for order in &parameters.destinations {
            self.parse_address(&order.address)?;
            if order.amount >= i64::MAX as u64 {
                return Err(WalletError::WrongAmount);
            }
        }

        if parameters.change_destination.is_empty() {
            if parameters.source_addresses.len() > 1
                || (parameters.source_addresses.is_empty() && state.keystore.len() > 1)
            {
                return Err(WalletError::ChangeAddressRequired);
            }
        } else {
            if self.parse_address(&parameters.change_destination).is_err() {
                return Err(WalletError::BadAddress);
            }
            if !self.is_my_address(state, &parameters.change_destination) {
                return Err(WalletError::ChangeAddressNotFound);
            }
        }

        Ok(())
    }

    fn get_change_destination(
        &self,
        state: &WalletState,
        change_destination: &str,
        source_addresses: &[String],
    ) -> Result<AccountAddress> {
        if !change_destination.is_empty() {
            return self.parse_address(change_destination);
        }

        if state.keystore.len() == 1 {
            return Ok(AccountAddress {
                spend_public_key: state.keystore.get(0).expect("one record").spend_public_key,
                view_public_key: state.view_public_key,
            });
        }

        debug_assert!(source_addresses.len() == 1);
        self.parse_address(&source_addresses[0])
    }

    // --- candidate outputs ---

    fn pick_wallet(&self, state: &WalletState, address: &str) -> Result<WalletOuts> {
        let parsed = self.parse_address(address)?;
        let wallet_index = state
            .keystore
            .index_of(&parsed.spend_public_key)
            .ok_or(WalletError::WalletNotFound)?;
        let record = state.keystore.get(wallet_index).expect("index from keystore");
        Ok(WalletOuts {
            wallet_index,
            outs: record.container.outputs(OutputFilter::KEY_UNLOCKED),
        })
    }

    fn pick_wallets(&self, state: &WalletState, addresses: &[String]) -> Result<Vec<WalletOuts>> {
        let mut wallets = Vec::with_capacity(addresses.len());
        for address in addresses {
            let outs = self.pick_wallet(state, address)?;
            if !outs.outs.is_empty() {
                wallets.push(outs);
            }
        }
        Ok(wallets)
    }

    pub(crate) fn pick_wallets_with_money(&self, state: &WalletState) -> Vec<WalletOuts> {
        state
            .keystore
            .iter()
            .enumerate()
            .filter(|(_, record)| record.actual_balance != 0)
            .map(|(wallet_index, record)| WalletOuts {
                wallet_index,
                outs: record.container.outputs(OutputFilter::KEY_UNLOCKED),
            })
            .collect()
    }

    /// Uniformly draws outputs across the candidate wallets until the
    /// needed sum is reached. At most one dust output is accepted, and only
    /// when `dust` starts out allowed.
    fn select_transfers(
        &self,
        needed_money: u64,
        mut dust: bool,
        dust_threshold: u64,
        mut wallets: Vec<WalletOuts>,
        selected: &mut Vec<OutputToTransfer>,
    ) -> u64 {
        let mut found_money = 0u64;
        let mut rng = ChaCha20Rng::from_seed(self.crypto.random_seed());

        while found_money < needed_money && !wallets.is_empty() {
            let wallet_index = rng.gen_range(0..wallets.len());
            debug_assert!(!wallets[wallet_index].outs.is_empty());
            let out_index = rng.gen_range(0..wallets[wallet_index].outs.len());

            let out = wallets[wallet_index].outs[out_index];
            if out.amount > dust_threshold || dust {
                if out.amount <= dust_threshold {
                    dust = false;
                }

                found_money += out.amount;
                selected.push(OutputToTransfer {
                    out,
                    wallet_index: wallets[wallet_index].wallet_index,
                });
            }

            wallets[wallet_index].outs.remove(out_index);
            if wallets[wallet_index].outs.is_empty() {
                wallets.remove(wallet_index);
            }
        }

        if !dust {
            return found_money;
        }

        // One tolerant sweep: accept the first remaining dust output.
        for wallet in &wallets {
            if let Some(out) = wallet.outs.iter().find(|out| out.amount <= dust_threshold) {
                found_money += out.amount;
                selected.push(OutputToTransfer {
                    out: *out,
                    wallet_index: wallet.wallet_index,
                });
                break;
            }
        }

        found_money
    }

    // --- mixins and ring assembly ---

    pub(crate) fn request_mixin_outs(
        &self,
        selected: &[OutputToTransfer],
        mix_in: u64,
    ) -> Result<Vec<RandomOutsForAmount>> {
        let amounts: Vec<u64> = selected.iter().map(|input| input.out.amount).collect();

        self.ensure_not_stopped()?;

        let node = self.node.clone();
        let result = wait_for(move |done| node.get_random_outs_by_amounts(amounts, mix_in, done));

        let (mixin_result, node_error) = match result {
            Ok(outs) => (outs, None),
            Err(error) => (Vec::new(), Some(error)),
        };

        check_if_enough_mixins(&mixin_result, mix_in)?;

        if let Some(error) = node_error {
            return Err(error.into());
        }
        Ok(mixin_result)
    }

    fn send_transaction(&self, transaction_blob: &[u8]) -> Result<()> {
        self.ensure_not_stopped()?;

        let node = self.node.clone();
        let blob = transaction_blob.to_vec();
        wait_for(move |done| node.relay_transaction(blob, done)).map_err(WalletError::from)
    }

    // --- assembly ---

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prepare_transaction(
        &self,
        state: &WalletState,
        wallets: Vec<WalletOuts>,
        orders: &[WalletOrder],
        fee: u64,
        mix_in: u64,
        extra: &[u8],
        unlock_timestamp: u64,
        donation: &DonationSettings,
        change_destination: &AccountAddress,
    ) -> Result<PreparedTransaction> {
        let mut destinations = convert_orders_to_transfers(orders)?;
        let needed_money = count_needed_money(&destinations, fee)?;

        let dust_threshold = self
            .currency
            .dust_threshold(self.node.last_known_block_height());

        let mut selected = Vec::new();
        let found_money =
            self.select_transfers(needed_money, mix_in == 0, dust_threshold, wallets, &mut selected);

        if found_money < needed_money {
            debug!(
                "selection found {} of needed {}",
                self.currency.format_amount(found_money),
                self.currency.format_amount(needed_money)
            );
            return Err(WalletError::WrongAmount);
        }

        let mut mixin_result = if mix_in != 0 {
            self.request_mixin_outs(&selected, mix_in)?
        } else {
            Vec::new()
        };

        let keys_info = prepare_inputs(&selected, &mut mixin_result, mix_in);

        let donation_amount = push_donation_transfer_if_possible(
            donation,
            found_money - needed_money,
            dust_threshold,
            &mut destinations,
            &self.currency,
        )?;
        let change_amount = found_money - needed_money - donation_amount;

        let mut decomposed_outputs = self.split_destinations(&destinations, dust_threshold)?;
        if change_amount != 0 {
            destinations.push(WalletTransfer {
                transfer_type: WalletTransferType::Change,
                address: self.currency.account_address_as_string(change_destination),
                amount: change_amount as i64,
            });
            decomposed_outputs.push(split_amount(
                &self.currency,
                change_amount,
                *change_destination,
                dust_threshold,
            ));
        }

        let (builder, secret_key) = self.make_transaction_from_outputs(
            state,
            &decomposed_outputs,
            &keys_info,
            extra,
            unlock_timestamp,
        )?;

        Ok(PreparedTransaction { builder, destinations, secret_key })
    }

    fn split_destinations(
        &self,
        destinations: &[WalletTransfer],
        dust_threshold: u64,
    ) -> Result<Vec<ReceiverAmounts>> {
        let mut decomposed = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let address = self.parse_address(&destination.address)?;
            decomposed.push(split_amount(
                &self.currency,
                destination.amount as u64,
                address,
                dust_threshold,
            ));
        }
        Ok(decomposed)
    }

    /// Assembles and signs the transaction. Outputs are shuffled, then
    /// stably sorted ascending by amount: internal ordering is hidden while
    /// the on-wire order stays canonical.
    pub(crate) fn make_transaction_from_outputs(
        &self,
        state: &WalletState,
        decomposed_outputs: &[ReceiverAmounts],
        keys_info: &[InputInfo],
        extra: &[u8],
        unlock_timestamp: u64,
    ) -> Result<(Box<dyn TransactionBuilder>, SecretKey)> {
        let mut builder = self.crypto.create_transaction();

        let mut amounts_to_addresses: Vec<(&AccountAddress, u64)> = Vec::new();
        for output in decomposed_outputs {
            for &amount in &output.amounts {
                amounts_to_addresses.push((&output.receiver, amount));
            }
        }

        let mut rng = ChaCha20Rng::from_seed(self.crypto.random_seed());
        amounts_to_addresses.shuffle(&mut rng);
        amounts_to_addresses.sort_by_key(|(_, amount)| *amount);

        for (receiver, amount) in &amounts_to_addresses {
            builder.add_output(*amount, receiver);
        }

        builder.set_unlock_time(unlock_timestamp);
        builder.append_extra(extra);

        for input in keys_info {
            let record = state
                .keystore
                .get(input.wallet_index)
                .ok_or(WalletError::InternalWalletError)?;
            let account_keys = self.make_account_keys(state, record);
            builder
                .add_input(&account_keys, &input.key_info)
                .map_err(|error| {
                    warn!("failed to add input: {error}");
                    WalletError::InternalWalletError
                })?;
        }

        for input_index in 0..keys_info.len() {
            builder.sign_input(input_index).map_err(|error| {
                warn!("failed to sign input {input_index}: {error}");
                WalletError::InternalWalletError
            })?;
        }

        let secret_key = builder.transaction_secret_key();
        Ok((builder, secret_key))
    }

    // --- save and relay ---

    /// Inserts the CREATED ledger entry, registers the transaction as
    /// unconfirmed, then either relays it or parks it in the uncommitted
    /// store. Failures unwind both effects.
    pub(crate) fn validate_save_and_send_transaction(
        &self,
        state: &mut WalletState,
        builder: &dyn TransactionBuilder,
        destinations: &[WalletTransfer],
        is_fusion: bool,
        send: bool,
    ) -> Result<usize> {
        let blob = builder.transaction_data();
        if blob.len() > self.upper_transaction_size_limit {
            return Err(WalletError::TransactionSizeTooBig);
        }

        let extra = builder.extra();
        if extra.len() > self.currency.max_tx_extra_size {
            return Err(WalletError::ExtraTooLarge);
        }

        let fee = builder
            .input_total_amount()
            .checked_sub(builder.output_total_amount())
            .ok_or(WalletError::InternalWalletError)?;
        let transaction_hash = builder.transaction_hash();
        let secret_key = builder.transaction_secret_key();

        let transaction_index = {
            let transaction = WalletTransaction {
                state: WalletTransactionState::Created,
                timestamp: 0,
                block_height: UNCONFIRMED_TRANSACTION_HEIGHT,
                hash: transaction_hash,
                total_amount: 0,
                fee,
                creation_time: unix_time(),
                unlock_time: builder.unlock_time(),
                extra,
                secret_key: Some(secret_key),
                is_base: false,
            };
            let index = state.ledger.push(transaction);
            self.events.push(WalletEvent::TransactionCreated { transaction_index: index });
            index
        };

        state.fusion_cache.insert(transaction_index, is_fusion);
        for destination in destinations {
            state.ledger.push_transfer(transaction_index, destination.clone());
        }

        if let Err(error) = self.sync.add_unconfirmed_transaction(&blob, &transaction_hash) {
            warn!("could not register unconfirmed transaction: {error}");
            self.update_transaction_state_and_push_event(
                state,
                transaction_index,
                WalletTransactionState::Failed,
            );
            return Err(error.into());
        }

        if send {
            if let Err(error) = self.send_transaction(&blob) {
                warn!("relay of transaction {transaction_index} failed: {error}");
                if let Err(unregister_error) =
                    self.sync.remove_unconfirmed_transaction(&transaction_hash)
                {
                    // The transaction stays registered and is cleaned up by
                    // pool synchronization on the next wallet load.
                    warn!("could not unregister unconfirmed transaction: {unregister_error}");
                }
                self.update_transaction_state_and_push_event(
                    state,
                    transaction_index,
                    WalletTransactionState::Failed,
                );
                return Err(error);
            }
            self.update_transaction_state_and_push_event(
                state,
                transaction_index,
                WalletTransactionState::Succeeded,
            );
        } else {
            debug_assert!(!state.uncommitted.contains(transaction_index));
            state.uncommitted.insert(transaction_index, blob);
        }

        info!(
            "transaction {} saved at index {transaction_index}, fee {}",
            hex::encode(transaction_hash),
            self.currency.format_amount(fee)
        );
        Ok(transaction_index)
    }
}

fn check_if_enough_mixins(mixin_result: &[RandomOutsForAmount], mix_in: u64) -> Result<()> {
    // Historically an empty result with no mixins requested still counts as
    // a mixin failure, even though nothing was asked of the node.
    if mix_in == 0 && mixin_result.is_empty() {
        return Err(WalletError::MixinCountTooBig);
    }

    if mixin_result
        .iter()
        .any(|outs_for_amount| (outs_for_amount.outs.len() as u64) < mix_in)
    {
        return Err(WalletError::MixinCountTooBig);
    }

    Ok(())
}

fn convert_orders_to_transfers(orders: &[WalletOrder]) -> Result<Vec<WalletTransfer>> {
    let mut transfers = Vec::with_capacity(orders.len());
    for order in orders {
        if order.amount > i64::MAX as u64 {
            return Err(WalletError::WrongAmount);
        }
        transfers.push(WalletTransfer {
            transfer_type: WalletTransferType::Usual,
            address: order.address.clone(),
            amount: order.amount as i64,
        });
    }
    Ok(transfers)
}

fn count_needed_money(destinations: &[WalletTransfer], fee: u64) -> Result<u64> {
    let mut needed_money = 0u64;
    for destination in destinations {
        if destination.amount == 0 {
            return Err(WalletError::ZeroDestination);
        }
        if destination.amount < 0 {
            return Err(WalletError::WrongAmount);
        }

        needed_money = needed_money
            .checked_add(destination.amount as u64)
            .ok_or(WalletError::SumOverflow)?;
    }

    needed_money.checked_add(fee).ok_or(WalletError::SumOverflow)
}

/// Builds a ring per selected output: mixin candidates sorted by global
/// index, the real output spliced in at its sorted position. Input order
/// matches selection order.
pub(crate) fn prepare_inputs(
    selected: &[OutputToTransfer],
    mixin_result: &mut [RandomOutsForAmount],
    mix_in: u64,
) -> Vec<InputInfo> {
    let mut keys_info = Vec::with_capacity(selected.len());

    for (index, input) in selected.iter().enumerate() {
        let mut outputs: Vec<GlobalOutput> = Vec::new();

        if !mixin_result.is_empty() {
            let candidates = &mut mixin_result[index];
            candidates.outs.sort_by_key(|entry| entry.global_amount_index);
            for fake in &candidates.outs {
                if u64::from(input.out.global_output_index) != fake.global_amount_index {
                    outputs.push(GlobalOutput {
                        output_index: fake.global_amount_index as u32,
                        target_key: fake.out_key,
                    });
                    if outputs.len() as u64 >= mix_in {
                        break;
                    }
                }
            }
        }

        let insert_position = outputs
            .iter()
            .position(|candidate| candidate.output_index >= input.out.global_output_index)
            .unwrap_or(outputs.len());
        outputs.insert(
            insert_position,
            GlobalOutput {
                output_index: input.out.global_output_index,
                target_key: input.out.output_key,
            },
        );

        keys_info.push(InputInfo {
            key_info: InputKeyInfo {
                amount: input.out.amount,
                outputs,
                real_output: RealOutput {
                    transaction_public_key: input.out.transaction_public_key,
                    transaction_index: insert_position,
                    output_in_transaction: input.out.output_in_transaction,
                },
            },
            wallet_index: input.wallet_index,
        });
    }

    keys_info
}

fn calculate_donation_amount(
    free_amount: u64,
    donation_threshold: u64,
    dust_threshold: u64,
    currency: &crate::currency::CurrencyParams,
) -> u64 {
    let mut decomposed = currency.decompose_amount(free_amount, dust_threshold);
    decomposed.sort_unstable_by(|a, b| b.cmp(a));

    let mut donation_amount = 0u64;
    for amount in decomposed {
        if amount <= donation_threshold - donation_amount {
            donation_amount += amount;
        }
    }

    debug_assert!(donation_amount <= free_amount);
    donation_amount
}

fn push_donation_transfer_if_possible(
    donation: &DonationSettings,
    free_amount: u64,
    dust_threshold: u64,
    destinations: &mut Vec<WalletTransfer>,
    currency: &crate::currency::CurrencyParams,
) -> Result<u64> {
    let mut donation_amount = 0u64;
    if !donation.address.is_empty() && donation.threshold != 0 {
        if donation.threshold > i64::MAX as u64 {
            return Err(WalletError::WrongAmount);
        }

        donation_amount =
            calculate_donation_amount(free_amount, donation.threshold, dust_threshold, currency);
        if donation_amount != 0 {
            destinations.push(WalletTransfer {
                transfer_type: WalletTransferType::Donation,
                address: donation.address.clone(),
                amount: donation_amount as i64,
            });
        }
    }

    Ok(donation_amount)
}

fn split_amount(
    currency: &crate::currency::CurrencyParams,
    amount: u64,
    destination: AccountAddress,
    dust_threshold: u64,
) -> ReceiverAmounts {
    ReceiverAmounts {
        receiver: destination,
        amounts: currency.decompose_amount(amount, dust_threshold),
    }
}
