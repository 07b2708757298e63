//! Dust consolidation: picking a power-of-ten bucket of small outputs and
//! fusing them into a zero-fee transaction back to the first address.

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::currency::FUSION_BUCKET_COUNT;
use crate::error::{Result, WalletError};
use crate::pipeline::{prepare_inputs, OutputToTransfer, ReceiverAmounts};
use crate::sync::OutputFilter;
use crate::types::{FusionEstimate, WalletTransaction};
use crate::wallet::{Wallet, WalletState};

const MAX_FUSION_OUTPUT_COUNT: usize = 4;

impl Wallet {
    /// Consolidates one bucket of small outputs into a zero-fee
    /// transaction. Returns `None` when no bucket holds enough fusible
    /// outputs to be worth optimizing.
    pub fn create_fusion_transaction(&self, threshold: u64, mix_in: u64) -> Result<Option<usize>> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_tracking(&state)?;
        self.ensure_not_stopped()?;

        let dust_threshold = self
            .currency
            .dust_threshold(self.node.last_known_block_height());
        if threshold <= dust_threshold {
            debug!("fusion threshold {threshold} not above dust threshold {dust_threshold}");
            return Err(WalletError::WrongParameters);
        }

        if state.keystore.is_empty() {
            return Err(WalletError::WrongParameters);
        }

        let estimated_input_count = self.currency.approximate_maximum_input_count(
            self.currency.fusion_tx_max_size,
            MAX_FUSION_OUTPUT_COUNT,
            mix_in as usize,
        );
        if estimated_input_count < self.currency.fusion_tx_min_input_count {
            return Err(WalletError::MixinCountTooBig);
        }

        let mut fusion_inputs = self.pick_random_fusion_inputs(
            &state,
            threshold,
            self.currency.fusion_tx_min_input_count,
            estimated_input_count,
        );
        if fusion_inputs.len() < self.currency.fusion_tx_min_input_count {
            // nothing to optimize
            return Ok(None);
        }

        let mut mixin_result = if mix_in != 0 {
            self.request_mixin_outs(&fusion_inputs, mix_in)?
        } else {
            Vec::new()
        };

        let mut keys_info = prepare_inputs(&fusion_inputs, &mut mixin_result, mix_in);

        // Rebuild with one fewer input per round until the blob fits.
        let mut round = 0;
        let builder = loop {
            if round != 0 {
                fusion_inputs.pop();
                keys_info.pop();
            }
            round += 1;

            let inputs_amount: u64 = fusion_inputs.iter().map(|input| input.out.amount).sum();
            let decomposed = self.decompose_fusion_outputs(&state, inputs_amount);
            debug_assert!(decomposed.amounts.len() <= MAX_FUSION_OUTPUT_COUNT);

            let (builder, _) = self.make_transaction_from_outputs(
                &state,
                std::slice::from_ref(&decomposed),
                &keys_info,
                &[],
                0,
            )?;

            let transaction_size = builder.transaction_data().len();
            if transaction_size <= self.currency.fusion_tx_max_size
                || fusion_inputs.len() < self.currency.fusion_tx_min_input_count
            {
                break builder;
            }
        };

        if fusion_inputs.len() < self.currency.fusion_tx_min_input_count {
            return Err(WalletError::TransactionSizeTooBig);
        }

        let transaction_index =
            self.validate_save_and_send_transaction(&mut state, builder.as_ref(), &[], true, true)?;
        info!(
            "fusion transaction {transaction_index} consolidated {} inputs",
            fusion_inputs.len()
        );
        Ok(Some(transaction_index))
    }

    /// Counts fusible outputs under `threshold` without building anything.
    pub fn estimate_fusion(&self, threshold: u64) -> Result<FusionEstimate> {
        let state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        let height = self.node.last_known_block_height();
        let mut estimate = FusionEstimate::default();
        let mut bucket_sizes = [0usize; FUSION_BUCKET_COUNT];

        for wallet in self.pick_wallets_with_money(&state) {
            estimate.total_output_count += wallet.outs.len();
            for out in &wallet.outs {
                if let Some(power) =
                    self.currency.fusion_input_power_of_ten(out.amount, threshold, height)
                {
                    bucket_sizes[power as usize] += 1;
                }
            }
        }

        for bucket_size in bucket_sizes {
            if bucket_size >= self.currency.fusion_tx_min_input_count {
                estimate.fusion_ready_count += bucket_size;
            }
        }

        Ok(estimate)
    }

    /// Whether the ledger entry is a fusion transaction; memoized per index.
    pub fn is_fusion_transaction(&self, transaction_index: usize) -> Result<bool> {
        let mut state = self.state.lock();
        self.ensure_initialized(&state)?;
        self.ensure_not_stopped()?;

        if transaction_index >= state.ledger.len() {
            return Err(WalletError::IndexOutOfRange);
        }

        if let Some(&cached) = state.fusion_cache.get(&transaction_index) {
            return Ok(cached);
        }

        let transaction = state
            .ledger
            .get(transaction_index)
            .cloned()
            .expect("index checked above");
        let result = self.is_fusion_wallet_transaction(&state, &transaction);
        state.fusion_cache.insert(transaction_index, result);
        Ok(result)
    }

    /// On-chain fusion check: zero fee, input/output sums matching the
    /// container-reported totals, and the currency-level classification.
    pub(crate) fn is_fusion_wallet_transaction(
        &self,
        state: &WalletState,
        transaction: &WalletTransaction,
    ) -> bool {
        if transaction.fee != 0 {
            return false;
        }

        let mut inputs_sum = 0u64;
        let mut outputs_sum = 0u64;
        let mut input_amounts = Vec::new();
        let mut output_amounts: Vec<u64> = Vec::new();
        let mut transaction_info = None;

        for record in state.keystore.iter() {
            for output in record
                .container
                .transaction_outputs(&transaction.hash, OutputFilter::KEY_ALL)
            {
                let position = output.output_in_transaction as usize;
                if output_amounts.len() <= position {
                    output_amounts.resize(position + 1, 0);
                }
                debug_assert!(output.amount != 0);
                debug_assert!(output_amounts[position] == 0);
                output_amounts[position] = output.amount;
                outputs_sum += output.amount;
            }

            for input in record
                .container
                .transaction_inputs(&transaction.hash, OutputFilter::KEY_ALL)
            {
                inputs_sum += input.amount;
                input_amounts.push(input.amount);
            }

            if transaction_info.is_none() {
                transaction_info = record
                    .container
                    .transaction_information(&transaction.hash)
                    .map(|seen| seen.info);
            }
        }

        let Some(info) = transaction_info else {
            return false;
        };

        if outputs_sum != inputs_sum
            || outputs_sum != info.total_amount_out
            || inputs_sum != info.total_amount_in
        {
            return false;
        }

        // size is unknown at the wallet layer, so it is not checked here
        self.currency.is_fusion_transaction(
            &input_amounts,
            &output_amounts,
            0,
            self.node.last_known_block_height(),
        )
    }

    /// Groups every fusible output into power-of-ten buckets, picks a
    /// random bucket with enough members, and returns its outputs sorted
    /// ascending, subsampled down to `max_input_count`.
    fn pick_random_fusion_inputs(
        &self,
        state: &WalletState,
        threshold: u64,
        min_input_count: usize,
        max_input_count: usize,
    ) -> Vec<OutputToTransfer> {
        let height = self.node.last_known_block_height();
        let mut all_fusion_ready = Vec::new();
        let mut bucket_sizes = [0usize; FUSION_BUCKET_COUNT];

        for wallet in self.pick_wallets_with_money(state) {
            for out in wallet.outs {
                if let Some(power) =
                    self.currency.fusion_input_power_of_ten(out.amount, threshold, height)
                {
                    all_fusion_ready.push(OutputToTransfer {
                        out,
                        wallet_index: wallet.wallet_index,
                    });
                    bucket_sizes[power as usize] += 1;
                }
            }
        }

        let mut rng = ChaCha20Rng::from_seed(self.crypto.random_seed());
        let mut bucket_numbers: Vec<usize> = (0..bucket_sizes.len()).collect();
        bucket_numbers.shuffle(&mut rng);
        let Some(&selected_bucket) = bucket_numbers
            .iter()
            .find(|&&bucket| bucket_sizes[bucket] >= min_input_count)
        else {
            return Vec::new();
        };

        let lower_bound = 10u64.pow(selected_bucket as u32);
        let upper_bound = if selected_bucket == FUSION_BUCKET_COUNT - 1 {
            u64::MAX
        } else {
            lower_bound * 10
        };

        let mut selected_outs: Vec<OutputToTransfer> = all_fusion_ready
            .into_iter()
            .filter(|input| input.out.amount >= lower_bound && input.out.amount < upper_bound)
            .collect();
        debug_assert!(selected_outs.len() >= min_input_count);

        if selected_outs.len() > max_input_count {
            selected_outs.shuffle(&mut rng);
            selected_outs.truncate(max_input_count);
        }

        selected_outs.sort_by_key(|input| input.out.amount);
        selected_outs
    }

    fn decompose_fusion_outputs(&self, state: &WalletState, inputs_amount: u64) -> ReceiverAmounts {
        debug_assert!(!state.keystore.is_empty());
        let first_record = state.keystore.get(0).expect("at least one record");

        let mut amounts = self.currency.decompose_amount(inputs_amount, 0);
        amounts.sort_unstable();

        ReceiverAmounts {
            receiver: crate::types::AccountAddress {
                spend_public_key: first_record.spend_public_key,
                view_public_key: state.view_public_key,
            },
            amounts,
        }
    }
}
