//! Currency parameters: the value object the wallet consults for dust rules,
//! amount decomposition, fusion classification, sizing and the address string
//! codec.

use sha3::{Digest, Keccak256};

use crate::types::{AccountAddress, Hash};

/// Significant decimal digits in a `u64`, which is also the number of
/// power-of-ten buckets fusion inputs are grouped into.
pub const FUSION_BUCKET_COUNT: usize = 20;

const ADDRESS_CHECKSUM_LEN: usize = 4;

#[derive(Clone, Debug)]
pub struct CurrencyParams {
    pub genesis_block_hash: Hash,
    /// Human-readable tag prepended to rendered addresses.
    pub address_prefix: &'static str,
    pub default_dust_threshold: u64,
    pub block_granted_full_reward_zone: usize,
    pub miner_tx_blob_reserved_size: usize,
    /// Tolerated clock skew of block timestamps, in seconds.
    pub block_future_time_limit: u64,
    pub fusion_tx_max_size: usize,
    pub fusion_tx_min_input_count: usize,
    pub fusion_tx_min_in_out_count_ratio: usize,
    pub max_tx_extra_size: usize,
    pub decimal_point: u32,
}

impl Default for CurrencyParams {
    fn default() -> Self {
        CurrencyParams {
            genesis_block_hash: [0u8; 32],
            address_prefix: "cn",
            default_dust_threshold: 10,
            block_granted_full_reward_zone: 100_000,
            miner_tx_blob_reserved_size: 600,
            block_future_time_limit: 60 * 60 * 2,
            fusion_tx_max_size: 30_000,
            fusion_tx_min_input_count: 12,
            fusion_tx_min_in_out_count_ratio: 4,
            max_tx_extra_size: 1024,
            decimal_point: 8,
        }
    }
}

impl CurrencyParams {
    /// Dust threshold effective at the given height. Height-invariant for
    /// this currency, kept parameterized because callers always know the
    /// current chain tip.
    pub fn dust_threshold(&self, _height: u32) -> u64 {
        self.default_dust_threshold
    }

    /// Splits `amount` into canonical `digit * 10^k` summands. Chunks that
    /// would fall at or below `dust_threshold` are merged into a single
    /// trailing dust summand.
    pub fn decompose_amount(&self, amount: u64, dust_threshold: u64) -> Vec<u64> {
        let mut summands = Vec::new();
        let mut dust = 0u64;
        let mut order = 1u64;
        let mut rest = amount;

        while rest != 0 {
            let chunk = (rest % 10) * order;
            rest /= 10;
            order = order.saturating_mul(10);

            if dust + chunk <= dust_threshold {
                dust += chunk;
            } else if chunk != 0 {
                summands.push(chunk);
            }
        }

        if dust != 0 {
            summands.push(dust);
        }

        summands
    }

    pub fn format_amount(&self, amount: u64) -> String {
        let divisor = 10u64.pow(self.decimal_point);
        format!(
            "{}.{:0width$}",
            amount / divisor,
            amount % divisor,
            width = self.decimal_point as usize
        )
    }

    /// Returns the power-of-ten bucket of `amount` when it is usable as a
    /// fusion input under `threshold`, i.e. a single significant digit,
    /// below the threshold and not dust.
    pub fn fusion_input_power_of_ten(
        &self,
        amount: u64,
        threshold: u64,
        height: u32,
    ) -> Option<u8> {
        if amount == 0 || amount >= threshold || amount < self.dust_threshold(height) {
            return None;
        }

        let mut power = 0u8;
        let mut rest = amount;
        while rest % 10 == 0 {
            rest /= 10;
            power += 1;
        }

        (rest < 10).then_some(power)
    }

    /// Consensus-level fusion classification over the input and output
    /// amount lists of a transaction. `size == 0` skips the size check.
    pub fn is_fusion_transaction(
        &self,
        input_amounts: &[u64],
        output_amounts: &[u64],
        size: usize,
        height: u32,
    ) -> bool {
        if size > self.fusion_tx_max_size {
            return false;
        }

        if input_amounts.len() < self.fusion_tx_min_input_count {
            return false;
        }

        if input_amounts.len() < output_amounts.len() * self.fusion_tx_min_in_out_count_ratio {
            return false;
        }

        let mut input_total = 0u64;
        for &amount in input_amounts {
            if amount < self.dust_threshold(height) {
                return false;
            }
            input_total = match input_total.checked_add(amount) {
                Some(total) => total,
                None => return false,
            };
        }

        let mut expected = self.decompose_amount(input_total, 0);
        expected.sort_unstable();
        let mut actual = output_amounts.to_vec();
        actual.sort_unstable();
        expected == actual
    }

    /// Upper bound on the number of inputs fitting in `transaction_size`
    /// bytes with `output_count` outputs and `mixin_count` ring partners per
    /// input, from the serialized representation's field sizes.
    pub fn approximate_maximum_input_count(
        &self,
        transaction_size: usize,
        output_count: usize,
        mixin_count: usize,
    ) -> usize {
        const KEY_IMAGE_SIZE: usize = 32;
        const OUTPUT_KEY_SIZE: usize = 32;
        const AMOUNT_SIZE: usize = 10;
        const GLOBAL_INDEXES_VECTOR_SIZE_SIZE: usize = 1;
        const GLOBAL_INDEXES_INITIAL_VALUE_SIZE: usize = 4;
        const GLOBAL_INDEXES_DIFFERENCE_SIZE: usize = 4;
        const SIGNATURE_SIZE: usize = 64;
        const EXTRA_TAG_SIZE: usize = 1;
        const INPUT_TAG_SIZE: usize = 1;
        const OUTPUT_TAG_SIZE: usize = 1;
        const PUBLIC_KEY_SIZE: usize = 32;
        const TRANSACTION_VERSION_SIZE: usize = 1;
        const TRANSACTION_UNLOCK_TIME_SIZE: usize = 10;

        let outputs_size = output_count * (OUTPUT_TAG_SIZE + OUTPUT_KEY_SIZE + AMOUNT_SIZE);
        let header_size =
            TRANSACTION_VERSION_SIZE + TRANSACTION_UNLOCK_TIME_SIZE + EXTRA_TAG_SIZE + PUBLIC_KEY_SIZE;
        let input_size = INPUT_TAG_SIZE
            + AMOUNT_SIZE
            + KEY_IMAGE_SIZE
            + SIGNATURE_SIZE
            + GLOBAL_INDEXES_VECTOR_SIZE_SIZE
            + GLOBAL_INDEXES_INITIAL_VALUE_SIZE
            + mixin_count * (GLOBAL_INDEXES_DIFFERENCE_SIZE + SIGNATURE_SIZE);

        transaction_size.saturating_sub(header_size + outputs_size) / input_size
    }

    pub fn account_address_as_string(&self, address: &AccountAddress) -> String {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(&address.spend_public_key);
        body.extend_from_slice(&address.view_public_key);
        let checksum = address_checksum(self.address_prefix, &body);
        format!(
            "{}{}{}",
            self.address_prefix,
            hex::encode(&body),
            hex::encode(checksum)
        )
    }

    pub fn parse_account_address_string(&self, value: &str) -> Option<AccountAddress> {
        let body_hex = value.strip_prefix(self.address_prefix)?;
        let bytes = hex::decode(body_hex).ok()?;
        if bytes.len() != 64 + ADDRESS_CHECKSUM_LEN {
            return None;
        }

        let (body, checksum) = bytes.split_at(64);
        if checksum != address_checksum(self.address_prefix, body) {
            return None;
        }

        let mut address = AccountAddress {
            spend_public_key: [0u8; 32],
            view_public_key: [0u8; 32],
        };
        address.spend_public_key.copy_from_slice(&body[..32]);
        address.view_public_key.copy_from_slice(&body[32..]);
        Some(address)
    }
}

fn address_checksum(prefix: &str, body: &[u8]) -> [u8; ADDRESS_CHECKSUM_LEN] {
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(body);
    let digest = hasher.finalize();
    let mut checksum = [0u8; ADDRESS_CHECKSUM_LEN];
    checksum.copy_from_slice(&digest[..ADDRESS_CHECKSUM_LEN]);
    checksum
}
