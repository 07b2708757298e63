//! End-to-end send pipeline scenarios against the mock node and sync
//! engine.

mod common;

use common::{harness, PASSWORD};
use cryptonote_wallet_core::{
    AccountAddress, ContainerTransaction, DonationSettings, TransactionInformation,
    TransactionParameters, WalletError, WalletEvent, WalletTransactionState, WalletTransferType,
    WalletOrder, UNCONFIRMED_TRANSACTION_HEIGHT,
};

fn other_address(t: &common::TestWallet) -> String {
    t.currency.account_address_as_string(&AccountAddress {
        spend_public_key: [0x99; 32],
        view_public_key: [0x9A; 32],
    })
}

/// One spendable record holding 100, as in the funded-wallet scenarios.
fn funded_wallet(t: &common::TestWallet) -> String {
    t.wallet.initialize(PASSWORD).unwrap();
    let address = t.wallet.create_address().unwrap();
    t.fund(&address, 100, 50, [0x61; 32], false);
    let _ = t.events_until_fence();
    address
}

fn send_params(t: &common::TestWallet, self_address: &str, amount: u64, fee: u64) -> TransactionParameters {
    TransactionParameters {
        destinations: vec![WalletOrder { address: other_address(t), amount }],
        fee,
        mix_in: 0,
        change_destination: self_address.to_string(),
        ..Default::default()
    }
}

#[test]
fn simple_send_succeeds_and_reconciles() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let (index, secret_key) = t
        .wallet
        .transfer(&send_params(&t, &self_address, 40, 10))
        .unwrap();
    assert_eq!(secret_key, [0xEE; 32]);

    let events = t.events_until_fence();
    assert_eq!(
        events,
        vec![
            WalletEvent::TransactionCreated { transaction_index: index },
            WalletEvent::TransactionUpdated { transaction_index: index },
        ]
    );

    let tx = t.wallet.transaction(index).unwrap();
    assert_eq!(tx.state, WalletTransactionState::Succeeded);
    assert_eq!(tx.fee, 10);
    assert_eq!(tx.block_height, UNCONFIRMED_TRANSACTION_HEIGHT);
    assert_eq!(t.node.relayed.lock().unwrap().len(), 1);

    // outgoing transfer rows as recorded at send time
    let transfers: Vec<_> = (0..t.wallet.transaction_transfer_count(index).unwrap())
        .map(|i| t.wallet.transaction_transfer(index, i).unwrap())
        .collect();
    assert!(transfers
        .iter()
        .any(|row| row.transfer_type == WalletTransferType::Usual
            && row.address == other_address(&t)
            && row.amount == 40));
    assert!(transfers
        .iter()
        .any(|row| row.transfer_type == WalletTransferType::Change
            && row.address == self_address
            && row.amount == 50));

    // now the wallet's own container observes the mined transaction
    let container = t.container_of(&self_address);
    container.spend_unlocked(100);
    container.set_transaction(ContainerTransaction {
        info: TransactionInformation {
            transaction_hash: tx.hash,
            block_height: 60,
            timestamp: 1_650_000_100,
            unlock_time: 0,
            total_amount_in: 100,
            total_amount_out: 90,
            extra: Vec::new(),
        },
        inputs_amount: 100,
        outputs_amount: 50,
    });
    t.wallet
        .on_transaction_updated(&tx.hash, &[t.container_handle_of(&self_address)]);

    let events = t.events_until_fence();
    assert_eq!(
        events,
        vec![WalletEvent::TransactionUpdated { transaction_index: index }]
    );

    let tx = t.wallet.transaction(index).unwrap();
    assert_eq!(tx.block_height, 60);
    // the wallet spent 100 and got 50 back as change
    assert_eq!(tx.total_amount, -50);

    let transfers: Vec<_> = (0..t.wallet.transaction_transfer_count(index).unwrap())
        .map(|i| t.wallet.transaction_transfer(index, i).unwrap())
        .collect();
    // per-direction sums match the transaction totals seen by the wallet
    let inputs: i64 = transfers.iter().filter(|row| row.amount < 0).map(|row| row.amount).sum();
    let outputs: i64 = transfers.iter().filter(|row| row.amount > 0).map(|row| row.amount).sum();
    assert_eq!(inputs, -100);
    assert_eq!(outputs, 90);
    assert!(transfers.iter().any(|row| row.address == self_address && row.amount == -100));

    assert_eq!(t.wallet.actual_balance().unwrap(), 0);
    assert_eq!(t.wallet.pending_balance().unwrap(), 0);
}

#[test]
fn insufficient_funds_leaves_no_ledger_entry() {
    let t = harness();
    let self_address = funded_wallet(&t);

    assert!(matches!(
        t.wallet.transfer(&send_params(&t, &self_address, 200, 10)),
        Err(WalletError::WrongAmount)
    ));
    assert_eq!(t.wallet.transaction_count().unwrap(), 1); // only the funding tx
    assert!(t.events_until_fence().is_empty());
}

#[test]
fn two_records_require_change_destination() {
    let t = harness();
    t.wallet.initialize(PASSWORD).unwrap();
    let first = t.wallet.create_address().unwrap();
    t.wallet.create_address().unwrap();
    t.fund(&first, 100, 50, [0x62; 32], false);
    let _ = t.events_until_fence();

    let parameters = TransactionParameters {
        destinations: vec![WalletOrder { address: other_address(&t), amount: 40 }],
        fee: 10,
        ..Default::default()
    };
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::ChangeAddressRequired)
    ));
}

#[test]
fn fee_below_node_minimum_is_rejected() {
    let t = harness();
    let self_address = funded_wallet(&t);
    t.node.minimal_fee.store(10, std::sync::atomic::Ordering::SeqCst);

    assert!(matches!(
        t.wallet.transfer(&send_params(&t, &self_address, 40, 5)),
        Err(WalletError::FeeTooSmall)
    ));
}

#[test]
fn empty_destinations_and_bad_amounts_are_rejected() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let empty = TransactionParameters {
        change_destination: self_address.clone(),
        fee: 0,
        ..Default::default()
    };
    assert!(matches!(t.wallet.transfer(&empty), Err(WalletError::ZeroDestination)));

    let mut zero_amount = send_params(&t, &self_address, 0, 0);
    zero_amount.destinations[0].amount = 0;
    assert!(matches!(
        t.wallet.transfer(&zero_amount),
        Err(WalletError::ZeroDestination)
    ));

    let mut bad_address = send_params(&t, &self_address, 40, 0);
    bad_address.destinations[0].address = "nonsense".into();
    assert!(matches!(
        t.wallet.transfer(&bad_address),
        Err(WalletError::BadAddress)
    ));
}

#[test]
fn donation_is_carved_from_change() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let donation_address = other_address(&t);
    // needed = 47, so the free amount 53 decomposes to [50, 3]
    let mut parameters = send_params(&t, &self_address, 37, 10);
    parameters.donation = DonationSettings { address: donation_address.clone(), threshold: 30 };

    let (index, _) = t.wallet.transfer(&parameters).unwrap();
    let transfers: Vec<_> = (0..t.wallet.transaction_transfer_count(index).unwrap())
        .map(|i| t.wallet.transaction_transfer(index, i).unwrap())
        .collect();

    let donation_row = transfers
        .iter()
        .find(|row| row.transfer_type == WalletTransferType::Donation)
        .expect("donation transfer present");
    // only the 3 fits under the threshold of 30
    assert_eq!(donation_row.amount, 3);
    let change_row = transfers
        .iter()
        .find(|row| row.transfer_type == WalletTransferType::Change)
        .expect("change transfer present");
    assert_eq!(change_row.amount, 50);
}

#[test]
fn donation_threshold_and_address_must_agree() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let mut parameters = send_params(&t, &self_address, 40, 10);
    parameters.donation = DonationSettings { address: other_address(&t), threshold: 0 };
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::WrongParameters)
    ));
}

#[test]
fn mixin_shortage_fails_before_any_state_change() {
    let t = harness();
    let self_address = funded_wallet(&t);
    t.node.outs_per_amount.store(2, std::sync::atomic::Ordering::SeqCst);

    let mut parameters = send_params(&t, &self_address, 40, 10);
    parameters.mix_in = 5;
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::MixinCountTooBig)
    ));
    assert_eq!(t.wallet.transaction_count().unwrap(), 1);
    assert!(t.node.relayed.lock().unwrap().is_empty());
}

#[test]
fn send_with_mixins_relays() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let mut parameters = send_params(&t, &self_address, 40, 10);
    parameters.mix_in = 3;
    let (index, _) = t.wallet.transfer(&parameters).unwrap();
    assert_eq!(
        t.wallet.transaction(index).unwrap().state,
        WalletTransactionState::Succeeded
    );
    assert_eq!(t.node.relayed.lock().unwrap().len(), 1);
}

#[test]
fn relay_failure_marks_transaction_failed_and_unregisters() {
    let t = harness();
    let self_address = funded_wallet(&t);
    t.node.fail_relay.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = t.wallet.transfer(&send_params(&t, &self_address, 40, 10));
    assert!(matches!(result, Err(WalletError::Node(_))));

    // the ledger entry exists but was flipped to FAILED, and the
    // unconfirmed registration was rolled back
    assert_eq!(t.wallet.transaction_count().unwrap(), 2);
    assert_eq!(
        t.wallet.transaction(1).unwrap().state,
        WalletTransactionState::Failed
    );
    assert!(t.sync.unconfirmed.lock().unwrap().is_empty());

    let events = t.events_until_fence();
    assert_eq!(
        events,
        vec![
            WalletEvent::TransactionCreated { transaction_index: 1 },
            WalletEvent::TransactionUpdated { transaction_index: 1 },
        ]
    );
}

#[test]
fn unconfirmed_registration_failure_rolls_back() {
    let t = harness();
    let self_address = funded_wallet(&t);
    t.sync
        .fail_add_unconfirmed
        .store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(t.wallet.transfer(&send_params(&t, &self_address, 40, 10)).is_err());
    assert_eq!(
        t.wallet.transaction(1).unwrap().state,
        WalletTransactionState::Failed
    );
    assert!(t.node.relayed.lock().unwrap().is_empty());
}

#[test]
fn make_then_commit_matches_direct_transfer() {
    // two identical wallets; one sends directly, the other stages and
    // commits
    let direct = harness();
    let direct_address = funded_wallet(&direct);
    let staged = harness();
    let staged_address = funded_wallet(&staged);

    let (direct_index, _) = direct
        .wallet
        .transfer(&send_params(&direct, &direct_address, 40, 10))
        .unwrap();

    let staged_index = staged
        .wallet
        .make_transaction(&send_params(&staged, &staged_address, 40, 10))
        .unwrap();

    // staged: CREATED, registered unconfirmed, nothing relayed yet
    assert_eq!(
        staged.wallet.transaction(staged_index).unwrap().state,
        WalletTransactionState::Created
    );
    assert_eq!(staged.wallet.delayed_transaction_indexes().unwrap(), vec![staged_index]);
    assert!(staged.node.relayed.lock().unwrap().is_empty());

    staged.wallet.commit_transaction(staged_index).unwrap();

    let direct_tx = direct.wallet.transaction(direct_index).unwrap();
    let staged_tx = staged.wallet.transaction(staged_index).unwrap();
    assert_eq!(direct_tx.state, staged_tx.state);
    assert_eq!(direct_tx.hash, staged_tx.hash);
    assert_eq!(direct_tx.fee, staged_tx.fee);
    assert_eq!(
        *direct.node.relayed.lock().unwrap(),
        *staged.node.relayed.lock().unwrap()
    );
    assert!(staged.wallet.delayed_transaction_indexes().unwrap().is_empty());
}

#[test]
fn commit_requires_a_created_uncommitted_transaction() {
    let t = harness();
    let self_address = funded_wallet(&t);

    assert!(matches!(
        t.wallet.commit_transaction(99),
        Err(WalletError::IndexOutOfRange)
    ));
    // the funding transaction is SUCCEEDED and not uncommitted
    assert!(matches!(
        t.wallet.commit_transaction(0),
        Err(WalletError::TxTransferImpossible)
    ));

    let index = t
        .wallet
        .make_transaction(&send_params(&t, &self_address, 40, 10))
        .unwrap();
    t.wallet.commit_transaction(index).unwrap();
    // a second commit is impossible
    assert!(matches!(
        t.wallet.commit_transaction(index),
        Err(WalletError::TxTransferImpossible)
    ));
}

#[test]
fn rollback_unregisters_and_clears_uncommitted() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let index = t
        .wallet
        .make_transaction(&send_params(&t, &self_address, 40, 10))
        .unwrap();
    assert_eq!(t.sync.unconfirmed.lock().unwrap().len(), 1);

    t.wallet.rollback_uncommitted_transaction(index).unwrap();
    assert!(t.sync.unconfirmed.lock().unwrap().is_empty());
    assert!(t.wallet.delayed_transaction_indexes().unwrap().is_empty());
    assert!(matches!(
        t.wallet.rollback_uncommitted_transaction(index),
        Err(WalletError::TxCancelImpossible)
    ));
}

#[test]
fn source_addresses_must_belong_to_wallet() {
    let t = harness();
    let self_address = funded_wallet(&t);

    let mut parameters = send_params(&t, &self_address, 40, 10);
    parameters.source_addresses = vec![other_address(&t)];
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::BadAddress)
    ));
}

#[test]
fn change_destination_must_belong_to_wallet() {
    let t = harness();
    let _ = funded_wallet(&t);

    let mut parameters = send_params(&t, &other_address(&t), 40, 10);
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::ChangeAddressNotFound)
    ));

    parameters.change_destination = "not-even-an-address".into();
    assert!(matches!(
        t.wallet.transfer(&parameters),
        Err(WalletError::BadAddress)
    ));
}
