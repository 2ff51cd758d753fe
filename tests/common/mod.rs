//! Transfer scenarios shared by the in-memory and PostgreSQL suites

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use bank_ledger::config::TransferConfig;
use bank_ledger::models::{Account, CreateAccountParams, TransferRequest};
use bank_ledger::store::Store;
use bank_ledger::transfer::{TransferError, TransferExecutor};

pub fn random_owner() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Arbitrary starting balance, possibly smaller than what the scenarios move
pub fn random_account_params(currency: &str) -> CreateAccountParams {
    CreateAccountParams {
        owner: random_owner(),
        balance: rand::thread_rng().gen_range(0..1_000),
        currency: currency.to_string(),
    }
}

pub async fn create_random_account<S: Store>(store: &S) -> Account {
    let params = random_account_params("USD");
    let account = store
        .create_account(params.clone())
        .await
        .expect("Should create account");

    assert_eq!(account.owner, params.owner);
    assert_eq!(account.balance, params.balance);
    assert_eq!(account.currency, params.currency);
    assert!(account.id > 0);
    account
}

/// Fire `requests` concurrently and collect every outcome
pub async fn run_concurrently<S: Store>(
    executor: &Arc<TransferExecutor<S>>,
    requests: Vec<TransferRequest>,
) -> Vec<Result<bank_ledger::TransferResult, TransferError>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|req| {
            let executor = Arc::clone(executor);
            tokio::spawn(async move { executor.transfer_tx(req).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.expect("transfer task panicked"));
    }
    outcomes
}

/// `n` concurrent transfers of `amount` from one account to another.
///
/// Every result must be internally consistent and observe a distinct
/// intermediate balance; the final balances move by exactly `n * amount`.
///
/// Starting balances are arbitrary, so run with `enforce_sufficient_funds`
/// off.
pub async fn check_concurrent_transfers<S: Store>(executor: Arc<TransferExecutor<S>>) {
    let store = executor.store();
    let from_account = create_random_account(store).await;
    let to_account = create_random_account(store).await;

    let n = 5;
    let amount = 10_i64;
    let requests = vec![TransferRequest::new(from_account.id, to_account.id, amount); n];

    let mut seen = HashSet::new();
    for outcome in run_concurrently(&executor, requests).await {
        let result = outcome.expect("transfer should succeed");

        // check transfer
        let transfer = &result.transfer;
        assert_eq!(transfer.from_account_id, from_account.id);
        assert_eq!(transfer.to_account_id, to_account.id);
        assert_eq!(transfer.amount, amount);
        assert!(transfer.id > 0);
        assert!(transfer.created_at.timestamp() > 0);
        assert_eq!(&store.get_transfer(transfer.id).await.unwrap(), transfer);

        // check entries
        let from_entry = &result.from_entry;
        assert_eq!(from_entry.account_id, from_account.id);
        assert_eq!(from_entry.amount, -amount);
        assert!(from_entry.id > 0);
        assert!(from_entry.created_at.timestamp() > 0);
        assert_eq!(&store.get_entry(from_entry.id).await.unwrap(), from_entry);

        let to_entry = &result.to_entry;
        assert_eq!(to_entry.account_id, to_account.id);
        assert_eq!(to_entry.amount, amount);
        assert!(to_entry.id > 0);
        assert!(to_entry.created_at.timestamp() > 0);
        assert_eq!(&store.get_entry(to_entry.id).await.unwrap(), to_entry);

        // check accounts
        assert_eq!(result.from_account.id, from_account.id);
        assert_eq!(result.to_account.id, to_account.id);

        // check balances
        let diff_from = from_account.balance - result.from_account.balance;
        let diff_to = result.to_account.balance - to_account.balance;
        assert_eq!(diff_from, diff_to);
        assert!(diff_from > 0);
        assert_eq!(diff_from % amount, 0);

        let k = diff_from / amount;
        assert!((1..=n as i64).contains(&k), "unexpected multiple {k}");
        assert!(seen.insert(k), "two transfers observed the same balance");
    }

    let updated_from = store.get_account(from_account.id).await.unwrap();
    let updated_to = store.get_account(to_account.id).await.unwrap();
    assert_eq!(updated_from.balance, from_account.balance - n as i64 * amount);
    assert_eq!(updated_to.balance, to_account.balance + n as i64 * amount);

    // one transfer row and one entry per side per call
    let transfers = store.list_transfers(from_account.id, 100, 0).await.unwrap();
    assert_eq!(transfers.len(), n);
    let entries = store.list_entries(to_account.id, 100, 0).await.unwrap();
    assert_eq!(entries.len(), n);
    assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), n as i64 * amount);
}

/// `n` concurrent transfers alternating direction between the same pair.
///
/// Opposite transfers must neither deadlock nor fail, and cancel out exactly.
/// Run with `enforce_sufficient_funds` off, as above.
pub async fn check_opposite_direction_transfers<S: Store>(executor: Arc<TransferExecutor<S>>) {
    let store = executor.store();
    let account1 = create_random_account(store).await;
    let account2 = create_random_account(store).await;

    let n = 10;
    let amount = 10_i64;
    let forward = TransferRequest::new(account1.id, account2.id, amount);
    let requests = (0..n)
        .map(|i| if i % 2 == 1 { forward.reversed() } else { forward })
        .collect();

    for outcome in run_concurrently(&executor, requests).await {
        outcome.expect("opposite-direction transfer should succeed");
    }

    let updated1 = store.get_account(account1.id).await.unwrap();
    let updated2 = store.get_account(account2.id).await.unwrap();
    assert_eq!(updated1.balance, account1.balance);
    assert_eq!(updated2.balance, account2.balance);

    // net of each account's entries is zero
    let entries = store.list_entries(account1.id, 100, 0).await.unwrap();
    assert_eq!(entries.len(), n);
    assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 0);
}

/// A rejected transfer leaves balances, transfers and entries untouched.
/// Needs `enforce_sufficient_funds` on.
pub async fn check_failed_transfer_leaves_no_trace<S: Store>(executor: Arc<TransferExecutor<S>>) {
    let store = executor.store();
    let from_account = create_random_account(store).await;
    let to_account = create_random_account(store).await;

    let err = executor
        .transfer_tx(TransferRequest::new(
            from_account.id,
            to_account.id,
            from_account.balance + 1,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InsufficientFunds { .. }));
    assert!(!err.is_retryable());

    let err = executor
        .transfer_tx(TransferRequest::new(from_account.id, i64::MAX, 10))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransferError::NotFound { entity: "account", id } if id == i64::MAX),
        "got {err:?}"
    );

    // unknown source account
    let err = executor
        .transfer_tx(TransferRequest::new(i64::MAX, to_account.id, 10))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransferError::NotFound { entity: "account", id } if id == i64::MAX),
        "got {err:?}"
    );
    assert!(!err.is_retryable());

    assert_eq!(
        store.get_account(from_account.id).await.unwrap().balance,
        from_account.balance
    );
    assert_eq!(
        store.get_account(to_account.id).await.unwrap().balance,
        to_account.balance
    );
    assert!(store.list_transfers(from_account.id, 10, 0).await.unwrap().is_empty());
    assert!(store.list_entries(from_account.id, 10, 0).await.unwrap().is_empty());
    assert!(store.list_transfers(to_account.id, 10, 0).await.unwrap().is_empty());
    assert!(store.list_entries(to_account.id, 10, 0).await.unwrap().is_empty());
}

/// Transfer settings for scenarios that start from arbitrary balances
pub fn unguarded() -> TransferConfig {
    TransferConfig {
        enforce_sufficient_funds: false,
        ..TransferConfig::default()
    }
}
