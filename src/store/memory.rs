//! In-Memory Store
//!
//! Same transactional contract as PostgreSQL, kept in process:
//!
//! - every account row has an async lock; a unit of work holds the lock from
//!   its first `get_account_for_update`/`add_account_balance` until it ends
//! - balance changes go to a private working copy and are published on commit
//! - inserted transfers and entries are buffered and published on commit
//! - ids come from shared sequences, so a rolled-back insert leaves a gap
//!
//! Plain reads never wait on row locks; they see the last committed state.
//! A commit publishes its rows, transfers and entries under the write side of
//! a store-wide gate and every plain read takes the read side, so no reader
//! observes half of a commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StoreError, TxOptions, UnitOfWork};
use crate::models::{Account, AccountId, CreateAccountParams, Entry, Transfer};

struct AccountRow {
    lock: Arc<Mutex<()>>,
    committed: RwLock<Account>,
}

impl AccountRow {
    fn snapshot(&self) -> Account {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, account: Account) {
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = account;
    }
}

#[derive(Default)]
struct Tables {
    accounts: DashMap<AccountId, Arc<AccountRow>>,
    entries: DashMap<i64, Entry>,
    transfers: DashMap<i64, Transfer>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    commit_gate: RwLock<()>,
}

impl Tables {
    fn row(&self, id: AccountId) -> Result<Arc<AccountRow>, StoreError> {
        self.accounts
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    fn read_committed(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.commit_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Thread-safe in-process store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed transfer count
    pub fn transfer_count(&self) -> usize {
        let _gate = self.tables.read_committed();
        self.tables.transfers.len()
    }

    /// Committed entry count
    pub fn entry_count(&self) -> usize {
        let _gate = self.tables.read_committed();
        self.tables.entries.len()
    }

    /// Sum of committed balances over all accounts
    pub fn total_balance(&self) -> i64 {
        let _gate = self.tables.read_committed();
        self.tables
            .accounts
            .iter()
            .map(|r| r.value().snapshot().balance)
            .sum()
    }
}

#[async_trait]
impl super::Store for MemoryStore {
    type Tx = MemoryUnitOfWork;

    async fn begin(&self, options: &TxOptions) -> Result<MemoryUnitOfWork, StoreError> {
        Ok(MemoryUnitOfWork {
            tables: Arc::clone(&self.tables),
            options: *options,
            locked: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let account = Account {
            id: Tables::next_id(&self.tables.account_seq),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.tables.accounts.insert(
            account.id,
            Arc::new(AccountRow {
                lock: Arc::new(Mutex::new(())),
                committed: RwLock::new(account.clone()),
            }),
        );

        tracing::debug!(account_id = account.id, owner = %account.owner, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let _gate = self.tables.read_committed();
        Ok(self.tables.row(id)?.snapshot())
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        let _gate = self.tables.read_committed();
        self.tables
            .entries
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        let _gate = self.tables.read_committed();
        self.tables
            .transfers
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        let _gate = self.tables.read_committed();
        let mut rows: Vec<Entry> = self
            .tables
            .entries
            .iter()
            .filter(|r| r.value().account_id == account_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|e| e.id);
        Ok(page(rows, limit, offset))
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let _gate = self.tables.read_committed();
        let mut rows: Vec<Transfer> = self
            .tables
            .transfers
            .iter()
            .filter(|r| {
                let t = r.value();
                t.from_account_id == account_id || t.to_account_id == account_id
            })
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|t| t.id);
        Ok(page(rows, limit, offset))
    }
}

fn page<T>(rows: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

/// A row lock plus the working copy of the row it protects
struct LockedRow {
    row: Arc<AccountRow>,
    working: Account,
    _guard: OwnedMutexGuard<()>,
}

/// Open in-memory transaction. Dropping it releases its row locks and
/// discards the working copies and buffered inserts.
pub struct MemoryUnitOfWork {
    tables: Arc<Tables>,
    options: TxOptions,
    locked: HashMap<AccountId, LockedRow>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryUnitOfWork {
    async fn lock_row(&mut self, id: AccountId) -> Result<&mut Account, StoreError> {
        if !self.locked.contains_key(&id) {
            let row = self.tables.row(id)?;
            let acquire = Arc::clone(&row.lock).lock_owned();
            let guard = match self.options.lock_timeout {
                Some(timeout) => tokio::time::timeout(timeout, acquire)
                    .await
                    .map_err(|_| {
                        StoreError::Conflict(format!(
                            "lock wait on account {id} exceeded {}ms",
                            timeout.as_millis()
                        ))
                    })?,
                None => acquire.await,
            };
            // Read after locking so the working copy includes every
            // commit that released this lock before us
            let working = row.snapshot();
            self.locked.insert(
                id,
                LockedRow {
                    row,
                    working,
                    _guard: guard,
                },
            );
        }

        self.locked
            .get_mut(&id)
            .map(|locked| &mut locked.working)
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    /// Publish everything at once, while still holding every row lock
    fn publish(&mut self) {
        let tables = Arc::clone(&self.tables);
        let _gate = tables.publish_gate();
        for locked in self.locked.values() {
            locked.row.publish(locked.working.clone());
        }
        for transfer in self.transfers.drain(..) {
            tables.transfers.insert(transfer.id, transfer);
        }
        for entry in self.entries.drain(..) {
            tables.entries.insert(entry.id, entry);
        }
    }

    fn ensure_account(&self, id: AccountId) -> Result<(), StoreError> {
        self.tables.row(id).map(|_| ())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        self.ensure_account(from_account_id)?;
        self.ensure_account(to_account_id)?;
        if amount <= 0 {
            return Err(StoreError::Constraint(format!(
                "transfer amount must be positive, got {amount}"
            )));
        }

        let transfer = Transfer {
            id: Tables::next_id(&self.tables.transfer_seq),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, StoreError> {
        self.ensure_account(account_id)?;

        let entry = Entry {
            id: Tables::next_id(&self.tables.entry_seq),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, StoreError> {
        Ok(self.lock_row(id).await?.clone())
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        let account = self.lock_row(id).await?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            StoreError::Constraint(format!("balance of account {id} out of range"))
        })?;
        Ok(account.clone())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.publish();
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::time::Duration;

    async fn store_with_accounts(balances: &[i64]) -> (MemoryStore, Vec<Account>) {
        let store = MemoryStore::new();
        let mut accounts = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let account = store
                .create_account(CreateAccountParams {
                    owner: format!("owner{i}"),
                    balance: *balance,
                    currency: "USD".to_string(),
                })
                .await
                .unwrap();
            accounts.push(account);
        }
        (store, accounts)
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_non_zero() {
        let (_, accounts) = store_with_accounts(&[1, 2, 3]).await;
        let ids: Vec<_> = accounts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_commit_publishes_everything() {
        let (store, accounts) = store_with_accounts(&[100]).await;
        let id = accounts[0].id;

        let mut tx = store.begin(&TxOptions::default()).await.unwrap();
        let entry = tx.create_entry(id, 25).await.unwrap();
        let updated = tx.add_account_balance(id, 25).await.unwrap();
        assert_eq!(updated.balance, 125);

        // Not visible before commit
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
        assert!(store.get_entry(entry.id).await.is_err());

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(id).await.unwrap().balance, 125);
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_drop_discards_everything() {
        let (store, accounts) = store_with_accounts(&[100, 0]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        {
            let mut tx = store.begin(&TxOptions::default()).await.unwrap();
            tx.create_transfer(a, b, 40).await.unwrap();
            tx.add_account_balance(a, -40).await.unwrap();
        }

        assert_eq!(store.get_account(a).await.unwrap().balance, 100);
        assert_eq!(store.transfer_count(), 0);

        // Row lock was released by the drop
        let mut tx = store.begin(&TxOptions::default()).await.unwrap();
        tx.get_account_for_update(a).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_timeout_is_conflict() {
        let (store, accounts) = store_with_accounts(&[100]).await;
        let id = accounts[0].id;

        let mut holder = store.begin(&TxOptions::default()).await.unwrap();
        holder.get_account_for_update(id).await.unwrap();

        let options = TxOptions {
            lock_timeout: Some(Duration::from_millis(20)),
            ..TxOptions::default()
        };
        let mut waiter = store.begin(&options).await.unwrap();
        let err = waiter.add_account_balance(id, 1).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_balance() {
        let (store, accounts) = store_with_accounts(&[100]).await;
        let id = accounts[0].id;

        let mut first = store.begin(&TxOptions::default()).await.unwrap();
        first.add_account_balance(id, -30).await.unwrap();

        let second_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut second = second_store.begin(&TxOptions::default()).await.unwrap();
            let account = second.add_account_balance(id, -30).await.unwrap();
            second.commit().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 40);
        assert_eq!(store.total_balance(), 40);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let store = MemoryStore::new();
        let mut tx = store.begin(&TxOptions::default()).await.unwrap();
        assert!(matches!(
            tx.create_entry(7, 1).await,
            Err(StoreError::NotFound { entity: "account", id: 7 })
        ));
        assert!(matches!(
            tx.get_account_for_update(7).await,
            Err(StoreError::NotFound { entity: "account", id: 7 })
        ));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let (store, accounts) = store_with_accounts(&[0]).await;
        let id = accounts[0].id;

        let mut tx = store.begin(&TxOptions::default()).await.unwrap();
        for amount in 1..=5 {
            tx.create_entry(id, amount).await.unwrap();
        }
        tx.commit().await.unwrap();

        let page = store.list_entries(id, 2, 1).await.unwrap();
        let amounts: Vec<_> = page.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![2, 3]);
    }
}
