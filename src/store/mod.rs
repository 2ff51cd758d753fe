//! Store Boundary
//!
//! The persistence contract the transfer executor runs against.
//!
//! - [`Store`] hands out units of work and serves plain (unlocked) reads.
//! - [`UnitOfWork`] is one open transaction. It only persists on
//!   [`UnitOfWork::commit`]; dropping it on any other path (early `?` return,
//!   panic, cancelled future) discards everything it did.
//!
//! Two implementations ship with the crate: [`PgStore`] over PostgreSQL and
//! [`MemoryStore`], an in-process store with the same locking contract.

pub mod error;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Account, AccountId, CreateAccountParams, Entry, Transfer};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Transaction isolation level requested for a unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Per-transaction settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    /// Upper bound on a single row-lock wait. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: UnitOfWork;

    /// Open a unit of work
    async fn begin(&self, options: &TxOptions) -> Result<Self::Tx, StoreError>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError>;

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError>;

    /// Entries of one account, oldest first
    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Transfers where the account is either side, oldest first
    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError>;
}

/// One open transaction against a [`Store`]
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, account_id: AccountId, amount: i64)
    -> Result<Entry, StoreError>;

    /// Read an account and hold its row lock until the unit of work ends
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Add `delta` to the balance and return the updated row.
    /// Takes the row lock if not already held.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    /// Explicit rollback. Dropping the unit of work has the same effect.
    async fn rollback(self) -> Result<(), StoreError>;
}
