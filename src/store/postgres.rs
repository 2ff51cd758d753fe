//! PostgreSQL Store
//!
//! `accounts`, `entries` and `transfers` tables (see `migrations/`).
//! A unit of work is a `sqlx::Transaction`; sqlx issues `ROLLBACK` when an
//! uncommitted transaction is dropped.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{StoreError, TxOptions, UnitOfWork};
use crate::models::{Account, AccountId, CreateAccountParams, Entry, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl super::Store for PgStore {
    type Tx = PgUnitOfWork;

    async fn begin(&self, options: &TxOptions) -> Result<PgUnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Must run before any other statement in the transaction
        if options.isolation != super::IsolationLevel::ReadCommitted {
            sqlx::query(&format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                options.isolation.as_sql()
            ))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(timeout) = options.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis().max(1)))
                .execute(&mut *tx)
                .await?;
        }

        Ok(PgUnitOfWork { tx })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let account: Account = sqlx::query_as(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(account_id = account.id, owner = %account.owner, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        sqlx::query_as(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE account_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query_as(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers
             WHERE from_account_id = $1 OR to_account_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Open PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        sqlx::query_as(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3)
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            // Constraint names follow the `<table>_<column>_fkey` convention
            let missing = match &e {
                sqlx::Error::Database(db) if db.constraint() == Some("transfers_to_account_id_fkey") => {
                    to_account_id
                }
                _ => from_account_id,
            };
            StoreError::from_sqlx_with_reference(e, "account", missing)
        })
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, StoreError> {
        sqlx::query_as(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2)
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_sqlx_with_reference(e, "account", account_id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, StoreError> {
        // NO KEY UPDATE: does not block the KEY SHARE locks that foreign keys
        // from concurrent entry/transfer inserts take on the same row
        sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR NO KEY UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        sqlx::query_as(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
