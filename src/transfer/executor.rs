//! Transfer Executor
//!
//! Moves funds between two accounts inside one unit of work:
//!
//! ```text
//! validate ─▶ begin ─▶ insert transfer + 2 entries
//!                  ─▶ lock both rows, lower id first
//!                  ─▶ currency / funds checks
//!                  ─▶ apply both balance deltas, lower id first
//!                  ─▶ commit
//! ```
//!
//! Row locks are always taken in ascending account id, whatever the
//! direction of the transfer, so `A→B` and `B→A` running together queue on
//! the same first row instead of each holding what the other needs.

use std::sync::Arc;

use tracing::debug;

use super::error::TransferError;
use crate::config::TransferConfig;
use crate::models::{Account, AccountId, TransferRequest, TransferResult};
use crate::store::{Store, TxOptions, UnitOfWork};

/// The order in which a transfer locks and updates its two accounts
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl TransferRequest {
    /// Checks that need no store access
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.amount <= 0 {
            return Err(TransferError::InvalidAmount(self.amount));
        }
        if self.from_account_id == self.to_account_id {
            return Err(TransferError::SameAccount(self.from_account_id));
        }
        Ok(())
    }
}

pub struct TransferExecutor<S: Store> {
    store: Arc<S>,
    config: TransferConfig,
}

impl<S: Store> TransferExecutor<S> {
    pub fn new(store: Arc<S>, config: TransferConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Execute one transfer atomically.
    ///
    /// Nothing persists unless this returns `Ok`. Dropping the returned
    /// future before it completes rolls the transfer back.
    ///
    /// # Errors
    /// See [`TransferError::kind`]: only `Conflict` errors are worth retrying,
    /// and the executor never retries on its own.
    pub async fn transfer_tx(&self, req: TransferRequest) -> Result<TransferResult, TransferError> {
        req.validate()?;

        let options = self.tx_options();
        let mut tx = self.store.begin(&options).await?;

        match self.run(&mut tx, &req).await {
            Ok(result) => {
                tx.commit().await?;
                debug!(
                    transfer_id = result.transfer.id,
                    from = req.from_account_id,
                    to = req.to_account_id,
                    amount = req.amount,
                    "Transfer committed"
                );
                Ok(result)
            }
            Err(e) => {
                debug!(
                    from = req.from_account_id,
                    to = req.to_account_id,
                    amount = req.amount,
                    code = e.code(),
                    "Transfer aborted"
                );
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        tx: &mut S::Tx,
        req: &TransferRequest,
    ) -> Result<TransferResult, TransferError> {
        let transfer = tx
            .create_transfer(req.from_account_id, req.to_account_id, req.amount)
            .await?;
        let from_entry = tx.create_entry(req.from_account_id, -req.amount).await?;
        let to_entry = tx.create_entry(req.to_account_id, req.amount).await?;

        let (first, second) = lock_order(req.from_account_id, req.to_account_id);
        let first_row = tx.get_account_for_update(first).await?;
        let second_row = tx.get_account_for_update(second).await?;
        let (from_row, to_row) = if first == req.from_account_id {
            (first_row, second_row)
        } else {
            (second_row, first_row)
        };
        self.check_accounts(req, &from_row, &to_row)?;

        let (from_account, to_account) = if first == req.from_account_id {
            let from = tx.add_account_balance(req.from_account_id, -req.amount).await?;
            let to = tx.add_account_balance(req.to_account_id, req.amount).await?;
            (from, to)
        } else {
            let to = tx.add_account_balance(req.to_account_id, req.amount).await?;
            let from = tx.add_account_balance(req.from_account_id, -req.amount).await?;
            (from, to)
        };

        Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }

    fn check_accounts(
        &self,
        req: &TransferRequest,
        from: &Account,
        to: &Account,
    ) -> Result<(), TransferError> {
        if from.currency != to.currency {
            return Err(TransferError::CurrencyMismatch {
                from: from.currency.clone(),
                to: to.currency.clone(),
            });
        }
        if self.config.enforce_sufficient_funds && from.balance < req.amount {
            return Err(TransferError::InsufficientFunds {
                account_id: from.id,
                balance: from.balance,
                amount: req.amount,
            });
        }
        Ok(())
    }

    fn tx_options(&self) -> TxOptions {
        TxOptions {
            isolation: self.config.isolation,
            lock_timeout: self.config.lock_timeout(),
        }
    }
}
