//! Atomic Funds Transfer
//!
//! [`TransferExecutor::transfer_tx`] moves an amount between two accounts of
//! a [`Store`](crate::store::Store), producing one transfer row, a debit and a
//! credit entry, and both updated balances, all in a single unit of work.
//!
//! # Invariants
//!
//! 1. **All or nothing**: on any error the unit of work is rolled back
//! 2. **Entries balance**: the two entries of a transfer sum to zero
//! 3. **Lock order**: account rows are locked in ascending id, never by role
//! 4. **No hidden retries**: conflicts surface as [`ErrorKind::Conflict`]

pub mod error;
pub mod executor;

pub use error::{ErrorKind, TransferError};
pub use executor::{TransferExecutor, lock_order};
