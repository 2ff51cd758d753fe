//! Transfer Error Types

use thiserror::Error;

use crate::models::AccountId;
use crate::store::StoreError;

/// What a caller should do with a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is invalid; retrying cannot help
    Validation,
    /// A referenced row does not exist
    NotFound,
    /// Transient store conflict; the same request may succeed if retried
    Conflict,
    /// Any other store failure
    Store,
}

/// Transfer error types
///
/// Every variant means the unit of work was rolled back (or never started).
#[derive(Error, Debug)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(i64),

    #[error("Source and destination account cannot be the same: {0}")]
    SameAccount(AccountId),

    #[error("Currency mismatch: source is {from}, destination is {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Insufficient balance in account {account_id}: balance {balance}, amount {amount}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        amount: i64,
    },

    // === Store Errors ===
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Transient conflict, retry may succeed: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidAmount(_)
            | TransferError::SameAccount(_)
            | TransferError::CurrencyMismatch { .. }
            | TransferError::InsufficientFunds { .. } => ErrorKind::Validation,
            TransferError::NotFound { .. } => ErrorKind::NotFound,
            TransferError::Conflict(_) => ErrorKind::Conflict,
            TransferError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::SameAccount(_) => "SAME_ACCOUNT",
            TransferError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_BALANCE",
            TransferError::NotFound { .. } => "NOT_FOUND",
            TransferError::Conflict(_) => "CONFLICT",
            TransferError::Store(_) => "STORE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidAmount(_)
            | TransferError::SameAccount(_)
            | TransferError::CurrencyMismatch { .. } => 400,
            TransferError::InsufficientFunds { .. } => 422,
            TransferError::NotFound { .. } => 404,
            TransferError::Conflict(_) => 409,
            TransferError::Store(_) => 500,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => TransferError::NotFound { entity, id },
            StoreError::Conflict(msg) => TransferError::Conflict(msg),
            other => TransferError::Store(other),
        }
    }
}
