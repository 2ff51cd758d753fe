//! Store error types
//!
//! Maps driver errors onto the three outcomes callers act on differently:
//! missing rows, transient conflicts worth retrying, and everything else.

use thiserror::Error;

/// SQLSTATE codes that signal a transient conflict
mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const QUERY_CANCELED: &str = "57014";

    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    /// Class 23: integrity constraint violation
    pub const INTEGRITY_CLASS: &str = "23";

    pub const RETRYABLE: [&str; 4] = [
        SERIALIZATION_FAILURE,
        DEADLOCK_DETECTED,
        LOCK_NOT_AVAILABLE,
        QUERY_CANCELED,
    ];
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Transient conflict: {0}")]
    Conflict(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Whether retrying the whole unit of work may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Like `From<sqlx::Error>`, but a foreign-key violation becomes
    /// `NotFound` for the referenced account.
    pub fn from_sqlx_with_reference(err: sqlx::Error, entity: &'static str, id: i64) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(sqlstate::FOREIGN_KEY_VIOLATION) {
                return StoreError::not_found(entity, id);
            }
        }
        StoreError::from(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::PoolTimedOut => Some(StoreError::Conflict(err.to_string())),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                if sqlstate::RETRYABLE.contains(&code.as_str()) {
                    Some(StoreError::Conflict(db.message().to_string()))
                } else if code.starts_with(sqlstate::INTEGRITY_CLASS) {
                    Some(StoreError::Constraint(db.message().to_string()))
                } else {
                    None
                }
            }
            _ => None,
        };
        classified.unwrap_or_else(|| StoreError::Database(err))
    }
}
