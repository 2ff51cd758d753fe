//! Bank Ledger - atomic funds transfer between ledger accounts
//!
//! # Modules
//!
//! - [`models`] - Account, Entry, Transfer and the transfer request/result
//! - [`store`] - Store traits with PostgreSQL and in-memory implementations
//! - [`transfer`] - Transfer executor, lock ordering, error taxonomy
//! - [`db`] - Connection pool and migrations
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use models::{Account, AccountId, Entry, Transfer, TransferRequest, TransferResult};
pub use store::{MemoryStore, PgStore, Store, StoreError, UnitOfWork};
pub use transfer::{ErrorKind, TransferError, TransferExecutor};
