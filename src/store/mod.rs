//! Ledger Store
//!
//! Atomic money transfers between two accounts with a double-entry ledger.
//!
//! # Architecture
//!
//! ```text
//! Store::transfer_tx
//!   └─ TransactionRunner::exec_tx      BEGIN ... COMMIT | ROLLBACK
//!        └─ unit of work (one handle)
//!             1. create transfer       (from, to, amount)
//!             2. create entry          (from, -amount)
//!             3. create entry          (to,   +amount)
//!             4. add_money             lock + update rows, ascending account id
//! ```
//!
//! # Guarantees
//!
//! 1. **All-or-nothing**: rows and balances become visible together on commit, or not at all
//! 2. **Zero-sum**: the two entries of a transfer sum to zero
//! 3. **Ordered locking**: any two transfers over the same pair lock rows in the same order
//! 4. **No retries**: every failure is returned to the caller

pub mod backend;
pub mod context;
pub mod error;
pub mod lock_order;
pub mod models;
pub mod postgres;
pub mod queries;
pub mod runner;
pub mod transfer;

#[cfg(test)]
pub mod memory;


// Re-exports for convenience
pub use backend::{TxBackend, TxHandle};
pub use context::{CancelHandle, RequestId, TxContext};
pub use error::StoreError;
pub use lock_order::{lock_order, ordered_pair};
pub use models::{
    Account, BalanceDelta, CreateAccountParams, Entry, Transfer, TransferTxParams, TransferTxResult,
};
pub use postgres::PgTx;
pub use queries::Queries;
pub use runner::TransactionRunner;
pub use transfer::{Store, add_money};
