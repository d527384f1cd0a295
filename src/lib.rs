//! simple_bank - atomic double-entry transfers on PostgreSQL
//!
//! # Modules
//!
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL connection pool
//! - [`store`] - transaction runner, lock ordering and transfer orchestration

pub mod config;
pub mod db;
pub mod logging;
pub mod store;

pub use config::AppConfig;
pub use db::Database;
pub use store::{
    Account, Entry, Store, StoreError, Transfer, TransferTxParams, TransferTxResult, TxContext,
};
