//! Transaction boundary consumed from the storage engine

use async_trait::async_trait;

use super::error::StoreError;
use super::queries::Queries;

/// A store that can open transactions
#[async_trait]
pub trait TxBackend: Send + Sync {
    type Tx: TxHandle;

    /// Open a transaction. Failures map to `StoreError::Begin`.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// An open transaction. Consumed by `commit` or `rollback`.
#[async_trait]
pub trait TxHandle: Queries + Sized {
    /// Failures map to `StoreError::Commit`
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
