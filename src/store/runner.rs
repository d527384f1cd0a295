//! Unit-of-work runner
//!
//! Opens one transaction per call, hands the unit of work a handle bound to
//! it, then commits or rolls back. Nothing the unit of work did is visible
//! outside the transaction unless commit succeeds.

use futures::future::BoxFuture;
use tracing::{Instrument, debug, info_span, warn};

use super::backend::{TxBackend, TxHandle};
use super::context::TxContext;
use super::error::StoreError;
use crate::logging::STORE_TARGET;

pub struct TransactionRunner<B> {
    backend: B,
}

impl<B: TxBackend> TransactionRunner<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Execute `work` inside a transaction.
    ///
    /// - unit of work fails, rollback succeeds: the original error, unchanged
    /// - unit of work fails, rollback fails: `StoreError::Rollback` with both
    /// - commit fails: `StoreError::Commit`, as returned by the store
    ///
    /// Cancellation of `ctx` fails the unit of work with `Cancelled` and goes
    /// through the same rollback path.
    pub async fn exec_tx<T, F>(&self, ctx: &TxContext, work: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut B::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        let span = info_span!(target: STORE_TARGET, "tx", request_id = %ctx.request_id());

        async move {
            let mut tx = ctx.guard(self.backend.begin()).await?;

            let outcome = ctx.guard(work(&mut tx)).await;

            match outcome {
                Ok(value) => {
                    tx.commit().await?;
                    debug!("committed");
                    Ok(value)
                }
                Err(tx_err) => match tx.rollback().await {
                    Ok(()) => {
                        debug!(error = %tx_err, "rolled back");
                        Err(tx_err)
                    }
                    Err(rb_err) => {
                        warn!(error = %tx_err, rollback_error = %rb_err, "rollback failed");
                        Err(StoreError::rollback(tx_err, rb_err))
                    }
                },
            }
        }
        .instrument(span)
        .await
    }
}
