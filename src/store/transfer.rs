//! Transfer orchestration
//!
//! One transfer = one transaction: the transfer record, a debit entry, a
//! credit entry and both balance updates. Balance updates lock rows in
//! ascending account id (see [`lock_order`]) regardless of direction.
//!
//! No balance-sufficiency check is made; a transfer may leave the source
//! account negative.

use std::time::Duration;

use tracing::{Instrument, debug, debug_span, info, warn};

use super::backend::TxBackend;
use super::context::{RequestId, TxContext};
use super::error::StoreError;
use super::lock_order::lock_order;
use super::models::{
    Account, BalanceDelta, CreateAccountParams, Entry, Transfer, TransferTxParams, TransferTxResult,
};
use super::queries::Queries;
use super::runner::TransactionRunner;
use crate::config::DatabaseConfig;
use crate::logging::STORE_TARGET;

/// Ledger store: transfers plus single-statement reads and writes
pub struct Store<B> {
    runner: TransactionRunner<B>,
    tx_timeout: Option<Duration>,
}

impl<B: TxBackend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self {
            runner: TransactionRunner::new(backend),
            tx_timeout: None,
        }
    }

    /// Store whose default deadline is `database.tx_timeout_ms`
    pub fn from_config(backend: B, config: &DatabaseConfig) -> Self {
        Self::new(backend).with_tx_timeout(config.tx_timeout())
    }

    /// Default deadline for contexts that carry none
    pub fn with_tx_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tx_timeout = timeout;
        self
    }

    pub fn runner(&self) -> &TransactionRunner<B> {
        &self.runner
    }

    pub fn backend(&self) -> &B {
        self.runner.backend()
    }

    fn effective_ctx(&self, ctx: &TxContext) -> TxContext {
        match self.tx_timeout {
            Some(timeout) if !ctx.has_deadline() => ctx.clone().with_timeout(timeout),
            _ => ctx.clone(),
        }
    }

    /// Move `amount` from one account to another.
    ///
    /// Returns only after commit. On any error nothing was persisted, except
    /// for `StoreError::Commit`, where the outcome is up to the store.
    pub async fn transfer_tx(
        &self,
        ctx: &TxContext,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, StoreError> {
        let ctx = self.effective_ctx(ctx);
        let request_id = ctx.request_id();

        let result = self
            .runner
            .exec_tx(&ctx, move |tx| {
                Box::pin(async move { transfer_in_tx(tx, request_id, params).await })
            })
            .await;

        match &result {
            Ok(res) => info!(
                request_id = %request_id,
                transfer_id = res.transfer.id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                "Transfer committed"
            ),
            Err(e) => warn!(
                request_id = %request_id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                code = e.code(),
                error = %e,
                "Transfer failed"
            ),
        }

        result
    }

    pub async fn create_account(
        &self,
        ctx: &TxContext,
        params: CreateAccountParams,
    ) -> Result<Account, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.create_account(&params).await })
            })
            .await
    }

    pub async fn get_account(&self, ctx: &TxContext, account_id: i64) -> Result<Account, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.get_account(account_id).await })
            })
            .await
    }

    pub async fn get_entry(
        &self,
        ctx: &TxContext,
        entry_id: i64,
    ) -> Result<Option<Entry>, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.get_entry(entry_id).await })
            })
            .await
    }

    pub async fn list_entries(
        &self,
        ctx: &TxContext,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.list_entries(account_id, limit, offset).await })
            })
            .await
    }

    pub async fn get_transfer(
        &self,
        ctx: &TxContext,
        transfer_id: i64,
    ) -> Result<Option<Transfer>, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.get_transfer(transfer_id).await })
            })
            .await
    }

    pub async fn list_transfers(
        &self,
        ctx: &TxContext,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        self.runner
            .exec_tx(ctx, move |tx| {
                Box::pin(async move { tx.list_transfers(account_id, limit, offset).await })
            })
            .await
    }
}

/// The transfer unit of work, run on an open transaction
async fn transfer_in_tx<Q: Queries>(
    tx: &mut Q,
    request_id: RequestId,
    params: TransferTxParams,
) -> Result<TransferTxResult, StoreError> {
    let TransferTxParams {
        from_account_id,
        to_account_id,
        amount,
    } = params;

    let transfer = tx
        .create_transfer(from_account_id, to_account_id, amount)
        .instrument(debug_span!(
            target: STORE_TARGET,
            "create_transfer",
            request_id = %request_id,
            from = from_account_id,
            to = to_account_id,
            amount
        ))
        .await?;

    let from_entry = tx
        .create_entry(from_account_id, -amount)
        .instrument(debug_span!(
            target: STORE_TARGET,
            "create_entry",
            request_id = %request_id,
            account_id = from_account_id,
            amount = -amount
        ))
        .await?;

    let to_entry = tx
        .create_entry(to_account_id, amount)
        .instrument(debug_span!(
            target: STORE_TARGET,
            "create_entry",
            request_id = %request_id,
            account_id = to_account_id,
            amount
        ))
        .await?;

    let accounts = add_money(tx, request_id, &params.balance_deltas()).await?;
    let [from_account, to_account]: [Account; 2] =
        accounts.try_into().map_err(|v: Vec<Account>| {
            StoreError::Query(format!("expected 2 updated accounts, got {}", v.len()))
        })?;

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply signed balance deltas on an open transaction.
///
/// Each row is locked (read-for-update), read, and written back as
/// `balance + delta`, in ascending account id. Snapshots come back in the
/// order of `deltas`.
pub async fn add_money<Q: Queries>(
    tx: &mut Q,
    request_id: RequestId,
    deltas: &[BalanceDelta],
) -> Result<Vec<Account>, StoreError> {
    let mut snapshots: Vec<Option<Account>> = vec![None; deltas.len()];

    for idx in lock_order(deltas) {
        let BalanceDelta { account_id, amount } = deltas[idx];
        let span = debug_span!(
            target: STORE_TARGET,
            "add_balance",
            request_id = %request_id,
            account_id,
            amount
        );

        let account = async {
            let current = tx.get_account_for_update(account_id).await?;
            let balance = current
                .balance
                .checked_add(amount)
                .ok_or(StoreError::BalanceOverflow {
                    account_id,
                    balance: current.balance,
                    delta: amount,
                })?;
            debug!(before = current.balance, after = balance, "locked and updating");
            tx.update_account_balance(account_id, balance).await
        }
        .instrument(span)
        .await?;

        snapshots[idx] = Some(account);
    }

    Ok(snapshots.into_iter().flatten().collect())
}
