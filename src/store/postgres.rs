//! PostgreSQL implementation of the store boundary
//!
//! Row locks use `FOR NO KEY UPDATE`: exclusive against other lockers and
//! writers of the account row, but compatible with the `KEY SHARE` lock an
//! `INSERT` into `entries`/`transfers` takes on the referenced account
//! through its foreign key.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::backend::{TxBackend, TxHandle};
use super::error::StoreError;
use super::models::{Account, CreateAccountParams, Entry, Transfer};
use super::queries::Queries;
use crate::db::Database;

/// Open PostgreSQL transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TxBackend for Database {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Begin(e.to_string()))?;
        Ok(PgTx { tx })
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Queries for PgTx {
    async fn create_account(
        &mut self,
        params: &CreateAccountParams,
    ) -> Result<Account, StoreError> {
        let account: Account = sqlx::query_as(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3)
             RETURNING id, owner, balance, currency, created_at",
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, account_id: i64) -> Result<Account, StoreError> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, owner, balance, currency, created_at FROM accounts
             WHERE id = $1 LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        account.ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, owner, balance, currency, created_at FROM accounts
             WHERE id = $1 LIMIT 1
             FOR NO KEY UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        account.ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: i64,
    ) -> Result<Account, StoreError> {
        let account: Option<Account> = sqlx::query_as(
            "UPDATE accounts SET balance = $2 WHERE id = $1
             RETURNING id, owner, balance, currency, created_at",
        )
        .bind(account_id)
        .bind(balance)
        .fetch_optional(&mut *self.tx)
        .await?;

        account.ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        let entry: Entry = sqlx::query_as(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2)
             RETURNING id, account_id, amount, created_at",
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, entry_id: i64) -> Result<Option<Entry>, StoreError> {
        let entry: Option<Entry> = sqlx::query_as(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1 LIMIT 1",
        )
        .bind(entry_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn list_entries(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        let entries: Vec<Entry> = sqlx::query_as(
            "SELECT id, account_id, amount, created_at FROM entries
             WHERE account_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        let transfer: Transfer = sqlx::query_as(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3)
             RETURNING id, from_account_id, to_account_id, amount, created_at",
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, transfer_id: i64) -> Result<Option<Transfer>, StoreError> {
        let transfer: Option<Transfer> = sqlx::query_as(
            "SELECT id, from_account_id, to_account_id, amount, created_at
             FROM transfers WHERE id = $1 LIMIT 1",
        )
        .bind(transfer_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn list_transfers(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let transfers: Vec<Transfer> = sqlx::query_as(
            "SELECT id, from_account_id, to_account_id, amount, created_at FROM transfers
             WHERE from_account_id = $1 OR to_account_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transfers)
    }
}
