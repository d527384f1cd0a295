//! Repository boundary
//!
//! Every call runs on an explicit transaction handle (`&mut self`), never on
//! ambient connection state, so two transactions cannot see each other's
//! uncommitted rows.

use async_trait::async_trait;

use super::error::StoreError;
use super::models::{Account, CreateAccountParams, Entry, Transfer};

#[async_trait]
pub trait Queries: Send {
    // === Accounts ===

    async fn create_account(&mut self, params: &CreateAccountParams)
    -> Result<Account, StoreError>;

    /// Plain read, no lock
    async fn get_account(&mut self, account_id: i64) -> Result<Account, StoreError>;

    /// Read the row and hold an exclusive lock on it until the enclosing
    /// transaction ends. Blocks while another transaction holds that lock.
    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError>;

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: i64,
    ) -> Result<Account, StoreError>;

    // === Entries ===

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError>;

    async fn get_entry(&mut self, entry_id: i64) -> Result<Option<Entry>, StoreError>;

    /// Entries of one account, oldest first
    async fn list_entries(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError>;

    // === Transfers ===

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError>;

    async fn get_transfer(&mut self, transfer_id: i64) -> Result<Option<Transfer>, StoreError>;

    /// Transfers where the account is source or destination, oldest first
    async fn list_transfers(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError>;
}
