//! In-memory transactional store for tests
//!
//! Each account row carries a `tokio::sync::Mutex`; read-for-update and
//! balance writes take it and keep the owned guard until commit or rollback,
//! the way a row lock behaves in PostgreSQL. Writes stay private to the
//! transaction until commit. Faults can be injected per backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use super::backend::{TxBackend, TxHandle};
use super::error::StoreError;
use super::models::{Account, CreateAccountParams, Entry, Transfer};
use super::queries::Queries;

struct AccountRow {
    account: Account,
    lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, AccountRow>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

#[derive(Default)]
struct Faults {
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    /// Fail the n-th `create_entry` (1-based) of every transaction
    fail_entry_at: Option<usize>,
}

/// One row-lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEvent {
    pub tx_seq: u64,
    pub account_id: i64,
}

struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    lock_log: Mutex<Vec<LockEvent>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_tx_seq: AtomicU64,
    commit_count: AtomicUsize,
    rollback_count: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                faults: Mutex::new(Faults::default()),
                lock_log: Mutex::new(Vec::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                next_tx_seq: AtomicU64::new(1),
                commit_count: AtomicUsize::new(0),
                rollback_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Insert a committed account directly
    pub fn seed_account(&self, owner: &str, balance: i64, currency: &str) -> Account {
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: owner.to_string(),
            balance,
            currency: currency.to_string(),
            created_at: Utc::now(),
        };
        self.shared.tables.lock().unwrap().accounts.insert(
            account.id,
            AccountRow {
                account: account.clone(),
                lock: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        account
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.shared.faults.lock().unwrap().fail_begin = fail;
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.shared.faults.lock().unwrap().fail_commit = fail;
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.shared.faults.lock().unwrap().fail_rollback = fail;
    }

    pub fn set_fail_entry_at(&self, nth: Option<usize>) {
        self.shared.faults.lock().unwrap().fail_entry_at = nth;
    }

    pub fn committed_account(&self, account_id: i64) -> Option<Account> {
        let tables = self.shared.tables.lock().unwrap();
        tables.accounts.get(&account_id).map(|r| r.account.clone())
    }

    pub fn committed_entries(&self) -> Vec<Entry> {
        self.shared.tables.lock().unwrap().entries.clone()
    }

    pub fn committed_transfers(&self) -> Vec<Transfer> {
        self.shared.tables.lock().unwrap().transfers.clone()
    }

    pub fn lock_log(&self) -> Vec<LockEvent> {
        self.shared.lock_log.lock().unwrap().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.shared.commit_count.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.shared.rollback_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        if self.shared.faults.lock().unwrap().fail_begin {
            return Err(StoreError::Begin("injected: connection refused".into()));
        }
        Ok(MemoryTx {
            shared: self.shared.clone(),
            tx_seq: self.shared.next_tx_seq.fetch_add(1, Ordering::SeqCst),
            held: HashMap::new(),
            accounts: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            entries_created: 0,
        })
    }
}

pub struct MemoryTx {
    shared: Arc<Shared>,
    tx_seq: u64,
    held: HashMap<i64, OwnedMutexGuard<()>>,
    /// Accounts written or created by this transaction
    accounts: HashMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    entries_created: usize,
}

impl MemoryTx {
    fn visible_account(&self, account_id: i64) -> Option<Account> {
        if let Some(account) = self.accounts.get(&account_id) {
            return Some(account.clone());
        }
        let tables = self.shared.tables.lock().unwrap();
        tables.accounts.get(&account_id).map(|r| r.account.clone())
    }

    /// Take the row lock unless this transaction already holds it or
    /// created the row
    async fn lock_row(&mut self, account_id: i64) -> Result<(), StoreError> {
        if self.held.contains_key(&account_id) {
            return Ok(());
        }
        let row_lock = {
            let tables = self.shared.tables.lock().unwrap();
            tables.accounts.get(&account_id).map(|r| r.lock.clone())
        };
        let Some(row_lock) = row_lock else {
            return if self.accounts.contains_key(&account_id) {
                Ok(())
            } else {
                Err(StoreError::AccountNotFound(account_id))
            };
        };

        let guard = row_lock.lock_owned().await;
        self.shared.lock_log.lock().unwrap().push(LockEvent {
            tx_seq: self.tx_seq,
            account_id,
        });
        self.held.insert(account_id, guard);
        Ok(())
    }

    fn require_account(&self, account_id: i64) -> Result<(), StoreError> {
        match self.visible_account(account_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::Query(format!(
                "foreign key violation: account {} does not exist",
                account_id
            ))),
        }
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        if self.shared.faults.lock().unwrap().fail_commit {
            return Err(StoreError::Commit("injected: connection lost during commit".into()));
        }

        {
            let mut tables = self.shared.tables.lock().unwrap();
            for (id, account) in &self.accounts {
                match tables.accounts.get_mut(id) {
                    Some(row) => row.account = account.clone(),
                    None => {
                        tables.accounts.insert(
                            *id,
                            AccountRow {
                                account: account.clone(),
                                lock: Arc::new(tokio::sync::Mutex::new(())),
                            },
                        );
                    }
                }
            }
            tables.entries.extend(self.entries.iter().cloned());
            tables.transfers.extend(self.transfers.iter().cloned());
        }
        self.shared.commit_count.fetch_add(1, Ordering::SeqCst);
        // row locks are released when `self.held` drops
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.shared.rollback_count.fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.lock().unwrap().fail_rollback {
            return Err(StoreError::Query("injected: connection reset during rollback".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(
        &mut self,
        params: &CreateAccountParams,
    ) -> Result<Account, StoreError> {
        tokio::task::yield_now().await;
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: params.owner.clone(),
            balance: params.balance,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, account_id: i64) -> Result<Account, StoreError> {
        tokio::task::yield_now().await;
        self.visible_account(account_id)
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn get_account_for_update(&mut self, account_id: i64) -> Result<Account, StoreError> {
        tokio::task::yield_now().await;
        self.lock_row(account_id).await?;
        self.visible_account(account_id)
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: i64,
    ) -> Result<Account, StoreError> {
        tokio::task::yield_now().await;
        self.lock_row(account_id).await?;
        let mut account = self
            .visible_account(account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.balance = balance;
        self.accounts.insert(account_id, account.clone());
        Ok(account)
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        tokio::task::yield_now().await;
        self.entries_created += 1;
        if self.shared.faults.lock().unwrap().fail_entry_at == Some(self.entries_created) {
            return Err(StoreError::Query(format!(
                "injected: insert entry #{} failed",
                self.entries_created
            )));
        }
        self.require_account(account_id)?;

        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, entry_id: i64) -> Result<Option<Entry>, StoreError> {
        tokio::task::yield_now().await;
        if let Some(entry) = self.entries.iter().find(|e| e.id == entry_id) {
            return Ok(Some(entry.clone()));
        }
        let tables = self.shared.tables.lock().unwrap();
        Ok(tables.entries.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn list_entries(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, StoreError> {
        tokio::task::yield_now().await;
        let mut entries: Vec<Entry> = {
            let tables = self.shared.tables.lock().unwrap();
            tables
                .entries
                .iter()
                .chain(self.entries.iter())
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect()
        };
        entries.sort_by_key(|e| e.id);
        Ok(page(entries, limit, offset))
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        tokio::task::yield_now().await;
        self.require_account(from_account_id)?;
        self.require_account(to_account_id)?;

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, transfer_id: i64) -> Result<Option<Transfer>, StoreError> {
        tokio::task::yield_now().await;
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == transfer_id) {
            return Ok(Some(transfer.clone()));
        }
        let tables = self.shared.tables.lock().unwrap();
        Ok(tables.transfers.iter().find(|t| t.id == transfer_id).cloned())
    }

    async fn list_transfers(
        &mut self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        tokio::task::yield_now().await;
        let mut transfers: Vec<Transfer> = {
            let tables = self.shared.tables.lock().unwrap();
            tables
                .transfers
                .iter()
                .chain(self.transfers.iter())
                .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
                .cloned()
                .collect()
        };
        transfers.sort_by_key(|t| t.id);
        Ok(page(transfers, limit, offset))
    }
}

fn page<T>(rows: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    rows.into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 100, "USD");

        let mut tx = backend.begin().await.unwrap();
        tx.update_account_balance(account.id, 10).await.unwrap();
        tx.create_entry(account.id, -90).await.unwrap();

        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 10);
        assert_eq!(backend.committed_account(account.id).unwrap().balance, 100);
        assert!(backend.committed_entries().is_empty());

        tx.rollback().await.unwrap();
        assert_eq!(backend.committed_account(account.id).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_transaction() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 100, "USD");

        let mut first = backend.begin().await.unwrap();
        first.get_account_for_update(account.id).await.unwrap();

        let mut second = backend.begin().await.unwrap();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            second.get_account_for_update(account.id),
        )
        .await;
        assert!(blocked.is_err(), "second locker must wait");

        first.update_account_balance(account.id, 70).await.unwrap();
        first.commit().await.unwrap();

        let seen = second.get_account_for_update(account.id).await.unwrap();
        assert_eq!(seen.balance, 70);
        second.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let err = tx.create_entry(42, 5).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_created_account_visible_after_commit() {
        let backend = MemoryBackend::new();
        let params = CreateAccountParams {
            owner: "bob".into(),
            balance: 5,
            currency: "EUR".into(),
        };

        let mut tx = backend.begin().await.unwrap();
        let account = tx.create_account(&params).await.unwrap();
        tx.update_account_balance(account.id, 6).await.unwrap();
        assert!(backend.committed_account(account.id).is_none());
        tx.commit().await.unwrap();

        assert_eq!(backend.committed_account(account.id).unwrap().balance, 6);
    }

    #[test]
    fn test_page() {
        let rows: Vec<i32> = (1..=10).collect();
        assert_eq!(page(rows.clone(), 3, 2), vec![3, 4, 5]);
        assert_eq!(page(rows.clone(), 5, 8), vec![9, 10]);
        assert!(page(rows, 0, 0).is_empty());
    }
}
