//! Storage boundary for ledgers, accounts and transactions.
//!
//! Implementations must make every write that touches balances atomic:
//! either all entries and balance changes land, or none do. Balance writes
//! are compare-and-swap on `lock_version`; a stale version is reported as a
//! retryable conflict and never overwrites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_shared::types::{AccountId, PageRequest, PageResponse, TransactionId};

use super::balance::Account;
use super::error::LedgerError;
use super::transaction::{Transaction, TransactionUpdate};
use super::types::{Ledger, LedgerScope};

/// A transaction together with the account balances written in the same
/// unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// The stored transaction.
    pub transaction: Transaction,
    /// Accounts as written, one per touched account.
    pub accounts: Vec<Account>,
}

/// Ledger storage.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Stores a new ledger.
    async fn create_ledger(&self, ledger: &Ledger) -> Result<Ledger, LedgerError>;

    /// Loads a ledger, failing with `NotFound` outside `scope`.
    async fn get_ledger(&self, scope: LedgerScope) -> Result<Ledger, LedgerError>;
}

/// Account storage with lock-version semantics.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Stores a new account. The ledger must exist.
    async fn create_account(&self, account: &Account) -> Result<Account, LedgerError>;

    /// Loads an account, failing with `NotFound` outside `scope`.
    async fn get_account(&self, scope: LedgerScope, account_id: AccountId) -> Result<Account, LedgerError>;

    /// Returns true if the account exists in `scope`.
    async fn account_exists(&self, scope: LedgerScope, account_id: AccountId) -> Result<bool, LedgerError>;

    /// Writes the balances of `account` if the stored version still equals
    /// `expected_version`, returning the account at `expected_version + 1`.
    async fn update_balances(&self, account: &Account, expected_version: i64) -> Result<Account, LedgerError>;
}

/// Transaction storage. Every method that moves balances is atomic.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Persists a constructed transaction and applies its balance effects.
    async fn create_transaction(&self, transaction: &Transaction) -> Result<TransactionOutcome, LedgerError>;

    /// Posts a pending transaction. Posting a posted transaction is a no-op.
    async fn post_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError>;

    /// Archives a transaction, releasing pending balance effects.
    async fn archive_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError>;

    /// Replaces description or metadata of a pending transaction.
    async fn update_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        update: &TransactionUpdate,
        at: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError>;

    /// Loads a transaction with its entries.
    async fn get_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<Transaction, LedgerError>;

    /// Lists transactions in creation order.
    async fn list_transactions(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Transaction>, LedgerError>;

    /// Deletes a transaction and reverses its balance effects.
    ///
    /// Non-pending transactions can only be deleted in sandbox mode.
    async fn delete_transaction_with_balance_update(
        &self,
        scope: LedgerScope,
        id: TransactionId,
    ) -> Result<Vec<Account>, LedgerError>;
}
