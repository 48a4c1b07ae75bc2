//! Ledger service.
//!
//! Composes the repositories with the retry policy. Every write that can
//! race on account lock versions runs inside [`retry`], and a transaction is
//! constructed afresh inside each attempt so no state leaks between tries.

use std::sync::Arc;

use chrono::Utc;
use tally_shared::types::{AccountId, PageRequest, PageResponse, TransactionId};
use tracing::{debug, info};

use super::balance::{Account, NewAccount};
use super::error::LedgerError;
use super::repository::{AccountRepository, LedgerRepository, TransactionOutcome, TransactionRepository};
use super::transaction::{NewTransaction, Transaction, TransactionUpdate};
use super::types::{Ledger, LedgerScope, NewLedger};
use crate::retry::{RetryPolicy, retry};
use crate::settlement::repository::SettlementRepository;

/// Entry point for ledger operations.
#[derive(Clone)]
pub struct LedgerService {
    pub(crate) ledgers: Arc<dyn LedgerRepository>,
    pub(crate) accounts: Arc<dyn AccountRepository>,
    pub(crate) transactions: Arc<dyn TransactionRepository>,
    pub(crate) settlements: Arc<dyn SettlementRepository>,
    pub(crate) retry_policy: RetryPolicy,
}

impl LedgerService {
    /// Creates a service over separate repositories.
    #[must_use]
    pub fn new(
        ledgers: Arc<dyn LedgerRepository>,
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
        settlements: Arc<dyn SettlementRepository>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            ledgers,
            accounts,
            transactions,
            settlements,
            retry_policy,
        }
    }

    /// Creates a service over one store implementing every repository.
    #[must_use]
    pub fn from_store<S>(store: Arc<S>, retry_policy: RetryPolicy) -> Self
    where
        S: LedgerRepository + AccountRepository + TransactionRepository + SettlementRepository + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store, retry_policy)
    }

    /// The retry policy in use.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Creates a ledger.
    pub async fn create_ledger(&self, new: &NewLedger) -> Result<Ledger, LedgerError> {
        let ledger = self.ledgers.create_ledger(&Ledger::open(new, Utc::now())).await?;
        info!(ledger_id = %ledger.id, currency = %ledger.currency, "ledger created");
        Ok(ledger)
    }

    /// Loads a ledger.
    pub async fn get_ledger(&self, scope: LedgerScope) -> Result<Ledger, LedgerError> {
        self.ledgers.get_ledger(scope).await
    }

    /// Opens an account in an existing ledger.
    pub async fn create_account(&self, new: &NewAccount) -> Result<Account, LedgerError> {
        let account = Account::open(new, Utc::now())?;
        let account = self.accounts.create_account(&account).await?;
        info!(
            account_id = %account.id,
            normal_balance = %account.normal_balance,
            "account created"
        );
        Ok(account)
    }

    /// Loads an account.
    pub async fn get_account(&self, scope: LedgerScope, account_id: AccountId) -> Result<Account, LedgerError> {
        self.accounts.get_account(scope, account_id).await
    }

    /// Validates and records a transaction, retrying lock-version conflicts.
    ///
    /// Returns the stored transaction with the balances written alongside it.
    pub async fn create_transaction(&self, input: &NewTransaction) -> Result<TransactionOutcome, LedgerError> {
        let scope = LedgerScope::new(input.organization_id, input.ledger_id);
        let outcome = retry(&self.retry_policy, LedgerError::is_retryable, |attempt| async move {
            debug!(attempt, ledger_id = %scope.ledger_id, "creating transaction");
            let ledger = self.ledgers.get_ledger(scope).await?;
            let transaction = Transaction::construct(input, &ledger.currency, Utc::now())?;
            self.transactions.create_transaction(&transaction).await
        })
        .await?;

        info!(
            transaction_id = %outcome.transaction.id(),
            amount = outcome.transaction.total_amount(),
            status = %outcome.transaction.status(),
            "transaction created"
        );
        Ok(outcome)
    }

    /// Posts a pending transaction. Posting twice returns the posted value.
    pub async fn post_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<TransactionOutcome, LedgerError> {
        let outcome = retry(&self.retry_policy, LedgerError::is_retryable, |_| async move {
            self.transactions.post_transaction(scope, id, Utc::now()).await
        })
        .await?;
        info!(transaction_id = %id, "transaction posted");
        Ok(outcome)
    }

    /// Archives a transaction.
    pub async fn archive_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<TransactionOutcome, LedgerError> {
        let outcome = retry(&self.retry_policy, LedgerError::is_retryable, |_| async move {
            self.transactions.archive_transaction(scope, id, Utc::now()).await
        })
        .await?;
        info!(transaction_id = %id, "transaction archived");
        Ok(outcome)
    }

    /// Edits description or metadata of a pending transaction.
    pub async fn update_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        update: &TransactionUpdate,
    ) -> Result<Transaction, LedgerError> {
        self.transactions
            .update_transaction(scope, id, update, Utc::now())
            .await
    }

    /// Loads a transaction.
    pub async fn get_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.transactions.get_transaction(scope, id).await
    }

    /// Lists transactions of a ledger.
    pub async fn list_transactions(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Transaction>, LedgerError> {
        self.transactions.list_transactions(scope, page).await
    }

    /// Deletes a transaction and reverses its balance effects.
    pub async fn delete_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<Vec<Account>, LedgerError> {
        let accounts = retry(&self.retry_policy, LedgerError::is_retryable, |_| async move {
            self.transactions
                .delete_transaction_with_balance_update(scope, id)
                .await
        })
        .await?;
        info!(transaction_id = %id, "transaction deleted");
        Ok(accounts)
    }
}
