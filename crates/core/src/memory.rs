//! In-memory implementation of every repository trait.
//!
//! Intended for tests and sandbox environments. Balance-moving writes run in
//! two phases: a snapshot of the touched accounts is taken under a read lock,
//! new balances are computed outside any lock, and the result is committed
//! under the write lock only if every account still has the version that was
//! read. Concurrent writers therefore really race and the loser gets a
//! retryable conflict, the same way a relational store reports it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_shared::types::{
    AccountId, EntryId, LedgerId, OrganizationId, PageRequest, PageResponse, SettlementId, TransactionId,
};
use tracing::debug;

use crate::ledger::balance::{Account, BalanceEvent, apply_entries};
use crate::ledger::entry::{Entry, EntryStatus};
use crate::ledger::error::{Conflict, EntityKind, InvariantViolation, LedgerError};
use crate::ledger::repository::{
    AccountRepository, LedgerRepository, TransactionOutcome, TransactionRepository,
};
use crate::ledger::transaction::{DeletionPolicy, Transaction, TransactionStatus, TransactionUpdate};
use crate::ledger::types::{Ledger, LedgerScope};
use crate::settlement::repository::SettlementRepository;
use crate::settlement::types::{Settlement, SettlementStatus, StatusUpdate, TransitionEffect, net_amount};

#[derive(Debug, Default)]
struct State {
    ledgers: HashMap<LedgerId, Ledger>,
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    transaction_order: Vec<TransactionId>,
    idempotency_keys: HashMap<(LedgerId, String), TransactionId>,
    entry_index: HashMap<EntryId, TransactionId>,
    settlements: HashMap<SettlementId, Settlement>,
    settlement_order: Vec<SettlementId>,
    settlement_entries: HashMap<SettlementId, Vec<EntryId>>,
    entry_settlement: HashMap<EntryId, SettlementId>,
}

/// Accounts read for a write, with the versions the write is conditional on.
struct Snapshot {
    accounts: HashMap<AccountId, Account>,
}

impl Snapshot {
    fn expected_versions(&self) -> HashMap<AccountId, i64> {
        self.accounts
            .iter()
            .map(|(id, account)| (*id, account.lock_version))
            .collect()
    }
}

fn in_scope(scope: LedgerScope, organization_id: OrganizationId, ledger_id: LedgerId) -> bool {
    scope.organization_id == organization_id && scope.ledger_id == ledger_id
}

fn page_of<T: Clone>(items: Vec<&T>, page: PageRequest) -> PageResponse<T> {
    let total = u64::try_from(items.len()).unwrap_or(u64::MAX);
    let data = items
        .into_iter()
        .skip(page.offset_usize())
        .take(page.limit_usize())
        .cloned()
        .collect();
    PageResponse::new(data, page, total)
}

impl State {
    fn ledger(&self, scope: LedgerScope) -> Result<&Ledger, LedgerError> {
        self.ledgers
            .get(&scope.ledger_id)
            .filter(|ledger| ledger.organization_id == scope.organization_id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Ledger, scope.ledger_id))
    }

    fn account(&self, scope: LedgerScope, id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts
            .get(&id)
            .filter(|account| in_scope(scope, account.organization_id, account.ledger_id))
            .ok_or_else(|| LedgerError::not_found(EntityKind::Account, id))
    }

    fn transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<&Transaction, LedgerError> {
        self.transactions
            .get(&id)
            .filter(|txn| txn.scope() == scope)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, id))
    }

    fn settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<&Settlement, LedgerError> {
        self.settlements
            .get(&id)
            .filter(|stl| stl.scope() == scope)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Settlement, id))
    }

    fn entry(&self, scope: LedgerScope, id: EntryId) -> Result<&Entry, LedgerError> {
        self.entry_index
            .get(&id)
            .and_then(|txn_id| self.transactions.get(txn_id))
            .filter(|txn| txn.scope() == scope)
            .and_then(|txn| txn.entry(id))
            .ok_or_else(|| LedgerError::not_found(EntityKind::Entry, id))
    }

    fn ensure_idempotency_free(&self, txn: &Transaction) -> Result<(), LedgerError> {
        if let Some(key) = txn.idempotency_key() {
            if self.idempotency_keys.contains_key(&(txn.ledger_id(), key.to_string())) {
                return Err(Conflict::duplicate_idempotency_key(key).into());
            }
        }
        Ok(())
    }

    /// Copies every account touched by `txn`, failing loudly on a missing one.
    fn snapshot(&self, txn: &Transaction) -> Result<Snapshot, LedgerError> {
        let scope = txn.scope();
        let mut accounts = HashMap::with_capacity(txn.entries().len());
        for entry in txn.entries() {
            let account = self.account(scope, entry.account_id())?;
            accounts.insert(account.id, account.clone());
        }
        Ok(Snapshot { accounts })
    }

    /// Writes all accounts if every stored version still matches, bumping
    /// each by one. Nothing is written on a mismatch.
    fn swap_balances(
        &mut self,
        expected: &HashMap<AccountId, i64>,
        updated: Vec<Account>,
    ) -> Result<Vec<Account>, LedgerError> {
        for account in &updated {
            let expected_version = expected.get(&account.id).copied().unwrap_or(account.lock_version);
            let stored = self
                .accounts
                .get(&account.id)
                .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account.id))?;
            if stored.lock_version != expected_version {
                debug!(
                    account_id = %account.id,
                    expected = expected_version,
                    actual = stored.lock_version,
                    "lock version conflict"
                );
                return Err(
                    Conflict::lock_version_mismatch(account.id, expected_version, stored.lock_version).into(),
                );
            }
        }

        let mut written = Vec::with_capacity(updated.len());
        for account in updated {
            let expected_version = expected.get(&account.id).copied().unwrap_or(account.lock_version);
            let next = Account {
                lock_version: expected_version + 1,
                ..account
            };
            self.accounts.insert(next.id, next.clone());
            written.push(next);
        }
        Ok(written)
    }

    fn insert_transaction(&mut self, txn: &Transaction) {
        if let Some(key) = txn.idempotency_key() {
            self.idempotency_keys
                .insert((txn.ledger_id(), key.to_string()), txn.id());
        }
        for entry in txn.entries() {
            self.entry_index.insert(entry.id(), txn.id());
        }
        self.transaction_order.push(txn.id());
        self.transactions.insert(txn.id(), txn.clone());
    }

    fn remove_transaction(&mut self, txn: &Transaction) {
        if let Some(key) = txn.idempotency_key() {
            self.idempotency_keys.remove(&(txn.ledger_id(), key.to_string()));
        }
        for entry in txn.entries() {
            self.entry_index.remove(&entry.id());
            if let Some(settlement_id) = self.entry_settlement.remove(&entry.id()) {
                if let Some(linked) = self.settlement_entries.get_mut(&settlement_id) {
                    linked.retain(|id| *id != entry.id());
                }
            }
        }
        self.transaction_order.retain(|id| *id != txn.id());
        self.transactions.remove(&txn.id());
    }

    /// Re-reads the stored transaction and fails if any part of it changed
    /// since the snapshot.
    fn ensure_unchanged(&self, txn: &Transaction) -> Result<(), LedgerError> {
        match self.transactions.get(&txn.id()) {
            Some(stored) if stored == txn => Ok(()),
            Some(_) => Err(Conflict::concurrent_modification(format!("transaction {}", txn.id())).into()),
            None => Err(LedgerError::not_found(EntityKind::Transaction, txn.id())),
        }
    }

    fn linked_entries(&self, scope: LedgerScope, id: SettlementId) -> Result<Vec<Entry>, LedgerError> {
        self.settlement_entries
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|entry_id| self.entry(scope, *entry_id).cloned())
            .collect()
    }

    fn calculate_amount(&self, settlement: &Settlement) -> Result<i64, LedgerError> {
        let scope = settlement.scope();
        let account = self.account(scope, settlement.settled_account_id())?;
        let entries = self.linked_entries(scope, settlement.id())?;
        Ok(net_amount(account.normal_balance, &entries)?)
    }

    fn current_accounts(&self, txn: &Transaction) -> Vec<Account> {
        txn.entries()
            .iter()
            .filter_map(|entry| self.accounts.get(&entry.account_id()).cloned())
            .collect()
    }
}

/// Repository backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
    deletion_policy: DeletionPolicy,
}

impl InMemoryLedgerStore {
    /// Creates an empty store that refuses to delete posted transactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with an explicit deletion policy.
    #[must_use]
    pub fn with_deletion_policy(deletion_policy: DeletionPolicy) -> Self {
        Self {
            state: RwLock::default(),
            deletion_policy,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Internal("ledger store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::Internal("ledger store lock poisoned".to_string()))
    }

    /// Snapshot, compute and commit for a change to an existing transaction.
    ///
    /// `events` maps each entry of the stored transaction to its balance
    /// event; `next` is the transaction to store on success.
    async fn rewrite_transaction(
        &self,
        current: &Transaction,
        next: &Transaction,
        events: impl Fn(&Entry) -> Option<BalanceEvent>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Account>, LedgerError> {
        let snapshot = self.read()?.snapshot(current)?;
        let updated = apply_entries(
            &snapshot.accounts,
            current
                .entries()
                .iter()
                .filter_map(|entry| events(entry).map(|event| (entry, event))),
            at,
        )?;

        tokio::task::yield_now().await;

        let mut state = self.write()?;
        state.ensure_unchanged(current)?;
        let mut accounts = state.swap_balances(&snapshot.expected_versions(), updated)?;
        if accounts.is_empty() {
            accounts = state.current_accounts(current);
        }
        state.transactions.insert(next.id(), next.clone());
        Ok(accounts)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    async fn create_ledger(&self, ledger: &Ledger) -> Result<Ledger, LedgerError> {
        self.write()?.ledgers.insert(ledger.id, ledger.clone());
        Ok(ledger.clone())
    }

    async fn get_ledger(&self, scope: LedgerScope) -> Result<Ledger, LedgerError> {
        self.read()?.ledger(scope).cloned()
    }
}

#[async_trait]
impl AccountRepository for InMemoryLedgerStore {
    async fn create_account(&self, account: &Account) -> Result<Account, LedgerError> {
        let mut state = self.write()?;
        state.ledger(account.scope())?;
        state.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn get_account(&self, scope: LedgerScope, account_id: AccountId) -> Result<Account, LedgerError> {
        self.read()?.account(scope, account_id).cloned()
    }

    async fn account_exists(&self, scope: LedgerScope, account_id: AccountId) -> Result<bool, LedgerError> {
        Ok(self.read()?.account(scope, account_id).is_ok())
    }

    async fn update_balances(&self, account: &Account, expected_version: i64) -> Result<Account, LedgerError> {
        let mut state = self.write()?;
        state.account(account.scope(), account.id)?;
        let expected = HashMap::from([(account.id, expected_version)]);
        let mut written = state.swap_balances(&expected, vec![account.clone()])?;
        written
            .pop()
            .ok_or_else(|| LedgerError::Internal("balance write returned nothing".to_string()))
    }
}

#[async_trait]
impl TransactionRepository for InMemoryLedgerStore {
    async fn create_transaction(&self, transaction: &Transaction) -> Result<TransactionOutcome, LedgerError> {
        let snapshot = {
            let state = self.read()?;
            state.ledger(transaction.scope())?;
            state.ensure_idempotency_free(transaction)?;
            state.snapshot(transaction)?
        };
        let updated = apply_entries(
            &snapshot.accounts,
            transaction
                .entries()
                .iter()
                .map(|entry| (entry, BalanceEvent::Created(entry.status()))),
            transaction.created_at(),
        )?;

        tokio::task::yield_now().await;

        let mut state = self.write()?;
        state.ensure_idempotency_free(transaction)?;
        if state.transactions.contains_key(&transaction.id()) {
            return Err(Conflict::concurrent_modification(format!("transaction {}", transaction.id())).into());
        }
        let accounts = state.swap_balances(&snapshot.expected_versions(), updated)?;
        state.insert_transaction(transaction);
        Ok(TransactionOutcome {
            transaction: transaction.clone(),
            accounts,
        })
    }

    async fn post_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError> {
        let current = self.read()?.transaction(scope, id)?.clone();
        let posted = current.post(at)?;
        if current.status() == TransactionStatus::Posted {
            let accounts = self.read()?.current_accounts(&current);
            return Ok(TransactionOutcome {
                transaction: current,
                accounts,
            });
        }

        let accounts = self
            .rewrite_transaction(&current, &posted, |_| Some(BalanceEvent::Posted), at)
            .await?;
        Ok(TransactionOutcome {
            transaction: posted,
            accounts,
        })
    }

    async fn archive_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError> {
        let current = self.read()?.transaction(scope, id)?.clone();
        let archived = current.archive(at);
        let release = current.status() == TransactionStatus::Pending;

        let accounts = self
            .rewrite_transaction(
                &current,
                &archived,
                |entry| release.then_some(BalanceEvent::Reversed(entry.status())),
                at,
            )
            .await?;
        Ok(TransactionOutcome {
            transaction: archived,
            accounts,
        })
    }

    async fn update_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        update: &TransactionUpdate,
        at: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let mut state = self.write()?;
        let updated = state.transaction(scope, id)?.with_details(update, at)?;
        state.transactions.insert(id, updated.clone());
        Ok(updated)
    }

    async fn get_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.read()?.transaction(scope, id).cloned()
    }

    async fn list_transactions(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Transaction>, LedgerError> {
        let state = self.read()?;
        state.ledger(scope)?;
        let items = state
            .transaction_order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|txn| txn.scope() == scope)
            .collect();
        Ok(page_of(items, page))
    }

    async fn delete_transaction_with_balance_update(
        &self,
        scope: LedgerScope,
        id: TransactionId,
    ) -> Result<Vec<Account>, LedgerError> {
        let current = self.read()?.transaction(scope, id)?.clone();
        current.ensure_deletable(self.deletion_policy)?;

        let snapshot = self.read()?.snapshot(&current)?;
        let updated = apply_entries(
            &snapshot.accounts,
            current
                .entries()
                .iter()
                .filter(|entry| current.status() != TransactionStatus::Archived || entry.status() == EntryStatus::Posted)
                .map(|entry| (entry, BalanceEvent::Reversed(entry.status()))),
            Utc::now(),
        )?;

        tokio::task::yield_now().await;

        let mut state = self.write()?;
        state.ensure_unchanged(&current)?;
        let accounts = state.swap_balances(&snapshot.expected_versions(), updated)?;
        state.remove_transaction(&current);
        Ok(accounts)
    }
}

#[async_trait]
impl SettlementRepository for InMemoryLedgerStore {
    async fn create_settlement(&self, settlement: &Settlement) -> Result<Settlement, LedgerError> {
        let mut state = self.write()?;
        let scope = settlement.scope();
        state.ledger(scope)?;
        state.account(scope, settlement.settled_account_id())?;
        state.account(scope, settlement.contra_account_id())?;
        state.settlements.insert(settlement.id(), settlement.clone());
        state.settlement_order.push(settlement.id());
        state.settlement_entries.insert(settlement.id(), Vec::new());
        Ok(settlement.clone())
    }

    async fn get_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<Settlement, LedgerError> {
        self.read()?.settlement(scope, id).cloned()
    }

    async fn list_settlements(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Settlement>, LedgerError> {
        let state = self.read()?;
        state.ledger(scope)?;
        let items = state
            .settlement_order
            .iter()
            .filter_map(|id| state.settlements.get(id))
            .filter(|stl| stl.scope() == scope)
            .collect();
        Ok(page_of(items, page))
    }

    async fn delete_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let status = state.settlement(scope, id)?.status();
        if status != SettlementStatus::Drafting {
            return Err(Conflict::invalid_transition(status, "deleted").into());
        }
        for entry_id in state.settlement_entries.remove(&id).unwrap_or_default() {
            state.entry_settlement.remove(&entry_id);
        }
        state.settlements.remove(&id);
        state.settlement_order.retain(|stl| *stl != id);
        Ok(())
    }

    async fn calculate_amount(&self, scope: LedgerScope, id: SettlementId) -> Result<i64, LedgerError> {
        let state = self.read()?;
        let settlement = state.settlement(scope, id)?;
        state.calculate_amount(settlement)
    }

    async fn update_status(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        update: StatusUpdate,
    ) -> Result<Settlement, LedgerError> {
        let mut state = self.write()?;
        let current = state.settlement(scope, id)?.clone();
        current.ensure_unchanged_since(&update)?;
        let plan = current.plan_transition(update.target)?;

        let (amount, transaction_id) = match &update.effect {
            TransitionEffect::CalculateAmount => (Some(state.calculate_amount(&current)?), None),
            TransitionEffect::PostTransaction(txn) => {
                state.ensure_idempotency_free(txn)?;
                let snapshot = state.snapshot(txn)?;
                let updated = apply_entries(
                    &snapshot.accounts,
                    txn.entries()
                        .iter()
                        .map(|entry| (entry, BalanceEvent::Created(entry.status()))),
                    update.at,
                )?;
                state.swap_balances(&snapshot.expected_versions(), updated)?;
                state.insert_transaction(txn);
                (None, Some(txn.id()))
            }
            TransitionEffect::None | TransitionEffect::ClearAmount => (None, None),
        };

        let next = current.transitioned(update.target, plan, amount, transaction_id, update.at);
        state.settlements.insert(id, next.clone());
        Ok(next)
    }

    async fn add_entries_to_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let mut state = self.write()?;
        let settlement = state.settlement(scope, id)?.clone();
        if !settlement.status().accepts_entry_changes() {
            return Err(Conflict::settlement_finalized(id, settlement.status()).into());
        }

        let mut to_link = Vec::with_capacity(entry_ids.len());
        for entry_id in entry_ids {
            let entry = state.entry(scope, *entry_id)?;
            if entry.account_id() != settlement.settled_account_id() {
                return Err(InvariantViolation::EntryAccountMismatch {
                    entry_id: entry_id.to_string(),
                    account_id: settlement.settled_account_id(),
                }
                .into());
            }
            if entry.status() != EntryStatus::Posted {
                return Err(InvariantViolation::EntryNotPosted(entry_id.to_string()).into());
            }
            match state.entry_settlement.get(entry_id) {
                Some(other) if *other != id => {
                    return Err(Conflict::entry_already_settled(entry_id, other).into());
                }
                Some(_) => {}
                None if !to_link.contains(entry_id) => to_link.push(*entry_id),
                None => {}
            }
        }

        for entry_id in &to_link {
            state.entry_settlement.insert(*entry_id, id);
        }
        state.settlement_entries.entry(id).or_default().extend(to_link);
        let next = settlement.with_status(settlement.status(), Utc::now());
        state.settlements.insert(id, next.clone());
        Ok(next)
    }

    async fn remove_entries_from_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let mut state = self.write()?;
        let settlement = state.settlement(scope, id)?.clone();
        if !settlement.status().accepts_entry_changes() {
            return Err(Conflict::settlement_finalized(id, settlement.status()).into());
        }
        for entry_id in entry_ids {
            if state.entry_settlement.get(entry_id) != Some(&id) {
                return Err(LedgerError::not_found(EntityKind::Entry, entry_id));
            }
        }

        for entry_id in entry_ids {
            state.entry_settlement.remove(entry_id);
        }
        if let Some(linked) = state.settlement_entries.get_mut(&id) {
            linked.retain(|entry_id| !entry_ids.contains(entry_id));
        }
        let next = settlement.with_status(settlement.status(), Utc::now());
        state.settlements.insert(id, next.clone());
        Ok(next)
    }

    async fn settlement_entries(&self, scope: LedgerScope, id: SettlementId) -> Result<Vec<Entry>, LedgerError> {
        let state = self.read()?;
        state.settlement(scope, id)?;
        state.linked_entries(scope, id)
    }
}
