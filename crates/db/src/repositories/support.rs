//! Queries shared by the repositories.
//!
//! Every helper is generic over the connection so it runs on the pool or
//! inside an open database transaction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tally_core::ledger::{
    Account, BalanceEvent, Conflict, EntityKind, Entry, Ledger, LedgerError, LedgerScope, Transaction,
    TransactionOutcome, apply_entries,
};
use tally_shared::types::{AccountId, EntryId, TransactionId};
use tracing::debug;
use uuid::Uuid;

use super::convert::{
    account_from_model, entry_active, entry_from_model, ledger_from_model, to_db, transaction_active,
    transaction_from_models,
};
use crate::entities::{accounts, entries, ledgers, transactions};
use crate::error::{db_err, insert_err};

pub(crate) async fn find_ledger<C: ConnectionTrait>(conn: &C, scope: LedgerScope) -> Result<Ledger, LedgerError> {
    let model = ledgers::Entity::find_by_id(scope.ledger_id.into_inner())
        .filter(ledgers::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .one(conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Ledger, scope.ledger_id))?;
    ledger_from_model(model)
}

pub(crate) async fn find_account<C: ConnectionTrait>(
    conn: &C,
    scope: LedgerScope,
    id: AccountId,
) -> Result<Account, LedgerError> {
    let model = accounts::Entity::find_by_id(id.into_inner())
        .filter(accounts::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .filter(accounts::Column::LedgerId.eq(scope.ledger_id.into_inner()))
        .one(conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Account, id))?;
    account_from_model(model)
}

/// Reads every account touched by `transaction`. A missing account fails the
/// whole read.
pub(crate) async fn snapshot<C: ConnectionTrait>(
    conn: &C,
    transaction: &Transaction,
) -> Result<HashMap<AccountId, Account>, LedgerError> {
    let scope = transaction.scope();
    let ids: Vec<Uuid> = transaction
        .entries()
        .iter()
        .map(|entry| entry.account_id().into_inner())
        .collect();
    let found = accounts::Entity::find()
        .filter(accounts::Column::Id.is_in(ids))
        .filter(accounts::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .filter(accounts::Column::LedgerId.eq(scope.ledger_id.into_inner()))
        .all(conn)
        .await
        .map_err(db_err)?;

    let mut snapshot = HashMap::with_capacity(found.len());
    for model in found {
        let account = account_from_model(model)?;
        snapshot.insert(account.id, account);
    }
    for entry in transaction.entries() {
        if !snapshot.contains_key(&entry.account_id()) {
            return Err(LedgerError::not_found(EntityKind::Account, entry.account_id()));
        }
    }
    Ok(snapshot)
}

/// Writes each account's balances conditionally on the version in
/// `snapshot`, bumping it by one.
///
/// Rows are written in ID order. Any mismatch aborts with a retryable
/// conflict; the caller's database transaction then rolls everything back.
pub(crate) async fn swap_balances<C: ConnectionTrait>(
    conn: &C,
    snapshot: &HashMap<AccountId, Account>,
    mut updated: Vec<Account>,
) -> Result<Vec<Account>, LedgerError> {
    updated.sort_by_key(|account| account.id);
    let mut written = Vec::with_capacity(updated.len());
    for account in updated {
        let expected = snapshot
            .get(&account.id)
            .map_or(account.lock_version, |read| read.lock_version);
        let next = Account {
            lock_version: expected + 1,
            ..account
        };
        let result = accounts::Entity::update_many()
            .col_expr(accounts::Column::PendingAmount, Expr::value(next.pending.amount))
            .col_expr(accounts::Column::PendingCredits, Expr::value(next.pending.credits))
            .col_expr(accounts::Column::PendingDebits, Expr::value(next.pending.debits))
            .col_expr(accounts::Column::PostedAmount, Expr::value(next.posted.amount))
            .col_expr(accounts::Column::PostedCredits, Expr::value(next.posted.credits))
            .col_expr(accounts::Column::PostedDebits, Expr::value(next.posted.debits))
            .col_expr(accounts::Column::AvailableAmount, Expr::value(next.available.amount))
            .col_expr(accounts::Column::AvailableCredits, Expr::value(next.available.credits))
            .col_expr(accounts::Column::AvailableDebits, Expr::value(next.available.debits))
            .col_expr(accounts::Column::LockVersion, Expr::value(next.lock_version))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(to_db(next.updated_at)))
            .filter(accounts::Column::Id.eq(next.id.into_inner()))
            .filter(accounts::Column::LockVersion.eq(expected))
            .exec(conn)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            let actual = find_account(conn, next.scope(), next.id).await?.lock_version;
            debug!(account_id = %next.id, expected, actual, "lock version conflict");
            return Err(Conflict::lock_version_mismatch(next.id, expected, actual).into());
        }
        written.push(next);
    }
    Ok(written)
}

/// Current rows of the accounts touched by `transaction`.
pub(crate) async fn current_accounts<C: ConnectionTrait>(
    conn: &C,
    transaction: &Transaction,
) -> Result<Vec<Account>, LedgerError> {
    let mut snapshot = snapshot(conn, transaction).await?;
    let mut seen = HashSet::new();
    Ok(transaction
        .entries()
        .iter()
        .filter(|entry| seen.insert(entry.account_id()))
        .filter_map(|entry| snapshot.remove(&entry.account_id()))
        .collect())
}

pub(crate) async fn find_transaction<C: ConnectionTrait>(
    conn: &C,
    scope: LedgerScope,
    id: TransactionId,
) -> Result<Transaction, LedgerError> {
    let model = transactions::Entity::find_by_id(id.into_inner())
        .filter(transactions::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .filter(transactions::Column::LedgerId.eq(scope.ledger_id.into_inner()))
        .one(conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, id))?;
    let entry_models = entries::Entity::find()
        .filter(entries::Column::TransactionId.eq(model.id))
        .order_by_asc(entries::Column::Position)
        .all(conn)
        .await
        .map_err(db_err)?;
    transaction_from_models(model, entry_models)
}

/// Loads entries by ID within `scope`, in the order requested.
pub(crate) async fn find_entries<C: ConnectionTrait>(
    conn: &C,
    scope: LedgerScope,
    ids: &[EntryId],
) -> Result<Vec<Entry>, LedgerError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let currency = find_ledger(conn, scope).await?.currency;
    let models = entries::Entity::find()
        .filter(entries::Column::Id.is_in(ids.iter().map(|id| id.into_inner())))
        .filter(entries::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .filter(entries::Column::LedgerId.eq(scope.ledger_id.into_inner()))
        .all(conn)
        .await
        .map_err(db_err)?;

    let mut by_id = HashMap::with_capacity(models.len());
    for model in models {
        let entry = entry_from_model(model, &currency)?;
        by_id.insert(entry.id(), entry);
    }
    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| LedgerError::not_found(EntityKind::Entry, id))
        })
        .collect()
}

/// Persists a new transaction, its entries and the balance effects of every
/// entry as one unit of work on `conn`.
pub(crate) async fn insert_transaction<C: ConnectionTrait>(
    conn: &C,
    transaction: &Transaction,
    at: DateTime<Utc>,
) -> Result<TransactionOutcome, LedgerError> {
    find_ledger(conn, transaction.scope()).await?;
    if let Some(key) = transaction.idempotency_key() {
        let existing = transactions::Entity::find()
            .filter(transactions::Column::LedgerId.eq(transaction.ledger_id().into_inner()))
            .filter(transactions::Column::IdempotencyKey.eq(key))
            .one(conn)
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Err(Conflict::duplicate_idempotency_key(key).into());
        }
    }

    let snapshot = snapshot(conn, transaction).await?;
    let updated = apply_entries(
        &snapshot,
        transaction
            .entries()
            .iter()
            .map(|entry| (entry, BalanceEvent::Created(entry.status()))),
        at,
    )?;

    let what = format!("transaction {}", transaction.id());
    transactions::Entity::insert(transaction_active(transaction))
        .exec_without_returning(conn)
        .await
        .map_err(|err| insert_err(err, transaction.idempotency_key(), &what))?;
    let rows = transaction
        .entries()
        .iter()
        .zip(0..)
        .map(|(entry, position)| entry_active(transaction, entry, position));
    entries::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await
        .map_err(|err| insert_err(err, None, &what))?;

    let accounts = swap_balances(conn, &snapshot, updated).await?;
    Ok(TransactionOutcome {
        transaction: transaction.clone(),
        accounts,
    })
}
