//! Transaction repository.
//!
//! Every balance-moving operation opens one database transaction, reads the
//! touched accounts, writes the transaction rows and then the account rows
//! conditionally on the versions it read. Dropping the database transaction
//! on any error rolls all of it back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use tally_core::ledger::{
    Account, BalanceEvent, Conflict, DeletionPolicy, Entry, EntryStatus, LedgerError, LedgerScope, Transaction,
    TransactionOutcome, TransactionRepository, TransactionStatus, TransactionUpdate, apply_entries,
};
use tally_shared::types::{PageRequest, PageResponse, TransactionId};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::convert::{to_db, transaction_from_models};
use super::support::{current_accounts, find_ledger, find_transaction, insert_transaction, snapshot, swap_balances};
use crate::entities::{entries, settlement_entries, transactions};
use crate::error::db_err;

/// Transaction storage.
#[derive(Debug, Clone)]
pub struct SqlTransactionRepository {
    db: DatabaseConnection,
    deletion_policy: DeletionPolicy,
}

impl SqlTransactionRepository {
    /// Creates a new transaction repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, deletion_policy: DeletionPolicy) -> Self {
        Self { db, deletion_policy }
    }

    /// Applies `events` for the stored entries of `current` and writes
    /// `next`'s status columns, all conditional on nothing having moved.
    async fn rewrite<C, F>(
        conn: &C,
        current: &Transaction,
        next: &Transaction,
        events: F,
        at: DateTime<Utc>,
    ) -> Result<Vec<Account>, LedgerError>
    where
        C: ConnectionTrait,
        F: Fn(&Entry) -> Option<BalanceEvent>,
    {
        let snapshot = snapshot(conn, current).await?;
        let updated = apply_entries(
            &snapshot,
            current
                .entries()
                .iter()
                .filter_map(|entry| events(entry).map(|event| (entry, event))),
            at,
        )?;

        let result = transactions::Entity::update_many()
            .col_expr(transactions::Column::Status, Expr::value(next.status().as_str()))
            .col_expr(transactions::Column::UpdatedAt, Expr::value(to_db(next.updated_at())))
            .col_expr(transactions::Column::PostedAt, Expr::value(next.posted_at().map(to_db)))
            .col_expr(transactions::Column::ArchivedAt, Expr::value(next.archived_at().map(to_db)))
            .filter(transactions::Column::Id.eq(current.id().into_inner()))
            .filter(transactions::Column::Status.eq(current.status().as_str()))
            .exec(conn)
            .await
            .map_err(db_err)?;
        if result.rows_affected == 0 {
            return Err(Conflict::concurrent_modification(format!("transaction {}", current.id())).into());
        }

        for entry in next.entries() {
            entries::Entity::update_many()
                .col_expr(entries::Column::Status, Expr::value(entry.status().as_str()))
                .col_expr(entries::Column::PostedAt, Expr::value(entry.posted_at().map(to_db)))
                .filter(entries::Column::Id.eq(entry.id().into_inner()))
                .exec(conn)
                .await
                .map_err(db_err)?;
        }

        if updated.is_empty() {
            return current_accounts(conn, current).await;
        }
        swap_balances(conn, &snapshot, updated).await
    }
}

#[async_trait]
impl TransactionRepository for SqlTransactionRepository {
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id()), err)]
    async fn create_transaction(&self, transaction: &Transaction) -> Result<TransactionOutcome, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let outcome = insert_transaction(&txn, transaction, transaction.created_at()).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    #[instrument(skip(self, scope), fields(transaction_id = %id), err)]
    async fn post_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_transaction(&txn, scope, id).await?;
        let posted = current.post(at)?;
        if current.status() == TransactionStatus::Posted {
            let accounts = current_accounts(&txn, &current).await?;
            return Ok(TransactionOutcome {
                transaction: current,
                accounts,
            });
        }

        let accounts = Self::rewrite(&txn, &current, &posted, |_| Some(BalanceEvent::Posted), at).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(TransactionOutcome {
            transaction: posted,
            accounts,
        })
    }

    #[instrument(skip(self, scope), fields(transaction_id = %id), err)]
    async fn archive_transaction(
        &self,
        scope: LedgerScope,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<TransactionOutcome, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_transaction(&txn, scope, id).await?;
        if current.status() == TransactionStatus::Archived {
            let accounts = current_accounts(&txn, &current).await?;
            return Ok(TransactionOutcome {
                transaction: current,
                accounts,
            });
        }

        let archived = current.archive(at);
        let release = current.status() == TransactionStatus::Pending;
        let accounts = Self::rewrite(
            &txn,
            &current,
            &archived,
            |entry| release.then_some(BalanceEvent::Reversed(entry.status())),
            at,
        )
        .await?;
        txn.commit().await.map_err(db_err)?;
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
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_transaction(&txn, scope, id).await?;
        let updated = current.with_details(update, at)?;

        let result = transactions::Entity::update_many()
            .col_expr(
                transactions::Column::Description,
                Expr::value(updated.description().map(str::to_string)),
            )
            .col_expr(transactions::Column::Metadata, Expr::value(updated.metadata().cloned()))
            .col_expr(transactions::Column::UpdatedAt, Expr::value(to_db(updated.updated_at())))
            .filter(transactions::Column::Id.eq(id.into_inner()))
            .filter(transactions::Column::Status.eq(TransactionStatus::Pending.as_str()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if result.rows_affected == 0 {
            return Err(Conflict::concurrent_modification(format!("transaction {id}")).into());
        }
        txn.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn get_transaction(&self, scope: LedgerScope, id: TransactionId) -> Result<Transaction, LedgerError> {
        find_transaction(&self.db, scope, id).await
    }

    async fn list_transactions(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Transaction>, LedgerError> {
        find_ledger(&self.db, scope).await?;
        let query = transactions::Entity::find()
            .filter(transactions::Column::OrganizationId.eq(scope.organization_id.into_inner()))
            .filter(transactions::Column::LedgerId.eq(scope.ledger_id.into_inner()));
        let total = query.clone().count(&self.db).await.map_err(db_err)?;
        let rows = query
            .order_by_asc(transactions::Column::CreatedAt)
            .order_by_asc(transactions::Column::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut grouped: HashMap<Uuid, Vec<entries::Model>> = HashMap::with_capacity(ids.len());
        if !ids.is_empty() {
            let entry_rows = entries::Entity::find()
                .filter(entries::Column::TransactionId.is_in(ids))
                .order_by_asc(entries::Column::Position)
                .all(&self.db)
                .await
                .map_err(db_err)?;
            for row in entry_rows {
                grouped.entry(row.transaction_id).or_default().push(row);
            }
        }

        let data = rows
            .into_iter()
            .map(|row| {
                let entry_rows = grouped.remove(&row.id).unwrap_or_default();
                transaction_from_models(row, entry_rows)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::new(data, page, total))
    }

    #[instrument(skip(self, scope), fields(transaction_id = %id), err)]
    async fn delete_transaction_with_balance_update(
        &self,
        scope: LedgerScope,
        id: TransactionId,
    ) -> Result<Vec<Account>, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_transaction(&txn, scope, id).await?;
        current.ensure_deletable(self.deletion_policy)?;

        let snapshot = snapshot(&txn, &current).await?;
        let archived = current.status() == TransactionStatus::Archived;
        let updated = apply_entries(
            &snapshot,
            current
                .entries()
                .iter()
                .filter(|entry| !archived || entry.status() == EntryStatus::Posted)
                .map(|entry| (entry, BalanceEvent::Reversed(entry.status()))),
            Utc::now(),
        )?;

        let entry_ids: Vec<Uuid> = current.entries().iter().map(|e| e.id().into_inner()).collect();
        let unlinked = settlement_entries::Entity::delete_many()
            .filter(settlement_entries::Column::EntryId.is_in(entry_ids))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        entries::Entity::delete_many()
            .filter(entries::Column::TransactionId.eq(id.into_inner()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        let removed = transactions::Entity::delete_many()
            .filter(transactions::Column::Id.eq(id.into_inner()))
            .filter(transactions::Column::Status.eq(current.status().as_str()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if removed.rows_affected == 0 {
            return Err(Conflict::concurrent_modification(format!("transaction {id}")).into());
        }

        let accounts = swap_balances(&txn, &snapshot, updated).await?;
        txn.commit().await.map_err(db_err)?;
        debug!(unlinked = unlinked.rows_affected, "transaction rows removed");
        Ok(accounts)
    }
}
