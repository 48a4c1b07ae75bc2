//! Settlement repository.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use tally_core::ledger::{
    Conflict, EntityKind, Entry, EntryStatus, InvariantViolation, LedgerError, LedgerScope,
};
use tally_core::settlement::{
    Settlement, SettlementRepository, SettlementStatus, StatusUpdate, TransitionEffect, net_amount,
};
use tally_shared::types::{EntryId, PageRequest, PageResponse, SettlementId};
use tracing::{info, instrument};
use uuid::Uuid;

use super::convert::{settlement_active, settlement_from_model, to_db};
use super::support::{find_account, find_entries, find_ledger, insert_transaction};
use crate::entities::{settlement_entries, settlements};
use crate::error::{db_err, insert_err};

/// Settlement storage.
#[derive(Debug, Clone)]
pub struct SqlSettlementRepository {
    db: DatabaseConnection,
}

impl SqlSettlementRepository {
    /// Creates a new settlement repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

async fn find_settlement<C: ConnectionTrait>(
    conn: &C,
    scope: LedgerScope,
    id: SettlementId,
) -> Result<Settlement, LedgerError> {
    let model = settlements::Entity::find_by_id(id.into_inner())
        .filter(settlements::Column::OrganizationId.eq(scope.organization_id.into_inner()))
        .filter(settlements::Column::LedgerId.eq(scope.ledger_id.into_inner()))
        .one(conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Settlement, id))?;
    settlement_from_model(model)
}

async fn link_rows<C: ConnectionTrait>(
    conn: &C,
    id: SettlementId,
) -> Result<Vec<settlement_entries::Model>, LedgerError> {
    settlement_entries::Entity::find()
        .filter(settlement_entries::Column::SettlementId.eq(id.into_inner()))
        .order_by_asc(settlement_entries::Column::Position)
        .all(conn)
        .await
        .map_err(db_err)
}

async fn linked_entries<C: ConnectionTrait>(
    conn: &C,
    scope: LedgerScope,
    id: SettlementId,
) -> Result<Vec<Entry>, LedgerError> {
    let ids: Vec<EntryId> = link_rows(conn, id)
        .await?
        .into_iter()
        .map(|row| EntryId::from_uuid(row.entry_id))
        .collect();
    find_entries(conn, scope, &ids).await
}

async fn calculate<C: ConnectionTrait>(conn: &C, settlement: &Settlement) -> Result<i64, LedgerError> {
    let scope = settlement.scope();
    let account = find_account(conn, scope, settlement.settled_account_id()).await?;
    let entries = linked_entries(conn, scope, settlement.id()).await?;
    Ok(net_amount(account.normal_balance, &entries)?)
}

/// Writes `next` over the stored row if the stored status and amount still
/// match `read`.
async fn store_if_unchanged<C: ConnectionTrait>(
    conn: &C,
    next: &Settlement,
    read: &Settlement,
) -> Result<(), LedgerError> {
    let amount = match read.amount() {
        Some(amount) => settlements::Column::Amount.eq(amount),
        None => settlements::Column::Amount.is_null(),
    };
    let result = settlements::Entity::update_many()
        .col_expr(settlements::Column::Status, Expr::value(next.status().as_str()))
        .col_expr(settlements::Column::Amount, Expr::value(next.amount()))
        .col_expr(
            settlements::Column::TransactionId,
            Expr::value(next.transaction_id().map(|id| id.into_inner())),
        )
        .col_expr(settlements::Column::UpdatedAt, Expr::value(to_db(next.updated_at())))
        .filter(settlements::Column::Id.eq(next.id().into_inner()))
        .filter(settlements::Column::Status.eq(read.status().as_str()))
        .filter(amount)
        .exec(conn)
        .await
        .map_err(db_err)?;
    if result.rows_affected == 0 {
        return Err(Conflict::concurrent_modification(format!("settlement {}", next.id())).into());
    }
    Ok(())
}

fn ensure_open(settlement: &Settlement) -> Result<(), LedgerError> {
    if settlement.status().accepts_entry_changes() {
        Ok(())
    } else {
        Err(Conflict::settlement_finalized(settlement.id(), settlement.status()).into())
    }
}

#[async_trait]
impl SettlementRepository for SqlSettlementRepository {
    #[instrument(skip(self, settlement), fields(settlement_id = %settlement.id()), err)]
    async fn create_settlement(&self, settlement: &Settlement) -> Result<Settlement, LedgerError> {
        let scope = settlement.scope();
        find_ledger(&self.db, scope).await?;
        find_account(&self.db, scope, settlement.settled_account_id()).await?;
        find_account(&self.db, scope, settlement.contra_account_id()).await?;
        settlements::Entity::insert(settlement_active(settlement))
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(settlement.clone())
    }

    async fn get_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<Settlement, LedgerError> {
        find_settlement(&self.db, scope, id).await
    }

    async fn list_settlements(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Settlement>, LedgerError> {
        find_ledger(&self.db, scope).await?;
        let query = settlements::Entity::find()
            .filter(settlements::Column::OrganizationId.eq(scope.organization_id.into_inner()))
            .filter(settlements::Column::LedgerId.eq(scope.ledger_id.into_inner()));
        let total = query.clone().count(&self.db).await.map_err(db_err)?;
        let data = query
            .order_by_asc(settlements::Column::CreatedAt)
            .order_by_asc(settlements::Column::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(settlement_from_model)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::new(data, page, total))
    }

    #[instrument(skip(self, scope), fields(settlement_id = %id), err)]
    async fn delete_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<(), LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_settlement(&txn, scope, id).await?;
        if current.status() != SettlementStatus::Drafting {
            return Err(Conflict::invalid_transition(current.status(), "deleted").into());
        }
        settlement_entries::Entity::delete_many()
            .filter(settlement_entries::Column::SettlementId.eq(id.into_inner()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        let removed = settlements::Entity::delete_many()
            .filter(settlements::Column::Id.eq(id.into_inner()))
            .filter(settlements::Column::Status.eq(SettlementStatus::Drafting.as_str()))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if removed.rows_affected == 0 {
            return Err(Conflict::concurrent_modification(format!("settlement {id}")).into());
        }
        txn.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn calculate_amount(&self, scope: LedgerScope, id: SettlementId) -> Result<i64, LedgerError> {
        let settlement = find_settlement(&self.db, scope, id).await?;
        calculate(&self.db, &settlement).await
    }

    #[instrument(skip(self, scope, update), fields(settlement_id = %id, to = %update.target), err)]
    async fn update_status(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        update: StatusUpdate,
    ) -> Result<Settlement, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let current = find_settlement(&txn, scope, id).await?;
        current.ensure_unchanged_since(&update)?;
        let plan = current.plan_transition(update.target)?;

        let (amount, transaction_id) = match &update.effect {
            TransitionEffect::CalculateAmount => (Some(calculate(&txn, &current).await?), None),
            TransitionEffect::PostTransaction(transaction) => {
                let outcome = insert_transaction(&txn, transaction, update.at).await?;
                (None, Some(outcome.transaction.id()))
            }
            TransitionEffect::None | TransitionEffect::ClearAmount => (None, None),
        };

        let next = current.transitioned(update.target, plan, amount, transaction_id, update.at);
        store_if_unchanged(&txn, &next, &current).await?;
        txn.commit().await.map_err(db_err)?;
        info!(from = %update.expected, to = %next.status(), "settlement status stored");
        Ok(next)
    }

    #[instrument(skip(self, scope, entry_ids), fields(settlement_id = %id, count = entry_ids.len()), err)]
    async fn add_entries_to_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let settlement = find_settlement(&txn, scope, id).await?;
        ensure_open(&settlement)?;

        let entries = find_entries(&txn, scope, entry_ids).await?;
        for entry in &entries {
            if entry.account_id() != settlement.settled_account_id() {
                return Err(InvariantViolation::EntryAccountMismatch {
                    entry_id: entry.id().to_string(),
                    account_id: settlement.settled_account_id(),
                }
                .into());
            }
            if entry.status() != EntryStatus::Posted {
                return Err(InvariantViolation::EntryNotPosted(entry.id().to_string()).into());
            }
        }

        let requested: Vec<Uuid> = entry_ids.iter().map(|entry_id| entry_id.into_inner()).collect();
        let existing = settlement_entries::Entity::find()
            .filter(settlement_entries::Column::EntryId.is_in(requested))
            .all(&txn)
            .await
            .map_err(db_err)?;
        let mut skip = HashSet::new();
        for link in existing {
            if link.settlement_id != id.into_inner() {
                return Err(Conflict::entry_already_settled(
                    EntryId::from_uuid(link.entry_id),
                    SettlementId::from_uuid(link.settlement_id),
                )
                .into());
            }
            skip.insert(link.entry_id);
        }

        let next_position = link_rows(&txn, id)
            .await?
            .last()
            .map_or(0, |row| row.position + 1);
        let now = Utc::now();
        let rows: Vec<settlement_entries::ActiveModel> = entry_ids
            .iter()
            .map(|entry_id| entry_id.into_inner())
            .filter(|entry_id| skip.insert(*entry_id))
            .zip(next_position..)
            .map(|(entry_id, position)| settlement_entries::ActiveModel {
                entry_id: Set(entry_id),
                settlement_id: Set(id.into_inner()),
                position: Set(position),
                created_at: Set(to_db(now)),
            })
            .collect();
        if !rows.is_empty() {
            settlement_entries::Entity::insert_many(rows)
                .exec_without_returning(&txn)
                .await
                .map_err(|err| insert_err(err, None, &format!("settlement {id}")))?;
        }

        let next = settlement.with_status(settlement.status(), now);
        store_if_unchanged(&txn, &next, &settlement).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(next)
    }

    #[instrument(skip(self, scope, entry_ids), fields(settlement_id = %id, count = entry_ids.len()), err)]
    async fn remove_entries_from_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let settlement = find_settlement(&txn, scope, id).await?;
        ensure_open(&settlement)?;

        let linked: HashSet<Uuid> = link_rows(&txn, id)
            .await?
            .into_iter()
            .map(|row| row.entry_id)
            .collect();
        if let Some(missing) = entry_ids.iter().find(|entry_id| !linked.contains(&entry_id.into_inner())) {
            return Err(LedgerError::not_found(EntityKind::Entry, missing));
        }

        settlement_entries::Entity::delete_many()
            .filter(settlement_entries::Column::SettlementId.eq(id.into_inner()))
            .filter(settlement_entries::Column::EntryId.is_in(entry_ids.iter().map(|entry_id| entry_id.into_inner())))
            .exec(&txn)
            .await
            .map_err(db_err)?;

        let next = settlement.with_status(settlement.status(), Utc::now());
        store_if_unchanged(&txn, &next, &settlement).await?;
        txn.commit().await.map_err(db_err)?;
        Ok(next)
    }

    async fn settlement_entries(&self, scope: LedgerScope, id: SettlementId) -> Result<Vec<Entry>, LedgerError> {
        find_settlement(&self.db, scope, id).await?;
        linked_entries(&self.db, scope, id).await
    }
}
