//! Account repository.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use tally_core::ledger::{Account, AccountRepository, LedgerError, LedgerScope};
use tally_shared::types::AccountId;
use tracing::instrument;

use super::convert::account_active;
use super::support::{find_account, find_ledger, swap_balances};
use crate::entities::accounts;
use crate::error::db_err;

/// Account storage.
#[derive(Debug, Clone)]
pub struct SqlAccountRepository {
    db: DatabaseConnection,
}

impl SqlAccountRepository {
    /// Creates a new account repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountRepository for SqlAccountRepository {
    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn create_account(&self, account: &Account) -> Result<Account, LedgerError> {
        find_ledger(&self.db, account.scope()).await?;
        accounts::Entity::insert(account_active(account))
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(account.clone())
    }

    async fn get_account(&self, scope: LedgerScope, account_id: AccountId) -> Result<Account, LedgerError> {
        find_account(&self.db, scope, account_id).await
    }

    async fn account_exists(&self, scope: LedgerScope, account_id: AccountId) -> Result<bool, LedgerError> {
        let count = accounts::Entity::find_by_id(account_id.into_inner())
            .filter(accounts::Column::OrganizationId.eq(scope.organization_id.into_inner()))
            .filter(accounts::Column::LedgerId.eq(scope.ledger_id.into_inner()))
            .count(&self.db)
            .await
            .map_err(db_err)?;
        Ok(count > 0)
    }

    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn update_balances(&self, account: &Account, expected_version: i64) -> Result<Account, LedgerError> {
        let snapshot = HashMap::from([(
            account.id,
            Account {
                lock_version: expected_version,
                ..account.clone()
            },
        )]);
        let mut written = swap_balances(&self.db, &snapshot, vec![account.clone()]).await?;
        written
            .pop()
            .ok_or_else(|| LedgerError::Internal("balance write returned nothing".to_string()))
    }
}
