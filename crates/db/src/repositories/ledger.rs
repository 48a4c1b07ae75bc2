//! Ledger repository.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use tally_core::ledger::{Ledger, LedgerError, LedgerRepository, LedgerScope};
use tracing::{info, instrument};

use super::convert::ledger_active;
use super::support::find_ledger;
use crate::entities::ledgers;
use crate::error::db_err;

/// Ledger storage.
#[derive(Debug, Clone)]
pub struct SqlLedgerRepository {
    db: DatabaseConnection,
}

impl SqlLedgerRepository {
    /// Creates a new ledger repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerRepository for SqlLedgerRepository {
    #[instrument(skip(self, ledger), fields(ledger_id = %ledger.id), err)]
    async fn create_ledger(&self, ledger: &Ledger) -> Result<Ledger, LedgerError> {
        ledgers::Entity::insert(ledger_active(ledger))
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        info!(currency = %ledger.currency, "ledger stored");
        Ok(ledger.clone())
    }

    async fn get_ledger(&self, scope: LedgerScope) -> Result<Ledger, LedgerError> {
        find_ledger(&self.db, scope).await
    }
}
