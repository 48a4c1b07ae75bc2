//! Relational storage for Tally.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for the ledger schema
//! - Database migrations
//! - Repositories implementing the `tally-core` repository traits

pub mod entities;
pub mod migration;
pub mod repositories;

mod error;

pub use repositories::{SqlAccountRepository, SqlLedgerRepository, SqlSettlementRepository, SqlTransactionRepository};

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tally_core::ledger::DeletionPolicy;
use tally_core::{LedgerService, RetryPolicy};
use tally_shared::{AppConfig, DatabaseConfig};

/// Establishes a connection pool sized by `config`.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Database::connect(options).await
}

/// Builds a [`LedgerService`] over the relational repositories.
#[must_use]
pub fn ledger_service(db: &DatabaseConnection, config: &AppConfig) -> LedgerService {
    let deletion_policy = DeletionPolicy::from_sandbox_mode(config.ledger.sandbox_mode);
    LedgerService::new(
        Arc::new(SqlLedgerRepository::new(db.clone())),
        Arc::new(SqlAccountRepository::new(db.clone())),
        Arc::new(SqlTransactionRepository::new(db.clone(), deletion_policy)),
        Arc::new(SqlSettlementRepository::new(db.clone())),
        RetryPolicy::from_config(&config.ledger.retry),
    )
}
