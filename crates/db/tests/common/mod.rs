//! Shared fixtures for the repository integration tests.
//!
//! Every test gets its own in-memory SQLite database on a single pooled
//! connection, so concurrent callers queue on the pool instead of on
//! SQLite's file lock. [`FileDatabase`] gives tests that need several
//! connections a throwaway database file instead.

#![allow(dead_code)]

use std::path::PathBuf;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tally_core::LedgerService;
use tally_core::ledger::{EntryInput, LedgerScope, NewAccount, NewLedger, NewTransaction};
use tally_db::migration::Migrator;
use tally_shared::types::{AccountId, Currency, OrganizationId};
use tally_shared::{AppConfig, DatabaseConfig, LedgerConfig, RetryConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tally_db=debug,tally_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn config(sandbox_mode: bool) -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        ledger: LedgerConfig {
            retry: RetryConfig {
                max_attempts: 50,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            sandbox_mode,
        },
    }
}

pub async fn database() -> DatabaseConnection {
    init_tracing();
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect to sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

/// SQLite database file removed on drop.
pub struct FileDatabase {
    path: PathBuf,
}

impl FileDatabase {
    pub fn new() -> Self {
        init_tracing();
        let path = std::env::temp_dir().join(format!("tally-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    /// Opens a single-connection pool on the file. Lock waits give up after
    /// `busy_timeout_ms` so contention surfaces as an error.
    pub async fn connect(&self, busy_timeout_ms: u32) -> DatabaseConnection {
        let url = format!("sqlite://{}?mode=rwc", self.path.display());
        let mut options = ConnectOptions::new(url);
        options.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.expect("connect to sqlite file");
        db.execute_unprepared(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
            .await
            .expect("set busy timeout");
        db
    }

    /// Connects and applies migrations.
    pub async fn migrated(&self, busy_timeout_ms: u32) -> DatabaseConnection {
        let db = self.connect(busy_timeout_ms).await;
        Migrator::up(&db, None).await.expect("run migrations");
        db
    }
}

impl Drop for FileDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct Harness {
    pub db: DatabaseConnection,
    pub service: LedgerService,
    pub scope: LedgerScope,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_sandbox(false).await
    }

    pub async fn with_sandbox(sandbox_mode: bool) -> Self {
        Self::on(database().await, sandbox_mode).await
    }

    pub async fn on(db: DatabaseConnection, sandbox_mode: bool) -> Self {
        let service = tally_db::ledger_service(&db, &config(sandbox_mode));
        let scope = service
            .create_ledger(&NewLedger {
                organization_id: OrganizationId::new(),
                name: "Operating".to_string(),
                currency: Currency::new("USD", 2).expect("valid currency"),
                metadata: None,
            })
            .await
            .expect("create ledger")
            .scope();
        Self { db, service, scope }
    }

    pub async fn account(&self, name: &str, normal_balance: &str) -> AccountId {
        self.service
            .create_account(&NewAccount {
                organization_id: self.scope.organization_id,
                ledger_id: self.scope.ledger_id,
                name: name.to_string(),
                normal_balance: normal_balance.to_string(),
                metadata: None,
            })
            .await
            .expect("create account")
            .id
    }

    pub fn transfer(&self, from: AccountId, to: AccountId, amount: i64) -> NewTransaction {
        NewTransaction::new(
            self.scope.organization_id,
            self.scope.ledger_id,
            vec![EntryInput::debit(to, amount), EntryInput::credit(from, amount)],
        )
    }
}
