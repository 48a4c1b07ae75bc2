//! Ledgers, accounts, transactions and entries.
//!
//! Amounts are `BIGINT` minor units. Accounts carry a `lock_version` that
//! every balance write compares and increments.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Ledgers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Ledgers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Ledgers::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Ledgers::Name).string().not_null())
                    .col(ColumnDef::new(Ledgers::CurrencyCode).string_len(3).not_null())
                    .col(ColumnDef::new(Ledgers::CurrencyExponent).small_integer().not_null())
                    .col(ColumnDef::new(Ledgers::Metadata).json().null())
                    .col(
                        ColumnDef::new(Ledgers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ledgers_organization")
                    .table(Ledgers::Table)
                    .col(Ledgers::OrganizationId)
                    .to_owned(),
            )
            .await?;

        let mut accounts = Table::create();
        accounts
            .table(Accounts::Table)
            .if_not_exists()
            .col(ColumnDef::new(Accounts::Id).uuid().not_null().primary_key())
            .col(ColumnDef::new(Accounts::OrganizationId).uuid().not_null())
            .col(ColumnDef::new(Accounts::LedgerId).uuid().not_null())
            .col(ColumnDef::new(Accounts::Name).string().not_null())
            .col(ColumnDef::new(Accounts::NormalBalance).string_len(6).not_null());
        for column in Accounts::BALANCE_COLUMNS {
            accounts.col(ColumnDef::new(column).big_integer().not_null().default(0));
        }
        accounts
            .col(
                ColumnDef::new(Accounts::LockVersion)
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .col(ColumnDef::new(Accounts::Metadata).json().null())
            .col(
                ColumnDef::new(Accounts::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Accounts::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_accounts_ledger")
                    .from(Accounts::Table, Accounts::LedgerId)
                    .to(Ledgers::Table, Ledgers::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            );
        manager.create_table(accounts.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_ledger")
                    .table(Accounts::Table)
                    .col(Accounts::LedgerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Transactions::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Transactions::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Transactions::LedgerId).uuid().not_null())
                    .col(ColumnDef::new(Transactions::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Transactions::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::CurrencyCode).string_len(3).not_null())
                    .col(
                        ColumnDef::new(Transactions::CurrencyExponent)
                            .small_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::Description).text().null())
                    .col(
                        ColumnDef::new(Transactions::EffectiveAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::IdempotencyKey).string().null())
                    .col(ColumnDef::new(Transactions::Metadata).json().null())
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::PostedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::ArchivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transactions_ledger")
                            .from(Transactions::Table, Transactions::LedgerId)
                            .to(Ledgers::Table, Ledgers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // NULL keys never collide, so only keyed transactions are deduplicated
        manager
            .create_index(
                Index::create()
                    .name("uq_transactions_ledger_idempotency_key")
                    .table(Transactions::Table)
                    .col(Transactions::LedgerId)
                    .col(Transactions::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_transactions_ledger_created")
                    .table(Transactions::Table)
                    .col(Transactions::LedgerId)
                    .col(Transactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Entries::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Entries::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Entries::TransactionId).uuid().not_null())
                    .col(ColumnDef::new(Entries::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Entries::LedgerId).uuid().not_null())
                    .col(ColumnDef::new(Entries::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Entries::Position).integer().not_null())
                    .col(ColumnDef::new(Entries::Direction).string_len(6).not_null())
                    .col(ColumnDef::new(Entries::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Entries::CurrencyCode).string_len(3).not_null())
                    .col(ColumnDef::new(Entries::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Entries::Metadata).json().null())
                    .col(
                        ColumnDef::new(Entries::PostedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Entries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .check(Expr::col(Entries::Amount).gt(0))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entries_transaction")
                            .from(Entries::Table, Entries::TransactionId)
                            .to(Transactions::Table, Transactions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entries_account")
                            .from(Entries::Table, Entries::AccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entries_transaction")
                    .table(Entries::Table)
                    .col(Entries::TransactionId)
                    .col(Entries::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entries_account")
                    .table(Entries::Table)
                    .col(Entries::AccountId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entries::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Ledgers::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(super) enum Ledgers {
    Table,
    Id,
    OrganizationId,
    Name,
    CurrencyCode,
    CurrencyExponent,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
pub(super) enum Accounts {
    Table,
    Id,
    OrganizationId,
    LedgerId,
    Name,
    NormalBalance,
    PendingAmount,
    PendingCredits,
    PendingDebits,
    PostedAmount,
    PostedCredits,
    PostedDebits,
    AvailableAmount,
    AvailableCredits,
    AvailableDebits,
    LockVersion,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

impl Accounts {
    const BALANCE_COLUMNS: [Self; 9] = [
        Self::PendingAmount,
        Self::PendingCredits,
        Self::PendingDebits,
        Self::PostedAmount,
        Self::PostedCredits,
        Self::PostedDebits,
        Self::AvailableAmount,
        Self::AvailableCredits,
        Self::AvailableDebits,
    ];
}

#[derive(DeriveIden)]
pub(super) enum Transactions {
    Table,
    Id,
    OrganizationId,
    LedgerId,
    Status,
    Amount,
    CurrencyCode,
    CurrencyExponent,
    Description,
    EffectiveAt,
    IdempotencyKey,
    Metadata,
    CreatedAt,
    UpdatedAt,
    PostedAt,
    ArchivedAt,
}

#[derive(DeriveIden)]
pub(super) enum Entries {
    Table,
    Id,
    TransactionId,
    OrganizationId,
    LedgerId,
    AccountId,
    Position,
    Direction,
    Amount,
    CurrencyCode,
    Status,
    Metadata,
    PostedAt,
    CreatedAt,
}
