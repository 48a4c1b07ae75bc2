//! Settlements and their entry links.

use sea_orm_migration::prelude::*;

use super::m20261017_000001_ledger_schema::{Accounts, Entries, Ledgers, Transactions};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Settlements::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Settlements::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Settlements::OrganizationId).uuid().not_null())
                    .col(ColumnDef::new(Settlements::LedgerId).uuid().not_null())
                    .col(ColumnDef::new(Settlements::SettledAccountId).uuid().not_null())
                    .col(ColumnDef::new(Settlements::ContraAccountId).uuid().not_null())
                    .col(ColumnDef::new(Settlements::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Settlements::Amount).big_integer().null())
                    .col(ColumnDef::new(Settlements::TransactionId).uuid().null())
                    .col(ColumnDef::new(Settlements::Description).text().null())
                    .col(ColumnDef::new(Settlements::Metadata).json().null())
                    .col(
                        ColumnDef::new(Settlements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Settlements::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlements_ledger")
                            .from(Settlements::Table, Settlements::LedgerId)
                            .to(Ledgers::Table, Ledgers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlements_settled_account")
                            .from(Settlements::Table, Settlements::SettledAccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlements_contra_account")
                            .from(Settlements::Table, Settlements::ContraAccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlements_transaction")
                            .from(Settlements::Table, Settlements::TransactionId)
                            .to(Transactions::Table, Transactions::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_settlements_ledger_created")
                    .table(Settlements::Table)
                    .col(Settlements::LedgerId)
                    .col(Settlements::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SettlementEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SettlementEntries::EntryId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SettlementEntries::SettlementId).uuid().not_null())
                    .col(ColumnDef::new(SettlementEntries::Position).big_integer().not_null())
                    .col(
                        ColumnDef::new(SettlementEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlement_entries_settlement")
                            .from(SettlementEntries::Table, SettlementEntries::SettlementId)
                            .to(Settlements::Table, Settlements::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_settlement_entries_entry")
                            .from(SettlementEntries::Table, SettlementEntries::EntryId)
                            .to(Entries::Table, Entries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_settlement_entries_settlement")
                    .table(SettlementEntries::Table)
                    .col(SettlementEntries::SettlementId)
                    .col(SettlementEntries::Position)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SettlementEntries::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Settlements::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Settlements {
    Table,
    Id,
    OrganizationId,
    LedgerId,
    SettledAccountId,
    ContraAccountId,
    Status,
    Amount,
    TransactionId,
    Description,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SettlementEntries {
    Table,
    EntryId,
    SettlementId,
    Position,
    CreatedAt,
}
