//! `SeaORM` Entity for accounts table.
//!
//! Each balance view is stored as three columns: signed amount, credit total
//! and debit total.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub ledger_id: Uuid,
    pub name: String,
    pub normal_balance: String,
    pub pending_amount: i64,
    pub pending_credits: i64,
    pub pending_debits: i64,
    pub posted_amount: i64,
    pub posted_credits: i64,
    pub posted_debits: i64,
    pub available_amount: i64,
    pub available_credits: i64,
    pub available_debits: i64,
    pub lock_version: i64,
    pub metadata: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ledgers::Entity",
        from = "Column::LedgerId",
        to = "super::ledgers::Column::Id"
    )]
    Ledgers,
    #[sea_orm(has_many = "super::entries::Entity")]
    Entries,
}

impl Related<super::ledgers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ledgers.def()
    }
}

impl Related<super::entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
