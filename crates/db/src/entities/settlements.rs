//! `SeaORM` Entity for settlements table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "settlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub ledger_id: Uuid,
    pub settled_account_id: Uuid,
    pub contra_account_id: Uuid,
    pub status: String,
    pub amount: Option<i64>,
    pub transaction_id: Option<Uuid>,
    pub description: Option<String>,
    pub metadata: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::settlement_entries::Entity")]
    SettlementEntries,
}

impl Related<super::settlement_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SettlementEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
