//! `SeaORM` entities for the ledger schema.

pub mod accounts;
pub mod entries;
pub mod ledgers;
pub mod settlement_entries;
pub mod settlements;
pub mod transactions;
