//! Repository implementations over `SeaORM`.
//!
//! Each repository owns a connection pool and implements one of the
//! `tally-core` repository traits. Writes that move balances run in a single
//! database transaction and update accounts with
//! `UPDATE ... WHERE lock_version = ?`.

pub mod account;
pub mod ledger;
pub mod settlement;
pub mod transaction;

mod convert;
mod support;

pub use account::SqlAccountRepository;
pub use ledger::SqlLedgerRepository;
pub use settlement::SqlSettlementRepository;
pub use transaction::SqlTransactionRepository;
