//! Double-entry bookkeeping.
//!
//! - Entries and transactions with their balance rules
//! - Accounts with pending, posted and available balance views
//! - Repository traits the storage layer implements
//! - [`LedgerService`], which ties repositories to the retry policy

pub mod balance;
pub mod entry;
pub mod error;
pub mod repository;
pub mod service;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod balance_props;
#[cfg(test)]
mod transaction_props;

pub use balance::{Account, BalanceEvent, BalanceView, NewAccount, NormalBalance, apply_entries};
pub use entry::{Direction, Entry, EntryInput, EntryRecord, EntryStatus};
pub use error::{Conflict, ConflictKind, EntityKind, InvariantViolation, LedgerError};
pub use repository::{AccountRepository, LedgerRepository, TransactionOutcome, TransactionRepository};
pub use service::LedgerService;
pub use transaction::{
    DeletionPolicy, EntryResponse, NewTransaction, Transaction, TransactionRecord, TransactionResponse,
    TransactionStatus, TransactionUpdate,
};
pub use types::{Ledger, LedgerScope, NewLedger};
