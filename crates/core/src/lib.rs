//! Core ledger logic for Tally.
//!
//! Domain types, balance rules and the settlement lifecycle live here,
//! behind repository traits. Storage backends implement those traits; an
//! in-memory store ships with the crate for tests and embedding.
//!
//! # Modules
//!
//! - `ledger` - Double-entry transactions, accounts and balances
//! - `settlement` - Settlement lifecycle
//! - `retry` - Backoff with jitter for optimistic-lock conflicts
//! - `memory` - In-memory repository implementation

pub mod ledger;
pub mod memory;
pub mod retry;
pub mod settlement;

pub use ledger::{LedgerError, LedgerService};
pub use memory::InMemoryLedgerStore;
pub use retry::RetryPolicy;
