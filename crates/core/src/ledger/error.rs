//! Ledger error types.
//!
//! Errors fall into a small taxonomy that callers branch on:
//! - `InvariantViolation`: the caller sent data that can never be accepted.
//! - `NotFound`: a referenced ledger, account, transaction, entry or
//!   settlement does not exist in the requested scope.
//! - `Conflict`: the request clashes with current state. The explicit
//!   `retryable` flag separates lock-version races (try again) from
//!   idempotency collisions and invalid state transitions (never succeeds).
//! - `Unavailable`: storage could not be reached.

use std::fmt;

use tally_shared::types::AccountId;
use thiserror::Error;

/// Entity named in a `NotFound` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A ledger.
    Ledger,
    /// An account.
    Account,
    /// A transaction.
    Transaction,
    /// A transaction entry.
    Entry,
    /// A settlement.
    Settlement,
}

impl EntityKind {
    /// Returns the string representation of the entity kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ledger => "Ledger",
            Self::Account => "Account",
            Self::Transaction => "Transaction",
            Self::Entry => "Entry",
            Self::Settlement => "Settlement",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction-time rule violations. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Transaction must have at least 2 entries.
    #[error("Transaction must have at least 2 entries, got {count}")]
    InsufficientEntries {
        /// Number of entries supplied.
        count: usize,
    },

    /// The same account appears in more than one entry.
    #[error("Account {0} appears in more than one entry")]
    DuplicateAccountInTransaction(AccountId),

    /// Sum of debits differs from sum of credits.
    #[error("Entries are not balanced. Debits: {debits}, Credits: {credits}")]
    UnbalancedEntries {
        /// Total debit amount in minor units.
        debits: i64,
        /// Total credit amount in minor units.
        credits: i64,
    },

    /// Entry direction is neither debit nor credit.
    #[error("Invalid entry direction '{0}', expected 'debit' or 'credit'")]
    InvalidDirection(String),

    /// Account normal balance is neither debit nor credit.
    #[error("Invalid normal balance '{0}', expected 'debit' or 'credit'")]
    InvalidNormalBalance(String),

    /// Amounts must be strictly positive integers.
    #[error("Amount must be a positive integer, got {amount}")]
    NonPositiveAmount {
        /// The rejected amount in minor units.
        amount: i64,
    },

    /// Entry currency differs from the ledger currency.
    #[error("Entry currency {found} does not match ledger currency {expected}")]
    CurrencyMismatch {
        /// Ledger currency code.
        expected: String,
        /// Entry currency code.
        found: String,
    },

    /// A sum of amounts does not fit in 64-bit minor units.
    #[error("Amount overflow")]
    AmountOverflow,

    /// Settled and contra account are the same.
    #[error("Settlement must move funds between two different accounts, got {0} twice")]
    SameSettlementAccounts(AccountId),

    /// Entry linked to a settlement is not on the settled account.
    #[error("Entry {entry_id} is not on settled account {account_id}")]
    EntryAccountMismatch {
        /// The offending entry.
        entry_id: String,
        /// The settlement's settled account.
        account_id: AccountId,
    },

    /// Only posted entries can be settled.
    #[error("Entry {0} is not posted")]
    EntryNotPosted(String),

    /// Stored data could not be read back as a valid value.
    #[error("Invalid stored value: {0}")]
    InvalidStoredValue(String),
}

impl InvariantViolation {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientEntries { .. } => "INSUFFICIENT_ENTRIES",
            Self::DuplicateAccountInTransaction(_) => "DUPLICATE_ACCOUNT_IN_TRANSACTION",
            Self::UnbalancedEntries { .. } => "UNBALANCED_ENTRIES",
            Self::InvalidDirection(_) => "INVALID_DIRECTION",
            Self::InvalidNormalBalance(_) => "INVALID_NORMAL_BALANCE",
            Self::NonPositiveAmount { .. } => "NON_POSITIVE_AMOUNT",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::SameSettlementAccounts(_) => "SAME_SETTLEMENT_ACCOUNTS",
            Self::EntryAccountMismatch { .. } => "ENTRY_ACCOUNT_MISMATCH",
            Self::EntryNotPosted(_) => "ENTRY_NOT_POSTED",
            Self::InvalidStoredValue(_) => "INVALID_STORED_VALUE",
        }
    }
}

/// Flavor of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Account `lock_version` moved since it was read.
    LockVersionMismatch,
    /// Another writer changed the record between read and write.
    ConcurrentModification,
    /// A transaction with the same idempotency key already exists.
    DuplicateIdempotencyKey,
    /// Requested status change is not in the transition table.
    InvalidTransition,
    /// Posting an archived transaction.
    ArchivedTransaction,
    /// Editing a transaction that is no longer pending.
    TransactionNotPending,
    /// Deleting a posted transaction outside sandbox mode.
    PostedTransactionDeletion,
    /// Changing entries of a settlement whose amount is final.
    SettlementFinalized,
    /// Entry already belongs to another settlement.
    EntryAlreadySettled,
}

/// A conflict with current state, carrying an explicit retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// What kind of conflict occurred.
    pub kind: ConflictKind,
    /// Human-readable description.
    pub message: String,
    /// Whether repeating the same request may succeed.
    pub retryable: bool,
}

impl Conflict {
    fn new(kind: ConflictKind, message: String, retryable: bool) -> Self {
        Self {
            kind,
            message,
            retryable,
        }
    }

    /// Stored account version differs from the version the writer read.
    #[must_use]
    pub fn lock_version_mismatch(account_id: AccountId, expected: i64, actual: i64) -> Self {
        Self::new(
            ConflictKind::LockVersionMismatch,
            format!(
                "account {account_id} lock version mismatch: expected {expected}, found {actual}"
            ),
            true,
        )
    }

    /// A record changed between read and conditional write.
    #[must_use]
    pub fn concurrent_modification(what: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::ConcurrentModification,
            format!("{what} was modified concurrently"),
            true,
        )
    }

    /// Idempotency key already used in this ledger.
    #[must_use]
    pub fn duplicate_idempotency_key(key: &str) -> Self {
        Self::new(
            ConflictKind::DuplicateIdempotencyKey,
            format!("transaction with idempotency key '{key}' already exists"),
            false,
        )
    }

    /// Status change outside the transition table.
    #[must_use]
    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::InvalidTransition,
            format!("invalid status transition from {from} to {to}"),
            false,
        )
    }

    /// Posting an archived transaction.
    #[must_use]
    pub fn archived_transaction(id: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::ArchivedTransaction,
            format!("cannot post archived transaction {id}"),
            false,
        )
    }

    /// Editing a transaction outside `pending`.
    #[must_use]
    pub fn transaction_not_pending(id: impl fmt::Display, status: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::TransactionNotPending,
            format!("transaction {id} is {status}, only pending transactions can be modified"),
            false,
        )
    }

    /// Deleting a posted transaction without sandbox mode.
    #[must_use]
    pub fn posted_transaction_deletion(id: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::PostedTransactionDeletion,
            format!("cannot delete posted transaction {id}"),
            false,
        )
    }

    /// Entry membership change after the amount was finalized.
    #[must_use]
    pub fn settlement_finalized(id: impl fmt::Display, status: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::SettlementFinalized,
            format!("settlement {id} is {status}, entries can no longer change"),
            false,
        )
    }

    /// Entry already linked to another settlement.
    #[must_use]
    pub fn entry_already_settled(entry_id: impl fmt::Display, settlement_id: impl fmt::Display) -> Self {
        Self::new(
            ConflictKind::EntryAlreadySettled,
            format!("entry {entry_id} already belongs to settlement {settlement_id}"),
            false,
        )
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Input violates a ledger invariant.
    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),

    /// Referenced entity does not exist in the requested scope.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of the missing entity.
        entity: EntityKind,
        /// ID of the missing entity.
        id: String,
    },

    /// Request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(Conflict),

    /// Storage is unreachable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Conflict> for LedgerError {
    fn from(conflict: Conflict) -> Self {
        Self::Conflict(conflict)
    }
}

impl LedgerError {
    /// Builds a `NotFound` error.
    #[must_use]
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvariantViolation(violation) => violation.error_code(),
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(conflict) => match conflict.kind {
                ConflictKind::LockVersionMismatch => "LOCK_VERSION_MISMATCH",
                ConflictKind::ConcurrentModification => "CONCURRENT_MODIFICATION",
                ConflictKind::DuplicateIdempotencyKey => "DUPLICATE_IDEMPOTENCY_KEY",
                ConflictKind::InvalidTransition => "INVALID_TRANSITION",
                ConflictKind::ArchivedTransaction => "ARCHIVED_TRANSACTION",
                ConflictKind::TransactionNotPending => "TRANSACTION_NOT_PENDING",
                ConflictKind::PostedTransactionDeletion => "POSTED_TRANSACTION_DELETION",
                ConflictKind::SettlementFinalized => "SETTLEMENT_FINALIZED",
                ConflictKind::EntryAlreadySettled => "ENTRY_ALREADY_SETTLED",
            },
            Self::Unavailable(_) => "STORAGE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - caller sent invalid data
            Self::InvariantViolation(_) => 400,

            // 404 Not Found
            Self::NotFound { .. } => 404,

            // 409 Conflict - both retryable and final conflicts
            Self::Conflict(_) => 409,

            // 503 Service Unavailable
            Self::Unavailable(_) => 503,

            // 500 Internal Server Error
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if repeating the request may succeed.
    ///
    /// Only conflicts flagged retryable qualify. `Unavailable` is retried, if
    /// at all, by whatever sits above the ledger engine.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(conflict) if conflict.retryable)
    }

    /// Returns the conflict payload, if this is a conflict.
    #[must_use]
    pub fn as_conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}
