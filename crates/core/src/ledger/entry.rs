//! Transaction entry domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{AccountId, Currency, EntryId, TransactionId};

use super::error::InvariantViolation;

/// Side of an entry.
///
/// In double-entry bookkeeping:
/// - Debits increase debit-normal accounts (assets, expenses)
/// - Credits increase credit-normal accounts (liabilities, equity, revenue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Debit entry.
    Debit,
    /// Credit entry.
    Credit,
}

impl Direction {
    /// Returns the string representation of the direction.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Returns the other side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = InvariantViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(InvariantViolation::InvalidDirection(other.to_string())),
        }
    }
}

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Recorded but not yet posted.
    Pending,
    /// Posted to the ledger.
    Posted,
}

impl EntryStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "posted" => Some(Self::Posted),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw input for one entry of a new transaction.
///
/// `direction` stays a string until the transaction is constructed, so an
/// unknown direction is rejected by the same code path as every other
/// invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInput {
    /// The account to post to.
    pub account_id: AccountId,
    /// `"debit"` or `"credit"`.
    pub direction: String,
    /// Amount in minor units (must be positive).
    pub amount: i64,
    /// Optional currency code; must match the ledger when present.
    #[serde(default)]
    pub currency: Option<String>,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl EntryInput {
    /// A debit of `amount` minor units against `account_id`.
    #[must_use]
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self::new(account_id, Direction::Debit.as_str(), amount)
    }

    /// A credit of `amount` minor units against `account_id`.
    #[must_use]
    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self::new(account_id, Direction::Credit.as_str(), amount)
    }

    /// An entry with an arbitrary direction string.
    #[must_use]
    pub fn new(account_id: AccountId, direction: &str, amount: i64) -> Self {
        Self {
            account_id,
            direction: direction.to_string(),
            amount,
            currency: None,
            metadata: None,
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A single debit or credit line of a transaction.
///
/// Entries are immutable. Posting produces a new instance through
/// [`Entry::with_posted_status`]; entries only come into existence through
/// transaction construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    id: EntryId,
    transaction_id: TransactionId,
    account_id: AccountId,
    direction: Direction,
    amount: i64,
    currency: Currency,
    status: EntryStatus,
    metadata: Option<Value>,
    posted_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Only transaction construction may create entries.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: EntryId,
        transaction_id: TransactionId,
        account_id: AccountId,
        direction: Direction,
        amount: i64,
        currency: Currency,
        status: EntryStatus,
        metadata: Option<Value>,
        posted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            transaction_id,
            account_id,
            direction,
            amount,
            currency,
            status,
            metadata,
            posted_at,
        }
    }

    /// Unique identifier for this entry.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The transaction this entry belongs to.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// The account affected by this entry.
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Debit or credit.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Amount in minor units, always positive.
    #[must_use]
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Currency of the amount.
    #[must_use]
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> EntryStatus {
        self.status
    }

    /// Caller metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// When the entry was posted.
    #[must_use]
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }

    /// Returns the signed amount (positive for debit, negative for credit).
    #[must_use]
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Debit => self.amount,
            Direction::Credit => -self.amount,
        }
    }

    /// Returns a posted copy stamped with `posted_at`.
    ///
    /// An already posted entry is returned unchanged, keeping its original
    /// timestamp.
    #[must_use]
    pub fn with_posted_status(&self, posted_at: DateTime<Utc>) -> Self {
        if self.status == EntryStatus::Posted {
            return self.clone();
        }
        Self {
            status: EntryStatus::Posted,
            posted_at: Some(posted_at),
            ..self.clone()
        }
    }

    /// Flattens the entry for persistence.
    #[must_use]
    pub fn to_record(&self) -> EntryRecord {
        EntryRecord {
            id: self.id,
            transaction_id: self.transaction_id,
            account_id: self.account_id,
            direction: self.direction,
            amount: self.amount,
            currency: self.currency.clone(),
            status: self.status,
            metadata: self.metadata.clone(),
            posted_at: self.posted_at,
        }
    }

    /// Rebuilds an entry from storage. Invariants are checked by the owning
    /// transaction.
    #[must_use]
    pub fn from_record(record: EntryRecord) -> Self {
        Self::new(
            record.id,
            record.transaction_id,
            record.account_id,
            record.direction,
            record.amount,
            record.currency,
            record.status,
            record.metadata,
            record.posted_at,
        )
    }
}

/// Storage form of an [`Entry`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    /// Entry ID.
    pub id: EntryId,
    /// Owning transaction.
    pub transaction_id: TransactionId,
    /// Affected account.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: Direction,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency of the amount.
    pub currency: Currency,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// When the entry was posted.
    pub posted_at: Option<DateTime<Utc>>,
}
