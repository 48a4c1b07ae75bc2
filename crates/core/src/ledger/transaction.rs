//! Transaction aggregate.
//!
//! A transaction is the single point where double-entry invariants are
//! enforced. It can only be obtained through [`Transaction::construct`] (new
//! input) or [`Transaction::restore`] (rehydration from storage), and both run
//! the same checks. Once built, the entry collection is frozen.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{AccountId, Currency, EntryId, LedgerId, Money, OrganizationId, TransactionId};

use super::entry::{Direction, Entry, EntryInput, EntryRecord, EntryStatus};
use super::error::{Conflict, InvariantViolation};
use super::types::LedgerScope;

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Recorded, balances held but not settled.
    Pending,
    /// Posted to the ledger.
    Posted,
    /// Retired; can no longer be posted or edited.
    Archived,
}

impl TransactionStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Archived => "archived",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "posted" => Some(Self::Posted),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether posted transactions may be deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Only pending transactions can be deleted.
    #[default]
    Production,
    /// Any transaction can be deleted. Test and sandbox environments only.
    Sandbox,
}

impl DeletionPolicy {
    /// Maps the `sandbox_mode` configuration flag to a policy.
    #[must_use]
    pub const fn from_sandbox_mode(sandbox_mode: bool) -> Self {
        if sandbox_mode {
            Self::Sandbox
        } else {
            Self::Production
        }
    }
}

/// Input for creating a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger the transaction is recorded in.
    pub ledger_id: LedgerId,
    /// Entries in caller order.
    pub entries: Vec<EntryInput>,
    /// Free-form description.
    pub description: Option<String>,
    /// Business date of the transaction; defaults to creation time.
    pub effective_at: Option<DateTime<Utc>>,
    /// Deduplication key, unique per ledger.
    pub idempotency_key: Option<String>,
    /// Opaque caller metadata.
    pub metadata: Option<Value>,
    /// Initial status: pending (default) or posted.
    pub status: EntryStatus,
}

impl NewTransaction {
    /// A pending transaction with no optional fields set.
    #[must_use]
    pub fn new(organization_id: OrganizationId, ledger_id: LedgerId, entries: Vec<EntryInput>) -> Self {
        Self {
            organization_id,
            ledger_id,
            entries,
            description: None,
            effective_at: None,
            idempotency_key: None,
            metadata: None,
            status: EntryStatus::Pending,
        }
    }

    /// Creates the transaction directly in `posted` state.
    #[must_use]
    pub fn posted(mut self) -> Self {
        self.status = EntryStatus::Posted;
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Editable fields of a pending transaction. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    /// Replacement description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Storage form of a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// Transaction ID.
    pub id: TransactionId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
    /// Ledger currency.
    pub currency: Currency,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Entries in creation order.
    pub entries: Vec<EntryRecord>,
    /// Description.
    pub description: Option<String>,
    /// Business date.
    pub effective_at: DateTime<Utc>,
    /// Deduplication key.
    pub idempotency_key: Option<String>,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Posting time.
    pub posted_at: Option<DateTime<Utc>>,
    /// Archival time.
    pub archived_at: Option<DateTime<Utc>>,
}

/// A balanced, immutable set of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: TransactionId,
    organization_id: OrganizationId,
    ledger_id: LedgerId,
    currency: Currency,
    status: TransactionStatus,
    entries: Arc<[Entry]>,
    amount: i64,
    description: Option<String>,
    effective_at: DateTime<Utc>,
    idempotency_key: Option<String>,
    metadata: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
}

struct Line {
    account_id: AccountId,
    direction: Direction,
    amount: i64,
}

fn check_count(count: usize) -> Result<(), InvariantViolation> {
    if count < 2 {
        return Err(InvariantViolation::InsufficientEntries { count });
    }
    Ok(())
}

fn check_amount(amount: i64) -> Result<(), InvariantViolation> {
    if amount <= 0 {
        return Err(InvariantViolation::NonPositiveAmount { amount });
    }
    Ok(())
}

fn check_currency(found: &str, expected: &Currency) -> Result<(), InvariantViolation> {
    if found != expected.code() {
        return Err(InvariantViolation::CurrencyMismatch {
            expected: expected.code().to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Checks distinct accounts and balance, returning the debit total.
fn check_balanced(lines: &[Line], currency: &Currency) -> Result<i64, InvariantViolation> {
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.account_id) {
            return Err(InvariantViolation::DuplicateAccountInTransaction(line.account_id));
        }
    }

    let mut debits = Money::zero(currency.clone());
    let mut credits = Money::zero(currency.clone());
    for line in lines {
        let total = match line.direction {
            Direction::Debit => &mut debits,
            Direction::Credit => &mut credits,
        };
        *total = total
            .checked_add(&Money::new(line.amount, currency.clone()))
            .map_err(|_| InvariantViolation::AmountOverflow)?;
    }

    if debits != credits {
        return Err(InvariantViolation::UnbalancedEntries {
            debits: debits.minor_units(),
            credits: credits.minor_units(),
        });
    }
    Ok(debits.minor_units())
}

/// Stored entry statuses must agree with the transaction status.
fn check_statuses(status: TransactionStatus, entries: &[EntryRecord]) -> Result<(), InvariantViolation> {
    let consistent = match status {
        TransactionStatus::Pending => entries.iter().all(|e| e.status == EntryStatus::Pending),
        TransactionStatus::Posted => entries.iter().all(|e| e.status == EntryStatus::Posted),
        TransactionStatus::Archived => entries.windows(2).all(|pair| pair[0].status == pair[1].status),
    };
    if consistent {
        Ok(())
    } else {
        Err(InvariantViolation::InvalidStoredValue(format!(
            "{status} transaction has entries in mixed or mismatching status"
        )))
    }
}

impl Transaction {
    /// Validates `input` and builds a new transaction in the ledger currency.
    ///
    /// Checks run in order: entry count, then each entry's direction, amount
    /// and currency, then account uniqueness, then balance.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found. Nothing is built on
    /// failure.
    pub fn construct(
        input: &NewTransaction,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<Self, InvariantViolation> {
        check_count(input.entries.len())?;

        let mut lines = Vec::with_capacity(input.entries.len());
        for entry in &input.entries {
            let direction = entry.direction.parse::<Direction>()?;
            check_amount(entry.amount)?;
            if let Some(code) = &entry.currency {
                check_currency(code, currency)?;
            }
            lines.push(Line {
                account_id: entry.account_id,
                direction,
                amount: entry.amount,
            });
        }
        let amount = check_balanced(&lines, currency)?;

        let id = TransactionId::new();
        let posted_at = (input.status == EntryStatus::Posted).then_some(now);
        let entries: Arc<[Entry]> = lines
            .into_iter()
            .zip(&input.entries)
            .map(|(line, raw)| {
                Entry::new(
                    EntryId::new(),
                    id,
                    line.account_id,
                    line.direction,
                    line.amount,
                    currency.clone(),
                    input.status,
                    raw.metadata.clone(),
                    posted_at,
                )
            })
            .collect();

        let status = match input.status {
            EntryStatus::Pending => TransactionStatus::Pending,
            EntryStatus::Posted => TransactionStatus::Posted,
        };

        Ok(Self {
            id,
            organization_id: input.organization_id,
            ledger_id: input.ledger_id,
            currency: currency.clone(),
            status,
            entries,
            amount,
            description: input.description.clone(),
            effective_at: input.effective_at.unwrap_or(now),
            idempotency_key: input.idempotency_key.clone(),
            metadata: input.metadata.clone(),
            created_at: now,
            updated_at: now,
            posted_at,
            archived_at: None,
        })
    }

    /// Rehydrates a stored transaction, re-running every invariant.
    ///
    /// # Errors
    ///
    /// Returns an [`InvariantViolation`] if the stored data is not a valid
    /// transaction.
    pub fn restore(record: TransactionRecord) -> Result<Self, InvariantViolation> {
        check_count(record.entries.len())?;

        let mut lines = Vec::with_capacity(record.entries.len());
        for entry in &record.entries {
            check_amount(entry.amount)?;
            check_currency(entry.currency.code(), &record.currency)?;
            if entry.transaction_id != record.id {
                return Err(InvariantViolation::InvalidStoredValue(format!(
                    "entry {} belongs to transaction {}, not {}",
                    entry.id, entry.transaction_id, record.id
                )));
            }
            lines.push(Line {
                account_id: entry.account_id,
                direction: entry.direction,
                amount: entry.amount,
            });
        }
        let amount = check_balanced(&lines, &record.currency)?;
        check_statuses(record.status, &record.entries)?;

        Ok(Self {
            id: record.id,
            organization_id: record.organization_id,
            ledger_id: record.ledger_id,
            currency: record.currency,
            status: record.status,
            entries: record.entries.into_iter().map(Entry::from_record).collect(),
            amount,
            description: record.description,
            effective_at: record.effective_at,
            idempotency_key: record.idempotency_key,
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
            posted_at: record.posted_at,
            archived_at: record.archived_at,
        })
    }

    /// Returns a posted copy where every entry shares the timestamp `at`.
    ///
    /// Posting a posted transaction returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable conflict if the transaction is archived.
    pub fn post(&self, at: DateTime<Utc>) -> Result<Self, Conflict> {
        match self.status {
            TransactionStatus::Posted => Ok(self.clone()),
            TransactionStatus::Archived => Err(Conflict::archived_transaction(self.id)),
            TransactionStatus::Pending => Ok(Self {
                status: TransactionStatus::Posted,
                entries: self
                    .entries
                    .iter()
                    .map(|entry| entry.with_posted_status(at))
                    .collect(),
                updated_at: at,
                posted_at: Some(at),
                ..self.clone()
            }),
        }
    }

    /// Returns an archived copy. Archiving twice is a no-op.
    #[must_use]
    pub fn archive(&self, at: DateTime<Utc>) -> Self {
        if self.status == TransactionStatus::Archived {
            return self.clone();
        }
        Self {
            status: TransactionStatus::Archived,
            updated_at: at,
            archived_at: Some(at),
            ..self.clone()
        }
    }

    /// Returns a copy with description and metadata replaced.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable conflict unless the transaction is pending.
    pub fn with_details(&self, update: &TransactionUpdate, at: DateTime<Utc>) -> Result<Self, Conflict> {
        if self.status != TransactionStatus::Pending {
            return Err(Conflict::transaction_not_pending(self.id, self.status));
        }
        Ok(Self {
            description: update.description.clone().or_else(|| self.description.clone()),
            metadata: update.metadata.clone().or_else(|| self.metadata.clone()),
            updated_at: at,
            ..self.clone()
        })
    }

    /// Checks whether the transaction may be deleted under `policy`.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable conflict for non-pending transactions outside
    /// the sandbox.
    pub fn ensure_deletable(&self, policy: DeletionPolicy) -> Result<(), Conflict> {
        match (self.status, policy) {
            (TransactionStatus::Pending, _) | (_, DeletionPolicy::Sandbox) => Ok(()),
            _ => Err(Conflict::posted_transaction_deletion(self.id)),
        }
    }

    /// Transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Owning organization.
    #[must_use]
    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    /// Ledger.
    #[must_use]
    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    /// Scope of this transaction.
    #[must_use]
    pub fn scope(&self) -> LedgerScope {
        LedgerScope::new(self.organization_id, self.ledger_id)
    }

    /// Ledger currency.
    #[must_use]
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Entries in creation order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Looks up an entry by ID.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    /// Sum of debit amounts (equal to the sum of credits).
    #[must_use]
    pub fn total_amount(&self) -> i64 {
        self.amount
    }

    /// Sum of debits in the transaction currency.
    #[must_use]
    pub fn total(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Business date.
    #[must_use]
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.effective_at
    }

    /// Deduplication key.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Caller metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last modification time.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Posting time.
    #[must_use]
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }

    /// Archival time.
    #[must_use]
    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    /// Serializable projection for callers.
    #[must_use]
    pub fn to_response(&self) -> TransactionResponse {
        TransactionResponse {
            id: self.id,
            organization_id: self.organization_id,
            ledger_id: self.ledger_id,
            status: self.status,
            amount: self.amount,
            display_amount: self.total().to_string(),
            currency: self.currency.code().to_string(),
            currency_exponent: self.currency.exponent(),
            description: self.description.clone(),
            effective_at: self.effective_at,
            idempotency_key: self.idempotency_key.clone(),
            metadata: self.metadata.clone(),
            entries: self
                .entries
                .iter()
                .map(|entry| EntryResponse {
                    id: entry.id(),
                    account_id: entry.account_id(),
                    direction: entry.direction(),
                    amount: entry.amount(),
                    status: entry.status(),
                    metadata: entry.metadata().cloned(),
                    posted_at: entry.posted_at(),
                })
                .collect(),
            created_at: self.created_at,
            posted_at: self.posted_at,
        }
    }

    /// Flattens the transaction for persistence.
    #[must_use]
    pub fn to_record(&self) -> TransactionRecord {
        TransactionRecord {
            id: self.id,
            organization_id: self.organization_id,
            ledger_id: self.ledger_id,
            currency: self.currency.clone(),
            status: self.status,
            entries: self.entries.iter().map(Entry::to_record).collect(),
            description: self.description.clone(),
            effective_at: self.effective_at,
            idempotency_key: self.idempotency_key.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            posted_at: self.posted_at,
            archived_at: self.archived_at,
        }
    }
}

/// JSON-facing view of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: TransactionId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Sum of debits in minor units.
    pub amount: i64,
    /// Sum of debits in major units with the currency code, e.g. `12.34 USD`.
    pub display_amount: String,
    /// Currency code.
    pub currency: String,
    /// Currency exponent.
    pub currency_exponent: u8,
    /// Description.
    pub description: Option<String>,
    /// Business date.
    pub effective_at: DateTime<Utc>,
    /// Deduplication key.
    pub idempotency_key: Option<String>,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// Entries.
    pub entries: Vec<EntryResponse>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Posting time.
    pub posted_at: Option<DateTime<Utc>>,
}

/// JSON-facing view of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: EntryId,
    /// Affected account.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: Direction,
    /// Amount in minor units.
    pub amount: i64,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// Posting time.
    pub posted_at: Option<DateTime<Utc>>,
}
