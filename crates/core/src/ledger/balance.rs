//! Account balances.
//!
//! Every account keeps three balance views:
//! - `pending`: everything recorded, posted or not
//! - `posted`: only posted entries
//! - `available`: what can be spent. Outflows are held as soon as they are
//!   recorded, inflows only count once posted.
//!
//! Each view tracks raw debit/credit accumulators; `amount` is derived from
//! the account's normal balance:
//! - debit-normal: `debits - credits`
//! - credit-normal: `credits - debits`

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{AccountId, LedgerId, OrganizationId};

use super::entry::{Direction, Entry, EntryStatus};
use super::error::{EntityKind, InvariantViolation, LedgerError};
use super::types::LedgerScope;

/// The side that increases an account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalBalance {
    /// Assets and expenses.
    Debit,
    /// Liabilities, equity and revenue.
    Credit,
}

impl NormalBalance {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// The entry direction that increases this balance.
    #[must_use]
    pub fn increasing_direction(self) -> Direction {
        match self {
            Self::Debit => Direction::Debit,
            Self::Credit => Direction::Credit,
        }
    }

    /// True when an entry in `direction` adds to the balance.
    #[must_use]
    pub fn is_inflow(self, direction: Direction) -> bool {
        self.increasing_direction() == direction
    }

    /// Derives the signed balance from the raw accumulators.
    #[must_use]
    pub fn amount(self, debits: i64, credits: i64) -> Option<i64> {
        match self {
            Self::Debit => debits.checked_sub(credits),
            Self::Credit => credits.checked_sub(debits),
        }
    }
}

impl fmt::Display for NormalBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalBalance {
    type Err = InvariantViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(InvariantViolation::InvalidNormalBalance(other.to_string())),
        }
    }
}

/// One balance bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    /// Signed balance per the account's normal balance.
    pub amount: i64,
    /// Sum of credit amounts.
    pub credits: i64,
    /// Sum of debit amounts.
    pub debits: i64,
}

impl BalanceView {
    /// Adds an entry to the matching accumulator.
    ///
    /// # Errors
    ///
    /// Returns `AmountOverflow` if an accumulator leaves the `i64` range.
    pub fn apply(self, normal: NormalBalance, direction: Direction, amount: i64) -> Result<Self, InvariantViolation> {
        self.shift(normal, direction, amount)
    }

    /// Removes a previously applied entry.
    ///
    /// # Errors
    ///
    /// Returns `AmountOverflow` if an accumulator leaves the `i64` range.
    pub fn revert(self, normal: NormalBalance, direction: Direction, amount: i64) -> Result<Self, InvariantViolation> {
        let negated = amount.checked_neg().ok_or(InvariantViolation::AmountOverflow)?;
        self.shift(normal, direction, negated)
    }

    fn shift(self, normal: NormalBalance, direction: Direction, delta: i64) -> Result<Self, InvariantViolation> {
        let (mut debits, mut credits) = (self.debits, self.credits);
        match direction {
            Direction::Debit => {
                debits = debits.checked_add(delta).ok_or(InvariantViolation::AmountOverflow)?;
            }
            Direction::Credit => {
                credits = credits.checked_add(delta).ok_or(InvariantViolation::AmountOverflow)?;
            }
        }
        let amount = normal
            .amount(debits, credits)
            .ok_or(InvariantViolation::AmountOverflow)?;
        Ok(Self {
            amount,
            credits,
            debits,
        })
    }
}

/// A lifecycle step of an entry that moves balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEvent {
    /// Entry recorded with the given initial status.
    Created(EntryStatus),
    /// Pending entry posted.
    Posted,
    /// Entry removed while in the given status.
    Reversed(EntryStatus),
}

#[derive(Debug, Clone, Copy)]
struct Buckets {
    pending: bool,
    posted: bool,
    available: bool,
}

impl BalanceEvent {
    fn buckets(self, inflow: bool) -> Buckets {
        match self {
            Self::Created(EntryStatus::Pending) | Self::Reversed(EntryStatus::Pending) => Buckets {
                pending: true,
                posted: false,
                available: !inflow,
            },
            Self::Posted => Buckets {
                pending: false,
                posted: true,
                available: inflow,
            },
            Self::Created(EntryStatus::Posted) | Self::Reversed(EntryStatus::Posted) => Buckets {
                pending: true,
                posted: true,
                available: true,
            },
        }
    }

    fn is_reversal(self) -> bool {
        matches!(self, Self::Reversed(_))
    }
}

/// Input for opening an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger the account lives in.
    pub ledger_id: LedgerId,
    /// Display name.
    pub name: String,
    /// `"debit"` or `"credit"`.
    pub normal_balance: String,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// An account with its balance views.
///
/// Balance changes produce new values; the stored `lock_version` is bumped by
/// the repository when the new value is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID.
    pub id: AccountId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
    /// Display name.
    pub name: String,
    /// Balance sign convention.
    pub normal_balance: NormalBalance,
    /// All recorded entries.
    pub pending: BalanceView,
    /// Posted entries only.
    pub posted: BalanceView,
    /// Spendable balance.
    pub available: BalanceView,
    /// Optimistic concurrency version.
    pub lock_version: i64,
    /// Opaque caller metadata.
    pub metadata: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last balance change.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens an account with zero balances at version 0.
    ///
    /// # Errors
    ///
    /// Returns `InvalidNormalBalance` for anything but `debit`/`credit`.
    pub fn open(new: &NewAccount, now: DateTime<Utc>) -> Result<Self, InvariantViolation> {
        let normal_balance = new.normal_balance.parse::<NormalBalance>()?;
        Ok(Self {
            id: AccountId::new(),
            organization_id: new.organization_id,
            ledger_id: new.ledger_id,
            name: new.name.clone(),
            normal_balance,
            pending: BalanceView::default(),
            posted: BalanceView::default(),
            available: BalanceView::default(),
            lock_version: 0,
            metadata: new.metadata.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns a copy with the effect of one entry event applied.
    ///
    /// # Errors
    ///
    /// Returns `AmountOverflow` if a balance leaves the `i64` range.
    pub fn apply(
        &self,
        direction: Direction,
        amount: i64,
        event: BalanceEvent,
        at: DateTime<Utc>,
    ) -> Result<Self, InvariantViolation> {
        let normal = self.normal_balance;
        let buckets = event.buckets(normal.is_inflow(direction));
        let step = |view: BalanceView, touched: bool| {
            if !touched {
                Ok(view)
            } else if event.is_reversal() {
                view.revert(normal, direction, amount)
            } else {
                view.apply(normal, direction, amount)
            }
        };

        Ok(Self {
            pending: step(self.pending, buckets.pending)?,
            posted: step(self.posted, buckets.posted)?,
            available: step(self.available, buckets.available)?,
            updated_at: at,
            ..self.clone()
        })
    }

    /// Scope of this account.
    #[must_use]
    pub const fn scope(&self) -> LedgerScope {
        LedgerScope::new(self.organization_id, self.ledger_id)
    }

    /// Applies `event` for `entry`.
    ///
    /// # Errors
    ///
    /// Returns `AmountOverflow` if a balance leaves the `i64` range.
    pub fn apply_entry(&self, entry: &Entry, event: BalanceEvent, at: DateTime<Utc>) -> Result<Self, InvariantViolation> {
        self.apply(entry.direction(), entry.amount(), event, at)
    }
}

/// Applies one event per entry to the snapshot accounts.
///
/// Returns the changed accounts in the order they were first touched. The
/// snapshot is left untouched, so callers can still compare against the
/// versions they read.
///
/// # Errors
///
/// Returns `NotFound` when an entry references an account missing from the
/// snapshot, or an overflow violation.
pub fn apply_entries<'a>(
    snapshot: &HashMap<AccountId, Account>,
    changes: impl IntoIterator<Item = (&'a Entry, BalanceEvent)>,
    at: DateTime<Utc>,
) -> Result<Vec<Account>, LedgerError> {
    let mut updated: Vec<Account> = Vec::new();
    for (entry, event) in changes {
        let account_id = entry.account_id();
        match updated.iter_mut().find(|account| account.id == account_id) {
            Some(account) => *account = account.apply_entry(entry, event, at)?,
            None => {
                let current = snapshot
                    .get(&account_id)
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
                updated.push(current.apply_entry(entry, event, at)?);
            }
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn account(normal: &str) -> Account {
        Account::open(
            &NewAccount {
                organization_id: OrganizationId::new(),
                ledger_id: LedgerId::new(),
                name: "Cash".to_string(),
                normal_balance: normal.to_string(),
                metadata: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_rejects_unknown_normal_balance() {
        let new = NewAccount {
            organization_id: OrganizationId::new(),
            ledger_id: LedgerId::new(),
            name: "Cash".to_string(),
            normal_balance: "asset".to_string(),
            metadata: None,
        };
        assert_eq!(
            Account::open(&new, Utc::now()),
            Err(InvariantViolation::InvalidNormalBalance("asset".to_string()))
        );
    }

    #[rstest]
    #[case(NormalBalance::Debit, 300, 100, 200)]
    #[case(NormalBalance::Credit, 300, 100, -200)]
    fn test_normal_balance_sign(#[case] normal: NormalBalance, #[case] debits: i64, #[case] credits: i64, #[case] expected: i64) {
        assert_eq!(normal.amount(debits, credits), Some(expected));
    }

    #[test]
    fn test_pending_inflow_not_available() {
        let cash = account("debit");
        let now = Utc::now();

        let after = cash
            .apply(Direction::Debit, 1_000, BalanceEvent::Created(EntryStatus::Pending), now)
            .unwrap();

        assert_eq!(after.pending.amount, 1_000);
        assert_eq!(after.pending.debits, 1_000);
        assert_eq!(after.posted, BalanceView::default());
        assert_eq!(after.available, BalanceView::default());
        assert_eq!(after.lock_version, cash.lock_version);
    }

    #[test]
    fn test_pending_outflow_held_from_available() {
        let cash = account("debit");
        let after = cash
            .apply(Direction::Credit, 400, BalanceEvent::Created(EntryStatus::Pending), Utc::now())
            .unwrap();

        assert_eq!(after.pending.amount, -400);
        assert_eq!(after.available.amount, -400);
        assert_eq!(after.posted.amount, 0);
    }

    #[test]
    fn test_posting_completes_each_bucket_once() {
        let now = Utc::now();
        for direction in [Direction::Debit, Direction::Credit] {
            let cash = account("debit");
            let staged = cash
                .apply(direction, 250, BalanceEvent::Created(EntryStatus::Pending), now)
                .unwrap()
                .apply(direction, 250, BalanceEvent::Posted, now)
                .unwrap();
            let direct = cash
                .apply(direction, 250, BalanceEvent::Created(EntryStatus::Posted), now)
                .unwrap();

            assert_eq!(staged.pending, direct.pending);
            assert_eq!(staged.posted, direct.posted);
            assert_eq!(staged.available, direct.available);
        }
    }

    #[rstest]
    #[case(EntryStatus::Pending)]
    #[case(EntryStatus::Posted)]
    fn test_reversal_restores_zero(#[case] status: EntryStatus) {
        let revenue = account("credit");
        let now = Utc::now();
        let restored = revenue
            .apply(Direction::Credit, 900, BalanceEvent::Created(status), now)
            .unwrap()
            .apply(Direction::Credit, 900, BalanceEvent::Reversed(status), now)
            .unwrap();

        assert_eq!(restored.pending, BalanceView::default());
        assert_eq!(restored.posted, BalanceView::default());
        assert_eq!(restored.available, BalanceView::default());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let cash = account("debit");
        let now = Utc::now();
        let full = cash
            .apply(Direction::Debit, i64::MAX, BalanceEvent::Created(EntryStatus::Pending), now)
            .unwrap();
        assert_eq!(
            full.apply(Direction::Debit, 1, BalanceEvent::Created(EntryStatus::Pending), now),
            Err(InvariantViolation::AmountOverflow)
        );
    }
}
