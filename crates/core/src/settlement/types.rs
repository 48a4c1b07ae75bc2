//! Settlement domain types.
//!
//! A settlement collects posted entries on one account (the settled account)
//! and, once posted, moves their net amount to a contra account with a single
//! balanced transaction.
//!
//! The valid transitions are:
//! - Drafting → Processing
//! - Processing → Pending (amount calculated)
//! - Processing → Drafting (rollback)
//! - Pending → Posted (settling transaction created)
//! - Pending → Drafting (rollback)
//! - Posted → Archiving
//! - Archiving → Archived

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{AccountId, Currency, LedgerId, OrganizationId, SettlementId, TransactionId};

use crate::ledger::balance::NormalBalance;
use crate::ledger::entry::{Entry, EntryInput};
use crate::ledger::error::{Conflict, InvariantViolation};
use crate::ledger::transaction::{NewTransaction, Transaction};
use crate::ledger::types::LedgerScope;

/// Settlement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Collecting entries.
    Drafting,
    /// Entries under review; membership can still change.
    Processing,
    /// Amount calculated and frozen.
    Pending,
    /// Settling transaction recorded.
    Posted,
    /// Being retired.
    Archiving,
    /// Retired. Terminal.
    Archived,
}

impl SettlementStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Drafting,
        Self::Processing,
        Self::Pending,
        Self::Posted,
        Self::Archiving,
        Self::Archived,
    ];

    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Processing => "processing",
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Statuses reachable in one step.
    #[must_use]
    pub fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Drafting => &[Self::Processing],
            Self::Processing => &[Self::Pending, Self::Drafting],
            Self::Pending => &[Self::Posted, Self::Drafting],
            Self::Posted => &[Self::Archiving],
            Self::Archiving => &[Self::Archived],
            Self::Archived => &[],
        }
    }

    /// Returns true if `target` is reachable in one step.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Returns true while linked entries may be added or removed.
    #[must_use]
    pub fn accepts_entry_changes(self) -> bool {
        matches!(self, Self::Drafting | Self::Processing)
    }

    /// Returns true if no further transition exists.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect that must be applied together with a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Only the status changes.
    StatusOnly,
    /// Recompute the amount from linked entries.
    CalculateAmount,
    /// Rollback to drafting; the amount is no longer final.
    ClearAmount,
    /// Record the settling transaction.
    PostTransaction,
}

/// Side effect carried into the repository write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionEffect {
    /// Only the status changes.
    None,
    /// Recompute the amount from linked entries in the same unit of work.
    CalculateAmount,
    /// Reset the amount.
    ClearAmount,
    /// Persist the settling transaction and link it.
    PostTransaction(Transaction),
}

/// Conditional status write.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Status the writer read. The write fails if it moved.
    pub expected: SettlementStatus,
    /// Amount the writer read. The write fails if it moved, even when the
    /// status came back to `expected` in between.
    pub expected_amount: Option<i64>,
    /// New status.
    pub target: SettlementStatus,
    /// Side effect applied atomically with the status change.
    pub effect: TransitionEffect,
    /// Time of the change.
    pub at: DateTime<Utc>,
}

/// Input for creating a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSettlement {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
    /// Account whose entries are settled.
    pub settled_account_id: AccountId,
    /// Account receiving the net amount.
    pub contra_account_id: AccountId,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Storage form of a [`Settlement`].
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRecord {
    /// Settlement ID.
    pub id: SettlementId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
    /// Account whose entries are settled.
    pub settled_account_id: AccountId,
    /// Account receiving the net amount.
    pub contra_account_id: AccountId,
    /// Lifecycle status.
    pub status: SettlementStatus,
    /// Net amount, once calculated.
    pub amount: Option<i64>,
    /// Settling transaction, once posted.
    pub transaction_id: Option<TransactionId>,
    /// Description.
    pub description: Option<String>,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A planned transfer of one account's net entries to a contra account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    id: SettlementId,
    organization_id: OrganizationId,
    ledger_id: LedgerId,
    settled_account_id: AccountId,
    contra_account_id: AccountId,
    status: SettlementStatus,
    amount: Option<i64>,
    transaction_id: Option<TransactionId>,
    description: Option<String>,
    metadata: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Settlement {
    /// Opens a settlement in `drafting`.
    ///
    /// # Errors
    ///
    /// Returns `SameSettlementAccounts` if both accounts are the same.
    pub fn open(new: &NewSettlement, now: DateTime<Utc>) -> Result<Self, InvariantViolation> {
        if new.settled_account_id == new.contra_account_id {
            return Err(InvariantViolation::SameSettlementAccounts(new.settled_account_id));
        }
        Ok(Self {
            id: SettlementId::new(),
            organization_id: new.organization_id,
            ledger_id: new.ledger_id,
            settled_account_id: new.settled_account_id,
            contra_account_id: new.contra_account_id,
            status: SettlementStatus::Drafting,
            amount: None,
            transaction_id: None,
            description: new.description.clone(),
            metadata: new.metadata.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrates a stored settlement.
    ///
    /// # Errors
    ///
    /// Returns `SameSettlementAccounts` if the stored accounts coincide.
    pub fn restore(record: SettlementRecord) -> Result<Self, InvariantViolation> {
        if record.settled_account_id == record.contra_account_id {
            return Err(InvariantViolation::SameSettlementAccounts(record.settled_account_id));
        }
        Ok(Self {
            id: record.id,
            organization_id: record.organization_id,
            ledger_id: record.ledger_id,
            settled_account_id: record.settled_account_id,
            contra_account_id: record.contra_account_id,
            status: record.status,
            amount: record.amount,
            transaction_id: record.transaction_id,
            description: record.description,
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Flattens the settlement for persistence.
    #[must_use]
    pub fn to_record(&self) -> SettlementRecord {
        SettlementRecord {
            id: self.id,
            organization_id: self.organization_id,
            ledger_id: self.ledger_id,
            settled_account_id: self.settled_account_id,
            contra_account_id: self.contra_account_id,
            status: self.status,
            amount: self.amount,
            transaction_id: self.transaction_id,
            description: self.description.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Returns a copy in `status`.
    #[must_use]
    pub fn with_status(&self, status: SettlementStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: at,
            ..self.clone()
        }
    }

    /// Returns a copy with `amount` replaced.
    #[must_use]
    pub fn with_amount(&self, amount: Option<i64>, at: DateTime<Utc>) -> Self {
        Self {
            amount,
            updated_at: at,
            ..self.clone()
        }
    }

    /// Returns a copy linked to its settling transaction.
    #[must_use]
    pub fn with_transaction(&self, transaction_id: TransactionId, at: DateTime<Utc>) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            updated_at: at,
            ..self.clone()
        }
    }

    /// Validates a transition and names its side effect.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable `InvalidTransition` conflict for pairs outside
    /// the transition table.
    pub fn plan_transition(&self, target: SettlementStatus) -> Result<TransitionPlan, Conflict> {
        if !self.status.can_transition_to(target) {
            return Err(Conflict::invalid_transition(self.status, target));
        }
        Ok(match (self.status, target) {
            (SettlementStatus::Processing, SettlementStatus::Pending) => TransitionPlan::CalculateAmount,
            (_, SettlementStatus::Drafting) => TransitionPlan::ClearAmount,
            (SettlementStatus::Pending, SettlementStatus::Posted) => TransitionPlan::PostTransaction,
            _ => TransitionPlan::StatusOnly,
        })
    }

    /// Applies a validated transition to this value.
    ///
    /// `amount` is the freshly calculated amount for `CalculateAmount`;
    /// `transaction_id` is the settling transaction for `PostTransaction`.
    #[must_use]
    pub fn transitioned(
        &self,
        target: SettlementStatus,
        plan: TransitionPlan,
        amount: Option<i64>,
        transaction_id: Option<TransactionId>,
        at: DateTime<Utc>,
    ) -> Self {
        let next = self.with_status(target, at);
        match (plan, transaction_id) {
            (TransitionPlan::CalculateAmount, _) => next.with_amount(amount, at),
            (TransitionPlan::ClearAmount, _) => next.with_amount(None, at),
            (TransitionPlan::PostTransaction, Some(id)) => next.with_transaction(id, at),
            _ => next,
        }
    }

    /// Checks that the status and amount `update` was planned from are still
    /// current, and that a settling transaction carries exactly that amount.
    ///
    /// # Errors
    ///
    /// Returns a retryable `ConcurrentModification` conflict otherwise.
    pub fn ensure_unchanged_since(&self, update: &StatusUpdate) -> Result<(), Conflict> {
        let mut unchanged = self.status == update.expected && self.amount == update.expected_amount;
        if let TransitionEffect::PostTransaction(transaction) = &update.effect {
            unchanged &= self.amount.and_then(i64::checked_abs) == Some(transaction.total_amount())
                && transaction.idempotency_key() == Some(self.idempotency_key().as_str());
        }
        if unchanged {
            Ok(())
        } else {
            Err(Conflict::concurrent_modification(format!("settlement {}", self.id)))
        }
    }

    /// Builds the settling transaction through the standard constructor.
    ///
    /// A positive amount moves value out of the settled account: it gets the
    /// entry opposite its normal balance and the contra account the other
    /// side. A negative amount swaps both directions.
    ///
    /// # Errors
    ///
    /// Returns `NonPositiveAmount` for a zero or missing amount, or any
    /// violation raised by transaction construction.
    pub fn build_transaction(
        &self,
        settled_normal: NormalBalance,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<Transaction, InvariantViolation> {
        let net = self.amount.unwrap_or(0);
        if net == 0 {
            return Err(InvariantViolation::NonPositiveAmount { amount: 0 });
        }
        let magnitude = net.checked_abs().ok_or(InvariantViolation::AmountOverflow)?;
        let outflow = settled_normal.increasing_direction().opposite();
        let settled_side = if net > 0 { outflow } else { outflow.opposite() };

        let input = NewTransaction::new(
            self.organization_id,
            self.ledger_id,
            vec![
                EntryInput::new(self.settled_account_id, settled_side.as_str(), magnitude),
                EntryInput::new(self.contra_account_id, settled_side.opposite().as_str(), magnitude),
            ],
        )
        .posted()
        .with_idempotency_key(self.idempotency_key())
        .with_description(format!("Settlement {}", self.id));

        Transaction::construct(&input, currency, now)
    }

    /// Idempotency key of the settling transaction.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("settlement:{}", self.id)
    }

    /// Settlement ID.
    #[must_use]
    pub fn id(&self) -> SettlementId {
        self.id
    }

    /// Scope of this settlement.
    #[must_use]
    pub fn scope(&self) -> LedgerScope {
        LedgerScope::new(self.organization_id, self.ledger_id)
    }

    /// Account whose entries are settled.
    #[must_use]
    pub fn settled_account_id(&self) -> AccountId {
        self.settled_account_id
    }

    /// Account receiving the net amount.
    #[must_use]
    pub fn contra_account_id(&self) -> AccountId {
        self.contra_account_id
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    /// Net amount, once calculated.
    #[must_use]
    pub fn amount(&self) -> Option<i64> {
        self.amount
    }

    /// Settling transaction, once posted.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
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
}

/// Net effect of `entries` on an account with `normal` balance.
///
/// Inflows count positive, outflows negative.
///
/// # Errors
///
/// Returns `AmountOverflow` if the sum leaves the `i64` range.
pub fn net_amount<'a>(
    normal: NormalBalance,
    entries: impl IntoIterator<Item = &'a Entry>,
) -> Result<i64, InvariantViolation> {
    entries.into_iter().try_fold(0_i64, |total, entry| {
        let signed = if normal.is_inflow(entry.direction()) {
            entry.amount()
        } else {
            -entry.amount()
        };
        total.checked_add(signed).ok_or(InvariantViolation::AmountOverflow)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{Direction, EntryStatus};
    use crate::ledger::error::ConflictKind;
    use crate::ledger::transaction::TransactionStatus;
    use rstest::rstest;

    fn settlement() -> Settlement {
        Settlement::open(
            &NewSettlement {
                organization_id: OrganizationId::new(),
                ledger_id: LedgerId::new(),
                settled_account_id: AccountId::new(),
                contra_account_id: AccountId::new(),
                description: None,
                metadata: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn usd() -> Currency {
        Currency::new("USD", 2).unwrap()
    }

    #[test]
    fn test_opens_in_drafting_without_amount() {
        let stl = settlement();
        assert_eq!(stl.status(), SettlementStatus::Drafting);
        assert_eq!(stl.amount(), None);
        assert_eq!(stl.transaction_id(), None);
    }

    #[test]
    fn test_same_accounts_rejected() {
        let account = AccountId::new();
        let new = NewSettlement {
            organization_id: OrganizationId::new(),
            ledger_id: LedgerId::new(),
            settled_account_id: account,
            contra_account_id: account,
            description: None,
            metadata: None,
        };
        assert_eq!(
            Settlement::open(&new, Utc::now()),
            Err(InvariantViolation::SameSettlementAccounts(account))
        );
    }

    #[rstest]
    #[case(SettlementStatus::Drafting, SettlementStatus::Processing, TransitionPlan::StatusOnly)]
    #[case(SettlementStatus::Processing, SettlementStatus::Pending, TransitionPlan::CalculateAmount)]
    #[case(SettlementStatus::Processing, SettlementStatus::Drafting, TransitionPlan::ClearAmount)]
    #[case(SettlementStatus::Pending, SettlementStatus::Posted, TransitionPlan::PostTransaction)]
    #[case(SettlementStatus::Pending, SettlementStatus::Drafting, TransitionPlan::ClearAmount)]
    #[case(SettlementStatus::Posted, SettlementStatus::Archiving, TransitionPlan::StatusOnly)]
    #[case(SettlementStatus::Archiving, SettlementStatus::Archived, TransitionPlan::StatusOnly)]
    fn test_allowed_transitions(
        #[case] from: SettlementStatus,
        #[case] to: SettlementStatus,
        #[case] plan: TransitionPlan,
    ) {
        let stl = settlement().with_status(from, Utc::now());
        assert_eq!(stl.plan_transition(to), Ok(plan));
    }

    #[test]
    fn test_drafting_to_posted_rejected() {
        let err = settlement()
            .plan_transition(SettlementStatus::Posted)
            .unwrap_err();
        assert_eq!(err.kind, ConflictKind::InvalidTransition);
        assert!(!err.retryable);
        assert!(err.message.contains("drafting"));
        assert!(err.message.contains("posted"));
    }

    #[test]
    fn test_archived_is_terminal() {
        assert!(SettlementStatus::Archived.is_terminal());
        for target in SettlementStatus::ALL {
            assert!(!SettlementStatus::Archived.can_transition_to(target));
        }
    }

    #[rstest]
    #[case(SettlementStatus::Drafting, true)]
    #[case(SettlementStatus::Processing, true)]
    #[case(SettlementStatus::Pending, false)]
    #[case(SettlementStatus::Posted, false)]
    #[case(SettlementStatus::Archiving, false)]
    #[case(SettlementStatus::Archived, false)]
    fn test_entry_changes_window(#[case] status: SettlementStatus, #[case] open: bool) {
        assert_eq!(status.accepts_entry_changes(), open);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in SettlementStatus::ALL {
            assert_eq!(SettlementStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SettlementStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_transitioned_applies_plan() {
        let now = Utc::now();
        let processing = settlement().with_status(SettlementStatus::Processing, now);

        let pending = processing.transitioned(
            SettlementStatus::Pending,
            TransitionPlan::CalculateAmount,
            Some(1_500),
            None,
            now,
        );
        assert_eq!(pending.amount(), Some(1_500));

        let rolled_back = pending.transitioned(
            SettlementStatus::Drafting,
            TransitionPlan::ClearAmount,
            None,
            None,
            now,
        );
        assert_eq!(rolled_back.status(), SettlementStatus::Drafting);
        assert_eq!(rolled_back.amount(), None);
        assert_eq!(processing.amount(), None);
    }

    #[rstest]
    #[case(NormalBalance::Debit, 1_000, Direction::Credit)]
    #[case(NormalBalance::Debit, -1_000, Direction::Debit)]
    #[case(NormalBalance::Credit, 1_000, Direction::Debit)]
    #[case(NormalBalance::Credit, -1_000, Direction::Credit)]
    fn test_build_transaction_directions(
        #[case] normal: NormalBalance,
        #[case] net: i64,
        #[case] settled_side: Direction,
    ) {
        let now = Utc::now();
        let stl = settlement().with_amount(Some(net), now);

        let txn = stl.build_transaction(normal, &usd(), now).unwrap();

        assert_eq!(txn.status(), TransactionStatus::Posted);
        assert_eq!(txn.total_amount(), 1_000);
        assert_eq!(txn.idempotency_key(), Some(stl.idempotency_key().as_str()));
        let settled = txn
            .entries()
            .iter()
            .find(|e| e.account_id() == stl.settled_account_id())
            .unwrap();
        let contra = txn
            .entries()
            .iter()
            .find(|e| e.account_id() == stl.contra_account_id())
            .unwrap();
        assert_eq!(settled.direction(), settled_side);
        assert_eq!(contra.direction(), settled_side.opposite());
        assert!(txn.entries().iter().all(|e| e.status() == EntryStatus::Posted));
    }

    #[test]
    fn test_build_transaction_rejects_zero() {
        let now = Utc::now();
        let stl = settlement().with_amount(Some(0), now);
        assert_eq!(
            stl.build_transaction(NormalBalance::Debit, &usd(), now),
            Err(InvariantViolation::NonPositiveAmount { amount: 0 })
        );
    }

    #[test]
    fn test_stale_settling_transaction_rejected() {
        let now = Utc::now();
        let pending = settlement()
            .with_status(SettlementStatus::Pending, now)
            .with_amount(Some(1_000), now);
        let planned = |from: &Settlement| StatusUpdate {
            expected: from.status(),
            expected_amount: from.amount(),
            target: SettlementStatus::Posted,
            effect: TransitionEffect::PostTransaction(
                from.build_transaction(NormalBalance::Credit, &usd(), now).unwrap(),
            ),
            at: now,
        };
        let stale = planned(&pending);
        assert_eq!(pending.ensure_unchanged_since(&stale), Ok(()));

        // Rolled back, relinked and recalculated: same status, new amount.
        let recalculated = pending.with_amount(Some(3_000), now);
        let err = recalculated.ensure_unchanged_since(&stale).unwrap_err();
        assert_eq!(err.kind, ConflictKind::ConcurrentModification);
        assert!(err.retryable);

        // Matching read, but the carried transaction settles another amount.
        let mismatched = StatusUpdate {
            expected_amount: Some(3_000),
            ..stale
        };
        assert!(recalculated.ensure_unchanged_since(&mismatched).is_err());
        assert_eq!(recalculated.ensure_unchanged_since(&planned(&recalculated)), Ok(()));
    }
}
