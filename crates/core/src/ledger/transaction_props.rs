//! Property-based tests for transaction construction and posting.

use chrono::Utc;
use proptest::prelude::*;
use tally_shared::types::{AccountId, Currency, LedgerId, OrganizationId};

use super::entry::{EntryInput, EntryStatus};
use super::error::InvariantViolation;
use super::transaction::{NewTransaction, Transaction, TransactionStatus};

fn usd() -> Currency {
    Currency::new("USD", 2).unwrap()
}

/// Amounts small enough that a dozen of them cannot overflow.
fn arb_amount() -> impl Strategy<Value = i64> {
    1_i64..1_000_000_000
}

/// A balanced entry set: the debit legs sum to the single credit leg.
fn arb_balanced_entries() -> impl Strategy<Value = Vec<EntryInput>> {
    prop::collection::vec(arb_amount(), 1..8).prop_map(|debits| {
        let total: i64 = debits.iter().sum();
        let mut entries: Vec<EntryInput> = debits
            .into_iter()
            .map(|amount| EntryInput::debit(AccountId::new(), amount))
            .collect();
        entries.push(EntryInput::credit(AccountId::new(), total));
        entries
    })
}

fn new_transaction(entries: Vec<EntryInput>) -> NewTransaction {
    NewTransaction::new(OrganizationId::new(), LedgerId::new(), entries)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every constructed transaction nets to zero and reports the debit total.
    #[test]
    fn prop_constructed_transactions_balance(entries in arb_balanced_entries()) {
        let expected: i64 = entries
            .iter()
            .filter(|e| e.direction == "debit")
            .map(|e| e.amount)
            .sum();

        let txn = Transaction::construct(&new_transaction(entries), &usd(), Utc::now()).unwrap();

        let net: i64 = txn.entries().iter().map(|e| e.signed_amount()).sum();
        prop_assert_eq!(net, 0);
        prop_assert_eq!(txn.total_amount(), expected);
        prop_assert!(txn.entries().iter().all(|e| e.transaction_id() == txn.id()));
    }

    /// Shifting one leg by any non-zero delta breaks the balance.
    #[test]
    fn prop_skewed_entries_rejected(
        entries in arb_balanced_entries(),
        delta in 1_i64..1_000,
    ) {
        let mut entries = entries;
        let last = entries.len() - 1;
        entries[last].amount += delta;

        let result = Transaction::construct(&new_transaction(entries), &usd(), Utc::now());

        let is_unbalanced = matches!(result, Err(InvariantViolation::UnbalancedEntries { .. }));
        prop_assert!(is_unbalanced);
    }

    /// Posting twice yields the same value as posting once, and the source
    /// value is never modified.
    #[test]
    fn prop_post_is_idempotent(entries in arb_balanced_entries()) {
        let pending = Transaction::construct(&new_transaction(entries), &usd(), Utc::now()).unwrap();
        let before = pending.clone();

        let once = pending.post(Utc::now()).unwrap();
        let twice = once.post(Utc::now()).unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.status(), TransactionStatus::Posted);
        prop_assert!(once.entries().iter().all(|e| e.status() == EntryStatus::Posted));
        prop_assert_eq!(&pending, &before);
        prop_assert_eq!(pending.status(), TransactionStatus::Pending);
    }

    /// An archived transaction never posts.
    #[test]
    fn prop_archived_never_posts(entries in arb_balanced_entries()) {
        let txn = Transaction::construct(&new_transaction(entries), &usd(), Utc::now())
            .unwrap()
            .archive(Utc::now());

        prop_assert!(txn.post(Utc::now()).is_err());
    }
}
