//! Property-based tests for the settlement transition table.

use chrono::Utc;
use proptest::prelude::*;
use tally_shared::types::{AccountId, LedgerId, OrganizationId};

use super::types::{NewSettlement, Settlement, SettlementStatus, TransitionPlan};
use crate::ledger::error::ConflictKind;

fn arb_status() -> impl Strategy<Value = SettlementStatus> {
    prop::sample::select(SettlementStatus::ALL.to_vec())
}

fn settlement_in(status: SettlementStatus) -> Settlement {
    let now = Utc::now();
    Settlement::open(
        &NewSettlement {
            organization_id: OrganizationId::new(),
            ledger_id: LedgerId::new(),
            settled_account_id: AccountId::new(),
            contra_account_id: AccountId::new(),
            description: None,
            metadata: None,
        },
        now,
    )
    .unwrap()
    .with_status(status, now)
}

fn allowed(from: SettlementStatus, to: SettlementStatus) -> bool {
    use SettlementStatus::{Archived, Archiving, Drafting, Pending, Posted, Processing};
    matches!(
        (from, to),
        (Drafting, Processing)
            | (Processing, Pending | Drafting)
            | (Pending, Posted | Drafting)
            | (Posted, Archiving)
            | (Archiving, Archived)
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A transition is planned exactly when the pair is in the table; every
    /// other pair is a non-retryable invalid transition.
    #[test]
    fn prop_transition_table(from in arb_status(), to in arb_status()) {
        let result = settlement_in(from).plan_transition(to);

        if allowed(from, to) {
            prop_assert!(result.is_ok());
        } else {
            let err = result.unwrap_err();
            prop_assert_eq!(err.kind, ConflictKind::InvalidTransition);
            prop_assert!(!err.retryable);
        }
    }

    /// Applying a planned transition lands on the target, and only a rollback
    /// to drafting clears the amount.
    #[test]
    fn prop_transitioned_reaches_target(
        from in arb_status(),
        to in arb_status(),
        amount in -1_000_000_i64..1_000_000,
    ) {
        let now = Utc::now();
        let current = settlement_in(from).with_amount(Some(amount), now);
        if let Ok(plan) = current.plan_transition(to) {
            let next = current.transitioned(to, plan, Some(amount), None, now);

            prop_assert_eq!(next.status(), to);
            let expected = if plan == TransitionPlan::ClearAmount { None } else { Some(amount) };
            prop_assert_eq!(next.amount(), expected);
        }
    }

    /// Nothing leaves the terminal status.
    #[test]
    fn prop_archived_is_terminal(to in arb_status()) {
        prop_assert!(settlement_in(SettlementStatus::Archived).plan_transition(to).is_err());
    }
}
