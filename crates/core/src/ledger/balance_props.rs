//! Property-based tests for balance bucket arithmetic.

use chrono::Utc;
use proptest::prelude::*;
use tally_shared::types::{LedgerId, OrganizationId};

use super::balance::{Account, BalanceEvent, NewAccount, NormalBalance};
use super::entry::{Direction, EntryStatus};

fn arb_normal() -> impl Strategy<Value = NormalBalance> {
    prop_oneof![Just(NormalBalance::Debit), Just(NormalBalance::Credit)]
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Debit), Just(Direction::Credit)]
}

fn arb_status() -> impl Strategy<Value = EntryStatus> {
    prop_oneof![Just(EntryStatus::Pending), Just(EntryStatus::Posted)]
}

fn arb_movements() -> impl Strategy<Value = Vec<(Direction, i64)>> {
    prop::collection::vec((arb_direction(), 1_i64..1_000_000_000), 1..16)
}

fn account(normal: NormalBalance) -> Account {
    Account::open(
        &NewAccount {
            organization_id: OrganizationId::new(),
            ledger_id: LedgerId::new(),
            name: "props".to_string(),
            normal_balance: normal.as_str().to_string(),
            metadata: None,
        },
        Utc::now(),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Reversing every created entry returns all buckets to zero.
    #[test]
    fn prop_reversal_restores_zero(
        normal in arb_normal(),
        status in arb_status(),
        movements in arb_movements(),
    ) {
        let now = Utc::now();
        let start = account(normal);
        let mut acc = start.clone();
        for (direction, amount) in &movements {
            acc = acc.apply(*direction, *amount, BalanceEvent::Created(status), now).unwrap();
        }
        for (direction, amount) in movements.iter().rev() {
            acc = acc.apply(*direction, *amount, BalanceEvent::Reversed(status), now).unwrap();
        }

        prop_assert_eq!(acc.pending, start.pending);
        prop_assert_eq!(acc.posted, start.posted);
        prop_assert_eq!(acc.available, start.available);
    }

    /// Creating pending then posting lands on the same buckets as creating
    /// posted directly.
    #[test]
    fn prop_staged_posting_matches_direct(normal in arb_normal(), movements in arb_movements()) {
        let now = Utc::now();
        let mut staged = account(normal);
        let mut direct = staged.clone();
        for (direction, amount) in &movements {
            staged = staged
                .apply(*direction, *amount, BalanceEvent::Created(EntryStatus::Pending), now)
                .unwrap()
                .apply(*direction, *amount, BalanceEvent::Posted, now)
                .unwrap();
            direct = direct
                .apply(*direction, *amount, BalanceEvent::Created(EntryStatus::Posted), now)
                .unwrap();
        }

        prop_assert_eq!(staged.pending, direct.pending);
        prop_assert_eq!(staged.posted, direct.posted);
        prop_assert_eq!(staged.available, direct.available);
    }

    /// Every bucket's amount is its accumulators signed by the normal balance.
    #[test]
    fn prop_amount_follows_normal_balance(
        normal in arb_normal(),
        status in arb_status(),
        movements in arb_movements(),
    ) {
        let now = Utc::now();
        let mut acc = account(normal);
        for (direction, amount) in &movements {
            acc = acc.apply(*direction, *amount, BalanceEvent::Created(status), now).unwrap();
        }

        for view in [acc.pending, acc.posted, acc.available] {
            let expected = match normal {
                NormalBalance::Debit => view.debits - view.credits,
                NormalBalance::Credit => view.credits - view.debits,
            };
            prop_assert_eq!(view.amount, expected);
        }
    }

    /// Pending holds on outflows only ever lower the available balance.
    #[test]
    fn prop_pending_outflows_lower_available(
        normal in arb_normal(),
        amount in 1_i64..1_000_000_000,
    ) {
        let outflow = normal.increasing_direction().opposite();
        let inflow = normal.increasing_direction();
        let acc = account(normal);

        let held = acc.apply(outflow, amount, BalanceEvent::Created(EntryStatus::Pending), Utc::now()).unwrap();
        let incoming = acc.apply(inflow, amount, BalanceEvent::Created(EntryStatus::Pending), Utc::now()).unwrap();

        prop_assert_eq!(held.available.amount, -amount);
        prop_assert_eq!(incoming.available.amount, 0);
        prop_assert_eq!(held.posted.amount, 0);
    }
}
