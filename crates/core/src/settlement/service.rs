//! Settlement operations on [`LedgerService`].

use chrono::Utc;
use tally_shared::types::{EntryId, PageRequest, PageResponse, SettlementId};
use tracing::{debug, info};

use super::types::{NewSettlement, Settlement, SettlementStatus, StatusUpdate, TransitionEffect, TransitionPlan};
use crate::ledger::entry::Entry;
use crate::ledger::error::LedgerError;
use crate::ledger::service::LedgerService;
use crate::ledger::types::LedgerScope;
use crate::retry::retry;

impl LedgerService {
    /// Opens a settlement between two accounts of the same ledger.
    pub async fn create_settlement(&self, new: &NewSettlement) -> Result<Settlement, LedgerError> {
        let settlement = Settlement::open(new, Utc::now())?;
        let settlement = self.settlements.create_settlement(&settlement).await?;
        info!(
            settlement_id = %settlement.id(),
            settled_account_id = %settlement.settled_account_id(),
            contra_account_id = %settlement.contra_account_id(),
            "settlement created"
        );
        Ok(settlement)
    }

    /// Loads a settlement.
    pub async fn get_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<Settlement, LedgerError> {
        self.settlements.get_settlement(scope, id).await
    }

    /// Lists settlements of a ledger.
    pub async fn list_settlements(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Settlement>, LedgerError> {
        self.settlements.list_settlements(scope, page).await
    }

    /// Deletes a drafting settlement.
    pub async fn delete_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<(), LedgerError> {
        self.settlements.delete_settlement(scope, id).await?;
        info!(settlement_id = %id, "settlement deleted");
        Ok(())
    }

    /// Moves a settlement to `target`.
    ///
    /// Each attempt reloads the settlement, validates the transition and
    /// writes conditionally on the status it read. Reaching `posted` records
    /// the settling transaction in the same write.
    pub async fn transition_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        target: SettlementStatus,
    ) -> Result<Settlement, LedgerError> {
        let settlement = retry(&self.retry_policy, LedgerError::is_retryable, |attempt| async move {
            let current = self.settlements.get_settlement(scope, id).await?;
            debug!(attempt, settlement_id = %id, from = %current.status(), to = %target, "transitioning settlement");
            let plan = current.plan_transition(target)?;
            let now = Utc::now();

            let effect = match plan {
                TransitionPlan::StatusOnly => TransitionEffect::None,
                TransitionPlan::CalculateAmount => TransitionEffect::CalculateAmount,
                TransitionPlan::ClearAmount => TransitionEffect::ClearAmount,
                TransitionPlan::PostTransaction => {
                    let ledger = self.ledgers.get_ledger(scope).await?;
                    let settled = self
                        .accounts
                        .get_account(scope, current.settled_account_id())
                        .await?;
                    let transaction = current.build_transaction(settled.normal_balance, &ledger.currency, now)?;
                    TransitionEffect::PostTransaction(transaction)
                }
            };

            let update = StatusUpdate {
                expected: current.status(),
                expected_amount: current.amount(),
                target,
                effect,
                at: now,
            };
            self.settlements.update_status(scope, id, update).await
        })
        .await?;

        info!(
            settlement_id = %id,
            status = %settlement.status(),
            amount = ?settlement.amount(),
            transaction_id = ?settlement.transaction_id().map(|txn| txn.to_string()),
            "settlement transitioned"
        );
        Ok(settlement)
    }

    /// Links entries to a drafting or processing settlement.
    pub async fn add_entries_to_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let settlement = self
            .settlements
            .add_entries_to_settlement(scope, id, entry_ids)
            .await?;
        debug!(settlement_id = %id, count = entry_ids.len(), "entries linked");
        Ok(settlement)
    }

    /// Unlinks entries from a drafting or processing settlement.
    pub async fn remove_entries_from_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError> {
        let settlement = self
            .settlements
            .remove_entries_from_settlement(scope, id, entry_ids)
            .await?;
        debug!(settlement_id = %id, count = entry_ids.len(), "entries unlinked");
        Ok(settlement)
    }

    /// Entries linked to a settlement.
    pub async fn settlement_entries(&self, scope: LedgerScope, id: SettlementId) -> Result<Vec<Entry>, LedgerError> {
        self.settlements.settlement_entries(scope, id).await
    }

    /// Current net amount of the linked entries, without changing status.
    pub async fn calculate_settlement_amount(&self, scope: LedgerScope, id: SettlementId) -> Result<i64, LedgerError> {
        self.settlements.calculate_amount(scope, id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rstest::rstest;
    use tally_shared::types::{AccountId, Currency, OrganizationId};

    use super::*;
    use crate::ledger::balance::{NewAccount, NormalBalance};
    use crate::ledger::entry::{Direction, EntryInput};
    use crate::ledger::error::{ConflictKind, EntityKind, InvariantViolation};
    use crate::ledger::transaction::{NewTransaction, TransactionStatus};
    use crate::ledger::types::NewLedger;
    use crate::memory::InMemoryLedgerStore;
    use crate::retry::RetryPolicy;

    struct Fixture {
        service: LedgerService,
        scope: LedgerScope,
        merchant: AccountId,
        payout: AccountId,
        customer: AccountId,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryLedgerStore::new());
            let retry = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(10));
            let service = LedgerService::from_store(store, retry);
            let scope = service
                .create_ledger(&NewLedger {
                    organization_id: OrganizationId::new(),
                    name: "Payments".to_string(),
                    currency: Currency::new("USD", 2).unwrap(),
                    metadata: None,
                })
                .await
                .unwrap()
                .scope();
            let mut ids = Vec::new();
            for (name, normal) in [("merchant", "credit"), ("payout", "credit"), ("customer", "debit")] {
                let account = service
                    .create_account(&NewAccount {
                        organization_id: scope.organization_id,
                        ledger_id: scope.ledger_id,
                        name: name.to_string(),
                        normal_balance: normal.to_string(),
                        metadata: None,
                    })
                    .await
                    .unwrap();
                ids.push(account.id);
            }
            Self {
                service,
                scope,
                merchant: ids[0],
                payout: ids[1],
                customer: ids[2],
            }
        }

        /// Records a posted sale crediting the merchant; returns the
        /// merchant-side entry.
        async fn sale(&self, amount: i64) -> EntryId {
            let input = NewTransaction::new(
                self.scope.organization_id,
                self.scope.ledger_id,
                vec![
                    EntryInput::debit(self.customer, amount),
                    EntryInput::credit(self.merchant, amount),
                ],
            )
            .posted();
            let outcome = self.service.create_transaction(&input).await.unwrap();
            outcome
                .transaction
                .entries()
                .iter()
                .find(|e| e.account_id() == self.merchant)
                .unwrap()
                .id()
        }

        async fn settlement(&self) -> Settlement {
            self.service
                .create_settlement(&NewSettlement {
                    organization_id: self.scope.organization_id,
                    ledger_id: self.scope.ledger_id,
                    settled_account_id: self.merchant,
                    contra_account_id: self.payout,
                    description: Some("Weekly payout".to_string()),
                    metadata: None,
                })
                .await
                .unwrap()
        }

        async fn walk(&self, id: SettlementId, path: &[SettlementStatus]) -> Settlement {
            let mut last = None;
            for status in path {
                last = Some(
                    self.service
                        .transition_settlement(self.scope, id, *status)
                        .await
                        .unwrap(),
                );
            }
            last.unwrap()
        }
    }

    #[tokio::test]
    async fn test_full_settlement_lifecycle() {
        let fx = Fixture::new().await;
        let first = fx.sale(6_000).await;
        let second = fx.sale(4_000).await;
        let stl = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[first, second])
            .await
            .unwrap();

        let pending = fx
            .walk(stl.id(), &[SettlementStatus::Processing, SettlementStatus::Pending])
            .await;
        assert_eq!(pending.status(), SettlementStatus::Pending);
        assert_eq!(pending.amount(), Some(10_000));

        let posted = fx.walk(stl.id(), &[SettlementStatus::Posted]).await;
        let txn_id = posted.transaction_id().unwrap();
        let txn = fx.service.get_transaction(fx.scope, txn_id).await.unwrap();
        assert_eq!(txn.status(), TransactionStatus::Posted);
        assert_eq!(txn.total_amount(), 10_000);
        let merchant_entry = txn.entries().iter().find(|e| e.account_id() == fx.merchant).unwrap();
        assert_eq!(merchant_entry.direction(), Direction::Debit);

        let merchant = fx.service.get_account(fx.scope, fx.merchant).await.unwrap();
        let payout = fx.service.get_account(fx.scope, fx.payout).await.unwrap();
        assert_eq!(merchant.posted.amount, 0);
        assert_eq!(payout.posted.amount, 10_000);

        let archived = fx
            .walk(stl.id(), &[SettlementStatus::Archiving, SettlementStatus::Archived])
            .await;
        assert_eq!(archived.status(), SettlementStatus::Archived);
        let err = fx
            .service
            .transition_settlement(fx.scope, stl.id(), SettlementStatus::Drafting)
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::InvalidTransition));
    }

    #[tokio::test]
    async fn test_post_planned_before_recalculation_is_refused() {
        let fx = Fixture::new().await;
        let first = fx.sale(1_000).await;
        let later = fx.sale(2_000).await;
        let stl = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[first])
            .await
            .unwrap();
        let read = fx
            .walk(stl.id(), &[SettlementStatus::Processing, SettlementStatus::Pending])
            .await;
        let now = Utc::now();
        let stale = StatusUpdate {
            expected: read.status(),
            expected_amount: read.amount(),
            target: SettlementStatus::Posted,
            effect: TransitionEffect::PostTransaction(
                read.build_transaction(NormalBalance::Credit, &Currency::new("USD", 2).unwrap(), now)
                    .unwrap(),
            ),
            at: now,
        };

        fx.walk(stl.id(), &[SettlementStatus::Drafting, SettlementStatus::Processing])
            .await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[later])
            .await
            .unwrap();
        fx.walk(stl.id(), &[SettlementStatus::Pending]).await;

        let err = fx
            .service
            .settlements
            .update_status(fx.scope, stl.id(), stale)
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::ConcurrentModification));
        assert!(err.is_retryable());
        let stored = fx.service.get_settlement(fx.scope, stl.id()).await.unwrap();
        assert_eq!(stored.status(), SettlementStatus::Pending);
        assert_eq!(stored.amount(), Some(3_000));
        assert_eq!(stored.transaction_id(), None);
        let payout = fx.service.get_account(fx.scope, fx.payout).await.unwrap();
        assert_eq!(payout.posted.amount, 0);

        let posted = fx.walk(stl.id(), &[SettlementStatus::Posted]).await;
        let txn = fx
            .service
            .get_transaction(fx.scope, posted.transaction_id().unwrap())
            .await
            .unwrap();
        assert_eq!(txn.total_amount(), 3_000);
    }

    #[tokio::test]
    async fn test_drafting_to_posted_is_rejected() {
        let fx = Fixture::new().await;
        let stl = fx.settlement().await;

        let err = fx
            .service
            .transition_settlement(fx.scope, stl.id(), SettlementStatus::Posted)
            .await
            .unwrap_err();

        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::InvalidTransition));
        assert!(!err.is_retryable());
        let reloaded = fx.service.get_settlement(fx.scope, stl.id()).await.unwrap();
        assert_eq!(reloaded.status(), SettlementStatus::Drafting);
    }

    #[rstest]
    #[case(SettlementStatus::Drafting, SettlementStatus::Processing)]
    #[case(SettlementStatus::Processing, SettlementStatus::Drafting)]
    #[case(SettlementStatus::Processing, SettlementStatus::Pending)]
    #[case(SettlementStatus::Pending, SettlementStatus::Drafting)]
    #[case(SettlementStatus::Pending, SettlementStatus::Posted)]
    #[case(SettlementStatus::Posted, SettlementStatus::Archiving)]
    #[case(SettlementStatus::Archiving, SettlementStatus::Archived)]
    #[tokio::test]
    async fn test_every_allowed_pair_succeeds(#[case] from: SettlementStatus, #[case] to: SettlementStatus) {
        let fx = Fixture::new().await;
        let entry = fx.sale(500).await;
        let stl = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[entry])
            .await
            .unwrap();

        let path: &[SettlementStatus] = match from {
            SettlementStatus::Drafting => &[],
            SettlementStatus::Processing => &[SettlementStatus::Processing],
            SettlementStatus::Pending => &[SettlementStatus::Processing, SettlementStatus::Pending],
            SettlementStatus::Posted => &[
                SettlementStatus::Processing,
                SettlementStatus::Pending,
                SettlementStatus::Posted,
            ],
            SettlementStatus::Archiving => &[
                SettlementStatus::Processing,
                SettlementStatus::Pending,
                SettlementStatus::Posted,
                SettlementStatus::Archiving,
            ],
            SettlementStatus::Archived => unreachable!(),
        };
        for status in path {
            fx.service
                .transition_settlement(fx.scope, stl.id(), *status)
                .await
                .unwrap();
        }

        let moved = fx
            .service
            .transition_settlement(fx.scope, stl.id(), to)
            .await
            .unwrap();
        assert_eq!(moved.status(), to);
    }

    #[tokio::test]
    async fn test_rollback_clears_amount_and_reopens_entries() {
        let fx = Fixture::new().await;
        let first = fx.sale(1_000).await;
        let second = fx.sale(2_000).await;
        let stl = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[first])
            .await
            .unwrap();
        fx.walk(stl.id(), &[SettlementStatus::Processing, SettlementStatus::Pending])
            .await;

        let err = fx
            .service
            .add_entries_to_settlement(fx.scope, stl.id(), &[second])
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::SettlementFinalized));

        let drafting = fx.walk(stl.id(), &[SettlementStatus::Drafting]).await;
        assert_eq!(drafting.amount(), None);
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[second])
            .await
            .unwrap();
        let pending = fx
            .walk(stl.id(), &[SettlementStatus::Processing, SettlementStatus::Pending])
            .await;
        assert_eq!(pending.amount(), Some(3_000));
    }

    #[tokio::test]
    async fn test_entry_belongs_to_one_settlement() {
        let fx = Fixture::new().await;
        let entry = fx.sale(1_000).await;
        let first = fx.settlement().await;
        let second = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, first.id(), &[entry])
            .await
            .unwrap();

        let err = fx
            .service
            .add_entries_to_settlement(fx.scope, second.id(), &[entry])
            .await
            .unwrap_err();

        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::EntryAlreadySettled));
    }

    #[tokio::test]
    async fn test_entry_must_be_on_settled_account() {
        let fx = Fixture::new().await;
        let input = NewTransaction::new(
            fx.scope.organization_id,
            fx.scope.ledger_id,
            vec![
                EntryInput::debit(fx.customer, 100),
                EntryInput::credit(fx.merchant, 100),
            ],
        )
        .posted();
        let txn = fx.service.create_transaction(&input).await.unwrap().transaction;
        let customer_entry = txn.entries().iter().find(|e| e.account_id() == fx.customer).unwrap();
        let stl = fx.settlement().await;

        let err = fx
            .service
            .add_entries_to_settlement(fx.scope, stl.id(), &[customer_entry.id()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InvariantViolation(InvariantViolation::EntryAccountMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_entries_cannot_be_settled() {
        let fx = Fixture::new().await;
        let input = NewTransaction::new(
            fx.scope.organization_id,
            fx.scope.ledger_id,
            vec![
                EntryInput::debit(fx.customer, 100),
                EntryInput::credit(fx.merchant, 100),
            ],
        );
        let txn = fx.service.create_transaction(&input).await.unwrap().transaction;
        let entry = txn.entries().iter().find(|e| e.account_id() == fx.merchant).unwrap();
        let stl = fx.settlement().await;

        let err = fx
            .service
            .add_entries_to_settlement(fx.scope, stl.id(), &[entry.id()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InvariantViolation(InvariantViolation::EntryNotPosted(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_entries_and_recalculate() {
        let fx = Fixture::new().await;
        let first = fx.sale(1_000).await;
        let second = fx.sale(2_500).await;
        let stl = fx.settlement().await;
        fx.service
            .add_entries_to_settlement(fx.scope, stl.id(), &[first, second])
            .await
            .unwrap();
        assert_eq!(
            fx.service.calculate_settlement_amount(fx.scope, stl.id()).await.unwrap(),
            3_500
        );

        fx.service
            .remove_entries_from_settlement(fx.scope, stl.id(), &[first])
            .await
            .unwrap();

        let linked = fx.service.settlement_entries(fx.scope, stl.id()).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id(), second);
        let err = fx
            .service
            .remove_entries_from_settlement(fx.scope, stl.id(), &[first])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: EntityKind::Entry, .. }));
    }

    #[tokio::test]
    async fn test_posting_empty_settlement_fails_on_zero_amount() {
        let fx = Fixture::new().await;
        let stl = fx.settlement().await;
        fx.walk(stl.id(), &[SettlementStatus::Processing, SettlementStatus::Pending])
            .await;

        let err = fx
            .service
            .transition_settlement(fx.scope, stl.id(), SettlementStatus::Posted)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InvariantViolation(InvariantViolation::NonPositiveAmount { amount: 0 })
        );
        let reloaded = fx.service.get_settlement(fx.scope, stl.id()).await.unwrap();
        assert_eq!(reloaded.status(), SettlementStatus::Pending);
    }

    #[tokio::test]
    async fn test_same_accounts_rejected() {
        let fx = Fixture::new().await;
        let err = fx
            .service
            .create_settlement(&NewSettlement {
                organization_id: fx.scope.organization_id,
                ledger_id: fx.scope.ledger_id,
                settled_account_id: fx.merchant,
                contra_account_id: fx.merchant,
                description: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status_code(), 400);
    }

    #[tokio::test]
    async fn test_delete_only_while_drafting() {
        let fx = Fixture::new().await;
        let draft = fx.settlement().await;
        let processing = fx.settlement().await;
        fx.walk(processing.id(), &[SettlementStatus::Processing]).await;

        fx.service.delete_settlement(fx.scope, draft.id()).await.unwrap();
        let err = fx
            .service
            .delete_settlement(fx.scope, processing.id())
            .await
            .unwrap_err();

        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::InvalidTransition));
        let page = fx
            .service
            .list_settlements(fx.scope, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.data[0].id(), processing.id());
    }
}
