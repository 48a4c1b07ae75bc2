//! Storage boundary for settlements.

use async_trait::async_trait;
use tally_shared::types::{EntryId, PageRequest, PageResponse, SettlementId};

use super::types::{Settlement, StatusUpdate};
use crate::ledger::entry::Entry;
use crate::ledger::error::LedgerError;
use crate::ledger::types::LedgerScope;

/// Settlement storage.
///
/// `update_status` is conditional on the expected status and applies its
/// side effect in the same unit of work. Entry membership changes re-check
/// the status in that unit too, so they cannot slip past a concurrent
/// transition to `pending`.
#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Stores a new settlement. Both accounts must exist in its scope.
    async fn create_settlement(&self, settlement: &Settlement) -> Result<Settlement, LedgerError>;

    /// Loads a settlement.
    async fn get_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<Settlement, LedgerError>;

    /// Lists settlements in creation order.
    async fn list_settlements(
        &self,
        scope: LedgerScope,
        page: PageRequest,
    ) -> Result<PageResponse<Settlement>, LedgerError>;

    /// Deletes a settlement that is still drafting, unlinking its entries.
    async fn delete_settlement(&self, scope: LedgerScope, id: SettlementId) -> Result<(), LedgerError>;

    /// Net amount of the linked entries on the settled account.
    async fn calculate_amount(&self, scope: LedgerScope, id: SettlementId) -> Result<i64, LedgerError>;

    /// Changes status if it still equals `update.expected`.
    async fn update_status(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        update: StatusUpdate,
    ) -> Result<Settlement, LedgerError>;

    /// Links posted entries of the settled account.
    async fn add_entries_to_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError>;

    /// Unlinks entries.
    async fn remove_entries_from_settlement(
        &self,
        scope: LedgerScope,
        id: SettlementId,
        entry_ids: &[EntryId],
    ) -> Result<Settlement, LedgerError>;

    /// Entries currently linked, in link order.
    async fn settlement_entries(&self, scope: LedgerScope, id: SettlementId) -> Result<Vec<Entry>, LedgerError>;
}
