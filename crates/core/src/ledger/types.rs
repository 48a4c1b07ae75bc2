//! Ledger domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_shared::types::{Currency, LedgerId, OrganizationId};

/// Organization and ledger a request is confined to.
///
/// Every repository lookup is scoped, so an ID from another ledger is
/// reported as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerScope {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Ledger.
    pub ledger_id: LedgerId,
}

impl LedgerScope {
    /// Creates a scope.
    #[must_use]
    pub const fn new(organization_id: OrganizationId, ledger_id: LedgerId) -> Self {
        Self {
            organization_id,
            ledger_id,
        }
    }
}

/// A ledger fixes the currency of every account and transaction in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Ledger ID.
    pub id: LedgerId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Display name.
    pub name: String,
    /// Currency and exponent shared by all entries.
    pub currency: Currency,
    /// Opaque caller metadata.
    pub metadata: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedger {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Display name.
    pub name: String,
    /// Ledger currency.
    pub currency: Currency,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Ledger {
    /// Builds a new ledger from input.
    #[must_use]
    pub fn open(new: &NewLedger, now: DateTime<Utc>) -> Self {
        Self {
            id: LedgerId::new(),
            organization_id: new.organization_id,
            name: new.name.clone(),
            currency: new.currency.clone(),
            metadata: new.metadata.clone(),
            created_at: now,
        }
    }

    /// Scope of this ledger.
    #[must_use]
    pub const fn scope(&self) -> LedgerScope {
        LedgerScope::new(self.organization_id, self.id)
    }
}
