//! Typed IDs for type-safe entity references.
//!
//! Every ID wraps a UUID v7 and carries a type tag. The tag shows up as a
//! prefix whenever the ID leaves the process (`txn_0190…`, `acct_0190…`), so a
//! transaction ID can never be parsed as an account ID, and passing an
//! `AccountId` where a `LedgerId` is expected does not compile.

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned when parsing a prefixed ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    /// The string carries another entity's prefix, or none at all.
    #[error("Expected an ID with prefix '{expected}_', got '{found}'")]
    WrongPrefix {
        /// Prefix required by the target type.
        expected: &'static str,
        /// The rejected input.
        found: String,
    },

    /// The part after the prefix is not a UUID.
    #[error("Invalid UUID in ID: {0}")]
    InvalidUuid(String),
}

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $prefix:literal, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            SerializeDisplay,
            DeserializeFromStr,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Prefix used in the external representation.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .ok_or_else(|| IdParseError::WrongPrefix {
                        expected: Self::PREFIX,
                        found: s.to_string(),
                    })?;
                Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|e| IdParseError::InvalidUuid(e.to_string()))
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(OrganizationId, "org", "Unique identifier for an organization.");
typed_id!(LedgerId, "ldg", "Unique identifier for a ledger.");
typed_id!(AccountId, "acct", "Unique identifier for a ledger account.");
typed_id!(TransactionId, "txn", "Unique identifier for a transaction.");
typed_id!(EntryId, "ent", "Unique identifier for a transaction entry.");
typed_id!(SettlementId, "stl", "Unique identifier for a settlement.");

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[test]
    fn test_typed_id_display_has_prefix() {
        let uuid = Uuid::now_v7();
        let id = TransactionId::from_uuid(uuid);
        assert_eq!(id.to_string(), format!("txn_{uuid}"));
    }

    #[test]
    fn test_typed_id_round_trips_through_str() {
        let id = AccountId::new();
        let parsed = AccountId::from_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.into_inner(), id.into_inner());
    }

    #[test]
    fn test_typed_id_rejects_other_entity_prefix() {
        let txn = TransactionId::new().to_string();
        let err = AccountId::from_str(&txn).unwrap_err();
        assert!(matches!(
            err,
            IdParseError::WrongPrefix {
                expected: "acct",
                ..
            }
        ));
    }

    #[rstest]
    #[case("")]
    #[case("acct")]
    #[case("acct-0190b3a4-0000-7000-8000-000000000000")]
    #[case("0190b3a4-0000-7000-8000-000000000000")]
    fn test_typed_id_rejects_missing_prefix(#[case] input: &str) {
        assert!(matches!(
            AccountId::from_str(input),
            Err(IdParseError::WrongPrefix { .. })
        ));
    }

    #[test]
    fn test_typed_id_rejects_bad_uuid() {
        assert!(matches!(
            LedgerId::from_str("ldg_not-a-uuid"),
            Err(IdParseError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_typed_id_serializes_as_prefixed_string() {
        let id = SettlementId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: SettlementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let wrong = format!("\"{}\"", EntryId::new());
        assert!(serde_json::from_str::<SettlementId>(&wrong).is_err());
    }
}
