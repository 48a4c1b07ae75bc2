//! Mapping of `SeaORM` errors into the ledger error taxonomy.

use sea_orm::{DbErr, SqlErr};
use tally_core::ledger::{Conflict, LedgerError};
use tracing::{error, warn};

/// Messages of lock and serialization failures raised when another
/// connection holds the rows or the database file.
const CONTENTION: &[&str] = &[
    "database is locked",
    "database table is locked",
    "could not serialize access",
    "deadlock detected",
];

/// Maps a database error.
///
/// Connection failures become `Unavailable`. Lock contention with another
/// connection becomes a retryable concurrent modification; everything else
/// is `Internal`.
pub(crate) fn db_err(err: DbErr) -> LedgerError {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => {
            error!(error = %err, "database unavailable");
            LedgerError::Unavailable(err.to_string())
        }
        other if is_contention(&other) => {
            warn!(error = %other, "database contention");
            Conflict::concurrent_modification("database rows").into()
        }
        other => {
            error!(error = %other, "database error");
            LedgerError::Internal(other.to_string())
        }
    }
}

fn is_contention(err: &DbErr) -> bool {
    let message = err.to_string();
    CONTENTION.iter().any(|needle| message.contains(needle))
}

/// Maps an insert error, turning a unique violation on the idempotency key
/// into the non-retryable duplicate conflict and any other unique violation
/// into a retryable concurrent modification.
pub(crate) fn insert_err(err: DbErr, idempotency_key: Option<&str>, what: &str) -> LedgerError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => match idempotency_key {
            Some(key) if message.contains("idempotency_key") => Conflict::duplicate_idempotency_key(key).into(),
            _ => Conflict::concurrent_modification(what).into(),
        },
        _ => db_err(err),
    }
}

/// Error for a stored row that no longer decodes into a domain value.
pub(crate) fn corrupt(what: impl std::fmt::Display, detail: impl std::fmt::Display) -> LedgerError {
    error!(%what, %detail, "invalid stored value");
    LedgerError::Internal(format!("stored {what} is invalid: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sea_orm::RuntimeErr;
    use tally_core::ledger::ConflictKind;

    #[rstest]
    #[case("error returned from database: (code: 5) database is locked")]
    #[case("error returned from database: could not serialize access due to concurrent update")]
    #[case("error returned from database: deadlock detected")]
    fn test_contention_is_retryable(#[case] message: &str) {
        let err = db_err(DbErr::Exec(RuntimeErr::Internal(message.to_string())));
        assert!(err.is_retryable());
        assert_eq!(err.as_conflict().map(|c| c.kind), Some(ConflictKind::ConcurrentModification));
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err = db_err(DbErr::Exec(RuntimeErr::Internal("no such table: accounts".to_string())));
        assert!(matches!(err, LedgerError::Internal(_)));
        assert!(!err.is_retryable());
    }
}
