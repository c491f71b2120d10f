//! Database-specific error types and conversions.

use quarry_core::error::QuarryError;
use quarry_core::validation::FieldViolation;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The driver could not reach the store.
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    /// A statement was rejected by the store.
    #[error("Query failed: {0}")]
    Query(String),

    /// A unique index rejected a write.
    #[error("Unique index {index} violated: {detail}")]
    Conflict { index: String, detail: String },

    #[error("Unexpected result shape: {0}")]
    Decode(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl DbError {
    /// Classify a statement error reported by `Response::check`.
    pub(crate) fn query(err: surrealdb::Error) -> Self {
        let detail = err.to_string();
        if detail.contains("already contains") {
            let index = detail
                .split('`')
                .nth(1)
                .unwrap_or_default()
                .to_string();
            DbError::Conflict { index, detail }
        } else {
            DbError::Query(detail)
        }
    }

    pub(crate) fn decode(err: surrealdb::Error) -> Self {
        DbError::Decode(err.to_string())
    }
}

impl From<DbError> for QuarryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Surreal(e) => QuarryError::StoreUnavailable(e.to_string()),
            DbError::Closed => QuarryError::StoreUnavailable("connection is closed".into()),
            DbError::NotFound { entity, id } => QuarryError::NotFound { entity, id },
            DbError::Conflict { index, .. } => QuarryError::Validation {
                violations: vec![FieldViolation::new(index, "must be unique")],
            },
            other => QuarryError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_connection_is_store_unavailable() {
        let err: QuarryError = DbError::Closed.into();
        assert!(matches!(err, QuarryError::StoreUnavailable(_)));
    }

    #[test]
    fn conflict_becomes_validation() {
        let err: QuarryError = DbError::Conflict {
            index: "idx_user_email".into(),
            detail: String::new(),
        }
        .into();
        let QuarryError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations[0].field, "idx_user_email");
    }

    #[test]
    fn not_found_passes_through() {
        let err: QuarryError = DbError::NotFound {
            entity: "note".into(),
            id: "x".into(),
        }
        .into();
        assert!(matches!(err, QuarryError::NotFound { .. }));
    }
}
