//! Error types for silt.
//!
//! All errors that can occur within the engine are represented by [`SiltError`].
//! Errors are propagated via `Result<T, SiltError>` throughout the codebase and
//! surfaced to the caller at the dispatch boundary.
//!
//! # Error Classification
//!
//! Errors fall into three categories:
//! - **User** — malformed query shapes, unknown tables/columns/functions,
//!   cyclic view definitions. The query is rejected before any effect is
//!   committed.
//! - **Adapter** — failures reported by the storage backend. The engine
//!   surfaces them as-is and does not retry.
//! - **Internal** — bugs. Should not happen.
//!
//! Integrity drift (a missing referenced row under a LIVE view) is not an
//! error: the projector nulls the projected columns and continues.

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum SiltError {
    // ── User errors — reject the query, no partial effects ──────────────
    /// The named table is not registered in the catalog.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The named function is not registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// The query descriptor combines clauses that cannot appear together
    /// (e.g. `join` with `orm`, or more than one of `where`/`range`/`trie`).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A clause that requires a named table was used with an instance table.
    #[error("instance tables do not support {0}")]
    InstanceTableUnsupported(&'static str),

    /// No ORM relationship is registered for the given table column.
    #[error("no ORM relation on {table}.{column}")]
    UnknownRelation { table: String, column: String },

    /// Registering this schema would create a cycle in the view-projection
    /// graph, so projection could never converge.
    #[error("cycle detected in view projection graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A schema referenced a column that the table does not declare.
    #[error("unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    /// An invalid argument was provided to an engine call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Adapter errors — surfaced, never retried ─────────────────────────
    /// The storage adapter reported a failure.
    #[error("storage adapter error: {0}")]
    AdapterError(String),

    /// The engine is not connected (or was destroyed).
    #[error("engine is not connected")]
    NotConnected,

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl SiltError {
    /// Whether this error was caused by the caller's input, as opposed to
    /// the storage backend or an engine bug.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            SiltError::AdapterError(_) | SiltError::NotConnected | SiltError::InternalError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        assert!(SiltError::TableNotFound("t".into()).is_user_error());
        assert!(SiltError::InvalidQuery("join with orm".into()).is_user_error());
        assert!(SiltError::CycleDetected(vec!["a".into(), "b".into()]).is_user_error());
        assert!(!SiltError::AdapterError("disk".into()).is_user_error());
        assert!(!SiltError::InternalError("bug".into()).is_user_error());
    }

    #[test]
    fn test_cycle_display_joins_path() {
        let e = SiltError::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            e.to_string(),
            "cycle detected in view projection graph: a -> b -> a"
        );
    }
}
