//! Database error types.

use thiserror::Error;

use super::capacity::{CapacityExceeded, MinimumViolation};

/// SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE for foreign key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/server-manager.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A referenced or requested row does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A unique or foreign key constraint rejected the write.
    #[error("{0}")]
    Conflict(String),

    /// A node cannot hold the requested reservation.
    #[error("node capacity exceeded: {0}")]
    CapacityExceeded(CapacityExceeded),

    /// A reservation is below the template's declared minimums.
    #[error("below template minimums in {} dimension(s)", .0.len())]
    BelowTemplateMinimum(Vec<MinimumViolation>),

    /// The configured external port range has no room left.
    #[error("no free ports: requested {requested}, {available} available in {start}-{end}")]
    PortsExhausted {
        requested: usize,
        available: usize,
        start: u16,
        end: u16,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map a write error, turning constraint violations into `Conflict`.
    pub fn from_write(err: sqlx::Error, conflict_message: impl Into<String>) -> Self {
        if is_constraint_violation(&err) {
            return Self::Conflict(conflict_message.into());
        }
        Self::Query(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query(err)
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
    )
}

/// Name of the constraint a database error was raised for, if any.
pub fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn is_constraint_violation(err: &sqlx::Error) -> bool {
    is_unique_violation(err) || is_foreign_key_violation(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        let err = DbError::from_write(sqlx::Error::RowNotFound, "dup");
        assert!(matches!(err, DbError::Query(_)));
    }

    #[test]
    fn test_non_database_errors_name_no_constraint() {
        assert_eq!(violated_constraint(&sqlx::Error::RowNotFound), None);
    }

    #[test]
    fn test_not_found_message() {
        let err = DbError::not_found("template", 9);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "template 9 not found");
    }
}
