//! Database error types

use thiserror::Error;

use cod_types::CodError;

/// Unique index guarding one open scheduled batch per carrier and day
pub(crate) const SCHEDULED_BATCH_INDEX: &str = "batches_scheduled_open_key";

const UNIQUE_VIOLATION: &str = "23505";

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl DbError {
    /// Name of the unique constraint a failed statement violated
    pub fn unique_violation(&self) -> Option<String> {
        match self {
            DbError::Query(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Some(db.constraint().unwrap_or_default().to_string())
            }
            _ => None,
        }
    }
}

impl From<DbError> for CodError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => CodError::storage(format!("not found: {}", what)),
            DbError::InvalidInput(message) => CodError::Config { message },
            other => CodError::storage(other.to_string()),
        }
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
