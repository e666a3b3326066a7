// Error types for the persistence layer
// Every store operation reports failure through PersistenceError; callers never
// receive partial data alongside an error.

use thiserror::Error;
use uuid::Uuid;

use crate::persistence::Table;

/// Failures raised by a persistence backend
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing database rejected or failed the operation
    #[error("Database error: {0}")]
    Database(String),

    /// A row addressed by id does not exist
    #[error("{table} row {id} not found")]
    NotFound { table: Table, id: Uuid },

    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The transaction lost a serialization race and was rolled back
    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    /// A row or patch was not a JSON object, or lacked a required key
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A column name failed identifier validation
    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    /// A stored row could not be decoded into its typed view
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, PersistenceError>;

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 40001 serialization_failure, 40P01 deadlock_detected
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => {
                    return PersistenceError::SerializationConflict(db_err.message().to_string());
                }
                _ => {}
            }
            if db_err.is_unique_violation() {
                return PersistenceError::Conflict(db_err.message().to_string());
            }
        }
        PersistenceError::Database(err.to_string())
    }
}
