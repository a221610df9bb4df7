//! Metadata store error types.

use std::time::Duration;
use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("transaction deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Map a database error, turning unique/foreign-key violations into
    /// [`MetadataError::Constraint`].
    pub(crate) fn from_db(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() =>
            {
                Self::Constraint(db_err.message().to_string())
            }
            _ => Self::Database(err),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
