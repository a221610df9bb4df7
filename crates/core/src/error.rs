//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("invalid ip address: {0:?}")]
    InvalidAddress(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
