//! Upsert engine error types.

use crate::error::MetadataError;
use std::fmt;
use thiserror::Error;

/// Step of a reconciliation attempt, recorded on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertStage {
    Begin,
    Lock,
    DeleteConflicts,
    DeleteStale,
    InsertNew,
    UpsertRecord,
    Commit,
}

impl UpsertStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Lock => "lock",
            Self::DeleteConflicts => "delete_conflicts",
            Self::DeleteStale => "delete_stale",
            Self::InsertNew => "insert_new",
            Self::UpsertRecord => "upsert_record",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for UpsertStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reconciliation attempt failed and was rolled back.
#[derive(Debug, Error)]
#[error("upsert transaction failed at {stage}: {source}")]
pub struct TransactionError {
    pub stage: UpsertStage,
    #[source]
    pub source: MetadataError,
}

impl TransactionError {
    pub fn new(stage: UpsertStage, source: MetadataError) -> Self {
        Self { stage, source }
    }

    /// Whether the attempt ran out of time.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.source, MetadataError::DeadlineExceeded(_))
    }
}

/// Errors surfaced to callers of the upsert engine.
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("invalid upsert request: {0}")]
    InvalidRequest(String),

    #[error("upsert for instance {instance_id} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        instance_id: String,
        attempts: u32,
        #[source]
        last: TransactionError,
    },

    #[error("upsert for instance {instance_id} was cancelled")]
    Cancelled { instance_id: String },
}

impl UpsertError {
    /// The error of the final attempt when every attempt failed.
    pub fn last_attempt_error(&self) -> Option<&TransactionError> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
