//! Error and result types shared by every cloudtree module.

use std::io;
use thiserror::Error;

use crate::tree::ChunkId;

/// Errors that can occur while reading an index or executing a query.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Chunk {0} not found")]
    ChunkNotFound(ChunkId),

    #[error("Index file {0} not found")]
    MissingFile(String),

    #[error("No calibration scale for origin {0}")]
    MissingCalibration(u64),

    #[error("Batch of {requested} chunks exceeds the per-query limit of {limit}")]
    QueryLimitExceeded { requested: usize, limit: usize },

    #[error("Reservation failure for chunk {chunk}: {reason}")]
    ReservationFailure { chunk: ChunkId, reason: String },

    #[error("Called next after query completed")]
    QueryCompleted,
}

impl CloudError {
    /// Returns true for contract violations that must abort the running query.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CloudError::QueryCompleted
                | CloudError::ReservationFailure { .. }
                | CloudError::MissingCalibration(_)
        )
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::Serialization(err.to_string())
    }
}

/// Result type for cloudtree operations
pub type CloudResult<T> = Result<T, CloudError>;
