use thiserror::Error;

use reel_core::types::{MetadataError, SamplingError};

/// Failure kinds surfaced by the engine. All of them abort the job; there is
/// no per-item recovery.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),
    #[error("work item size must be >= 1 (got {0})")]
    InvalidWorkItemSize(i64),
    #[error("sampling references unknown video index {0}")]
    UnknownVideo(usize),
    #[error("evaluator {evaluator} produced {got} output columns, expected {want}")]
    ColumnCountMismatch {
        evaluator: usize,
        got: usize,
        want: usize,
    },
    #[error("evaluator {evaluator} produced {got} outputs for column {column}, expected {want}")]
    ContractViolation {
        evaluator: usize,
        column: String,
        got: usize,
        want: usize,
    },
    #[error("cluster communication failed: {0}")]
    Cluster(String),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Storage(#[from] reel_store::StoreError),
}

impl From<MetadataError> for EngineError {
    fn from(err: MetadataError) -> Self {
        EngineError::CorruptMetadata(err.to_string())
    }
}
