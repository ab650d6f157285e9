use thiserror::Error;

use crate::sinks::SinkError;
use crate::source_ref::ReferenceError;
use crate::state::StoreError;
use crate::storage::StorageError;

/// Reasons a single path message ends in the `Failed` state.
///
/// Row-level problems never show up here, they only skip the row.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid source reference: {0}")]
    InvalidReference(#[from] ReferenceError),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("failed to read {location}: {reason}")]
    IoFailure { location: String, reason: String },
    #[error("failed to publish record {key}: {source}")]
    Publish {
        key: String,
        #[source]
        source: SinkError,
    },
    #[error("state store failure: {0}")]
    State(#[from] StoreError),
}

impl PipelineError {
    pub fn io(location: impl ToString, reason: impl ToString) -> Self {
        PipelineError::IoFailure {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn from_storage(location: impl ToString, error: StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => PipelineError::ObjectNotFound(location.to_string()),
            other => PipelineError::io(location, other),
        }
    }

    /// Tag used in logs and metric labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::InvalidReference(_) => "invalid_reference",
            PipelineError::ObjectNotFound(_) => "object_not_found",
            PipelineError::IoFailure { .. } => "io_failure",
            PipelineError::Publish { .. } => "publish_failure",
            PipelineError::State(_) => "state_failure",
        }
    }

    /// Whether redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::InvalidReference(_) | PipelineError::ObjectNotFound(_) => false,
            PipelineError::IoFailure { .. } | PipelineError::State(_) => true,
            PipelineError::Publish { source, .. } => source.is_retryable(),
        }
    }

    /// Whether the message is handed to the failed-messages destination.
    pub fn is_dead_lettered(&self) -> bool {
        matches!(
            self,
            PipelineError::ObjectNotFound(_)
                | PipelineError::IoFailure { .. }
                | PipelineError::Publish { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_object_not_found() {
        let error = PipelineError::from_storage(
            "s3://orders/missing.csv",
            StorageError::NotFound("missing.csv".to_string()),
        );
        assert!(matches!(error, PipelineError::ObjectNotFound(ref l) if l == "s3://orders/missing.csv"));
        assert!(!error.is_retryable());
        assert!(error.is_dead_lettered());
    }

    #[test]
    fn storage_failures_map_to_io_failure() {
        let error = PipelineError::from_storage(
            "s3://orders/a.csv",
            StorageError::OperationFailed("connection reset".to_string()),
        );
        assert_eq!(error.error_type(), "io_failure");
        assert!(error.is_retryable());
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn invalid_references_are_dropped() {
        let error = PipelineError::from(ReferenceError::Empty);
        assert!(!error.is_retryable());
        assert!(!error.is_dead_lettered());
    }
}
