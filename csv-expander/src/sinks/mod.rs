use async_trait::async_trait;
use thiserror::Error;

pub mod kafka;
pub mod print;

pub use kafka::KafkaSink;
pub use print::PrintSink;

/// Where a keyed value is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every extracted record.
    AllRecords,
    /// Records whose content changed since their key was last seen.
    ChangedOnly,
    /// Path messages that could not be processed, keyed by path.
    FailedMessages,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::AllRecords => "all_records",
            Destination::ChangedOnly => "changed_only",
            Destination::FailedMessages => "failed_messages",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("retryable sink failure: {0}")]
    Retryable(String),
    #[error("non retryable sink failure: {0}")]
    NonRetryable(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_))
    }
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns once the value is durably accepted by the destination.
    async fn send(&self, destination: Destination, key: &str, value: &str)
        -> Result<(), SinkError>;

    /// Waits for queued writes, called on shutdown.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
