//! In-memory doubles for the pipeline boundaries, shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::error::PipelineError;
use crate::extractor::{HeaderRejection, SkipReason};
use crate::hooks::{FileStats, PipelineHooks};
use crate::record::Clock;
use crate::sinks::{Destination, RecordSink, SinkError};
use crate::source_ref::SourceReference;
use crate::storage::{ObjectStore, StorageError};

/// Objects keyed by `container/path`, whatever the scheme of the reference.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
    failure: Mutex<Option<StorageError>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: &str, content: impl Into<Bytes>) {
        self.objects.insert(location.to_string(), content.into());
    }

    /// Every following fetch fails with this error.
    pub fn fail_with(&self, error: StorageError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Every following fetch sleeps this long first.
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, source: &SourceReference) -> Result<Bytes, StorageError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let location = format!("{}/{}", source.container(), source.path());
        self.objects
            .get(&location)
            .map(|content| content.clone())
            .ok_or(StorageError::NotFound(location))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub destination: Destination,
    pub key: String,
    pub value: String,
}

/// Keeps every accepted value in send order.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentRecord>>,
    failures: Mutex<HashMap<Destination, SinkError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `destination` fail with `error` until `recover` is called.
    pub fn fail(&self, destination: Destination, error: SinkError) {
        self.failures.lock().unwrap().insert(destination, error);
    }

    pub fn recover(&self, destination: Destination) {
        self.failures.lock().unwrap().remove(&destination);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    /// Key and value pairs sent to one destination.
    pub fn sent_to(&self, destination: Destination) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.destination == destination)
            .map(|record| (record.key.clone(), record.value.clone()))
            .collect()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn send(
        &self,
        destination: Destination,
        key: &str,
        value: &str,
    ) -> Result<(), SinkError> {
        if let Some(error) = self.failures.lock().unwrap().get(&destination) {
            return Err(error.clone());
        }
        self.sent.lock().unwrap().push(SentRecord {
            destination,
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    RowEmitted(String),
    UpdateEmitted(String),
    UpdateSuppressed(String),
    RowSkipped { line: usize, reason: SkipReason },
    EncodingFailure(String),
    FileRejected(HeaderRejection),
    MessageDone(FileStats),
    Error { error_type: &'static str },
}

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: HookEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PipelineHooks for RecordingHooks {
    fn on_row_emitted(&self, _source: &SourceReference, key: &str) {
        self.push(HookEvent::RowEmitted(key.to_string()));
    }

    fn on_update_emitted(&self, _source: &SourceReference, key: &str) {
        self.push(HookEvent::UpdateEmitted(key.to_string()));
    }

    fn on_update_suppressed(&self, _source: &SourceReference, key: &str) {
        self.push(HookEvent::UpdateSuppressed(key.to_string()));
    }

    fn on_row_skipped(&self, _source: &SourceReference, line: usize, reason: &SkipReason) {
        self.push(HookEvent::RowSkipped {
            line,
            reason: reason.clone(),
        });
    }

    fn on_encoding_failure(&self, _source: &SourceReference, key: &str, _error: &str) {
        self.push(HookEvent::EncodingFailure(key.to_string()));
    }

    fn on_file_rejected(&self, _source: &SourceReference, rejection: &HeaderRejection) {
        self.push(HookEvent::FileRejected(rejection.clone()));
    }

    fn on_message_done(&self, _path: &str, stats: &FileStats) {
        self.push(HookEvent::MessageDone(*stats));
    }

    fn on_error(&self, _path: &str, error: &PipelineError) {
        self.push(HookEvent::Error {
            error_type: error.error_type(),
        });
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}
