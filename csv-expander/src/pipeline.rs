use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::warn;

use crate::comparator::{ChangeDetector, Decision};
use crate::error::PipelineError;
use crate::extractor::{ExtractedRow, Extraction, TabularExtractor};
use crate::hooks::{FileStats, PipelineHooks, TracingHooks};
use crate::metrics_consts::{DEAD_LETTERS_TOTAL, MESSAGE_PROCESSING_DURATION};
use crate::record::{self, import_timestamp, Clock, SystemClock};
use crate::sinks::{Destination, RecordSink};
use crate::source_ref::SourceReference;
use crate::storage::{ObjectStore, StorageError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal state of one path message.
#[derive(Debug)]
pub enum MessageOutcome {
    Done(FileStats),
    Failed(PipelineError),
}

impl MessageOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, MessageOutcome::Done(_))
    }
}

/// Turns one path message into records: fetch, extract, build, then route every record
/// to the all-records destination and, when the change detector lets it through, to the
/// changed-only destination.
pub struct Pipeline {
    objects: Arc<dyn ObjectStore>,
    extractor: TabularExtractor,
    sink: Arc<dyn RecordSink>,
    detector: ChangeDetector,
    hooks: Arc<dyn PipelineHooks>,
    clock: Arc<dyn Clock>,
    schemes: Vec<String>,
    fetch_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        extractor: TabularExtractor,
        sink: Arc<dyn RecordSink>,
        detector: ChangeDetector,
    ) -> Self {
        Self {
            objects,
            extractor,
            sink,
            detector,
            hooks: Arc::new(TracingHooks::default()),
            clock: Arc::new(SystemClock::default()),
            schemes: vec!["s3".to_string(), "cos".to_string()],
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Schemes accepted in `<scheme>://<container>/<path>` references.
    pub fn with_schemes(mut self, schemes: Vec<String>) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Runs one path message to its terminal state. Never panics on bad input and never
    /// retries, redelivery is up to the caller.
    pub async fn process(&self, path: &str) -> MessageOutcome {
        let started = Instant::now();

        let outcome = match self.run(path).await {
            Ok(stats) => {
                self.hooks.on_message_done(path, &stats);
                MessageOutcome::Done(stats)
            }
            Err(error) => {
                self.hooks.on_error(path, &error);
                if error.is_dead_lettered() {
                    self.dead_letter(path, &error).await;
                }
                MessageOutcome::Failed(error)
            }
        };

        histogram!(MESSAGE_PROCESSING_DURATION).record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn run(&self, path: &str) -> Result<FileStats, PipelineError> {
        if path.trim().is_empty() {
            return Ok(FileStats::default());
        }
        let source = SourceReference::parse(path, &self.schemes)?;

        let content = match tokio::time::timeout(self.fetch_timeout, self.objects.fetch(&source))
            .await
        {
            Ok(fetched) => fetched.map_err(|e| PipelineError::from_storage(&source, e))?,
            Err(_) => {
                return Err(PipelineError::from_storage(
                    &source,
                    StorageError::Timeout(self.fetch_timeout),
                ))
            }
        };

        let extractor = self.extractor.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&content[..]))
            .await
            .map_err(|e| PipelineError::io(&source, e))?
            .map_err(|e| PipelineError::io(&source, e))?;

        self.route(&source, extraction).await
    }

    async fn route(
        &self,
        source: &SourceReference,
        extraction: Extraction,
    ) -> Result<FileStats, PipelineError> {
        let mut stats = FileStats {
            rows_skipped: extraction.skipped.len(),
            rejected: extraction.rejected.is_some(),
            ..Default::default()
        };
        if let Some(rejection) = &extraction.rejected {
            self.hooks.on_file_rejected(source, rejection);
        }
        for skipped in &extraction.skipped {
            self.hooks.on_row_skipped(source, skipped.line, &skipped.reason);
        }

        let imported_at = import_timestamp(self.clock.now_utc());

        for ExtractedRow { key, values } in extraction.rows {
            let encoded = match record::build(values, source, &imported_at) {
                Ok(encoded) => encoded,
                Err(e) => {
                    self.hooks.on_encoding_failure(source, &key, &e.to_string());
                    stats.rows_skipped += 1;
                    continue;
                }
            };

            self.publish(Destination::AllRecords, &key, &encoded).await?;
            stats.rows_emitted += 1;
            self.hooks.on_row_emitted(source, &key);

            let decision = self
                .detector
                .observe(&key, &encoded, || {
                    self.publish(Destination::ChangedOnly, &key, &encoded)
                })
                .await?;
            match decision {
                Decision::Propagate => {
                    stats.updates_emitted += 1;
                    self.hooks.on_update_emitted(source, &key);
                }
                Decision::Suppress => self.hooks.on_update_suppressed(source, &key),
            }
        }

        Ok(stats)
    }

    async fn publish(
        &self,
        destination: Destination,
        key: &str,
        value: &str,
    ) -> Result<(), PipelineError> {
        self.sink
            .send(destination, key, value)
            .await
            .map_err(|source| PipelineError::Publish {
                key: key.to_string(),
                source,
            })
    }

    /// Best effort, the outcome stays `Failed` either way.
    async fn dead_letter(&self, path: &str, error: &PipelineError) {
        let value = serde_json::json!({ "error": error.to_string() }).to_string();
        match self
            .sink
            .send(Destination::FailedMessages, path, &value)
            .await
        {
            Ok(()) => counter!(DEAD_LETTERS_TOTAL, "error_type" => error.error_type()).increment(1),
            Err(e) => warn!(path, "failed to hand off failed message: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::comparator::ChangePolicy;
    use crate::extractor::SkipReason;
    use crate::sinks::SinkError;
    use crate::state::{MemoryStateStore, StateStore};
    use crate::test_utils::{
        FixedClock, HookEvent, MemoryObjectStore, RecordingHooks, RecordingSink,
    };

    struct Harness {
        objects: Arc<MemoryObjectStore>,
        sink: Arc<RecordingSink>,
        hooks: Arc<RecordingHooks>,
        state: Arc<MemoryStateStore>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let objects = Arc::new(MemoryObjectStore::new());
        let sink = Arc::new(RecordingSink::new());
        let hooks = Arc::new(RecordingHooks::new());
        let state = Arc::new(MemoryStateStore::new());
        let detector = ChangeDetector::new(state.clone(), ChangePolicy::Equality, 16);
        let pipeline = Pipeline::new(
            objects.clone(),
            TabularExtractor::new(vec!["id".to_string()]),
            sink.clone(),
            detector,
        )
        .with_hooks(hooks.clone())
        .with_clock(Arc::new(FixedClock(datetime!(2024-03-05 07:08:09 UTC))))
        .with_fetch_timeout(Duration::from_millis(200));

        Harness {
            objects,
            sink,
            hooks,
            state,
            pipeline,
        }
    }

    #[tokio::test]
    async fn blank_message_is_done_without_output() {
        let h = harness();

        let outcome = h.pipeline.process("  ").await;

        assert!(matches!(outcome, MessageOutcome::Done(stats) if stats == FileStats::default()));
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn emits_records_with_metadata() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "id;name\n1;alice\n");

        let outcome = h.pipeline.process("s3://bucket/a.csv").await;
        assert!(outcome.is_done());

        let expected = (
            "1".to_string(),
            r#"{"name":"alice","input_filename":"s3://bucket/a.csv","imported":"20240305070809"}"#
                .to_string(),
        );
        assert_eq!(h.sink.sent_to(Destination::AllRecords), vec![expected.clone()]);
        assert_eq!(h.sink.sent_to(Destination::ChangedOnly), vec![expected.clone()]);
        assert_eq!(
            h.state.get("1").await.unwrap().as_deref(),
            Some(expected.1.as_str())
        );
    }

    #[tokio::test]
    async fn reports_skipped_rows_and_keeps_going() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "name;id\nbob\n;\ncarol;3\n");

        let MessageOutcome::Done(stats) = h.pipeline.process("bucket/a.csv").await else {
            panic!("expected the message to be done");
        };

        assert_eq!(stats.rows_emitted, 1);
        assert_eq!(stats.rows_skipped, 2);
        let events = h.hooks.events();
        assert!(events.contains(&HookEvent::RowSkipped {
            line: 2,
            reason: SkipReason::TooFewFields {
                found: 1,
                required: 2
            }
        }));
        assert!(events.contains(&HookEvent::RowSkipped {
            line: 3,
            reason: SkipReason::BlankKey
        }));
    }

    #[tokio::test]
    async fn invalid_reference_fails_without_dead_letter() {
        let h = harness();

        let outcome = h.pipeline.process("no-separator").await;

        assert!(matches!(
            outcome,
            MessageOutcome::Failed(PipelineError::InvalidReference(_))
        ));
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_dead_lettered() {
        let h = harness();

        let outcome = h.pipeline.process("cos://bucket/missing.csv").await;

        assert!(matches!(
            outcome,
            MessageOutcome::Failed(PipelineError::ObjectNotFound(_))
        ));
        let dead_letters = h.sink.sent_to(Destination::FailedMessages);
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].0, "cos://bucket/missing.csv");
        let value: serde_json::Value = serde_json::from_str(&dead_letters[0].1).unwrap();
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("cos://bucket/missing.csv"));
    }

    #[tokio::test]
    async fn slow_fetch_times_out_as_io_failure() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "id;name\n1;alice\n");
        h.objects.delay_by(Duration::from_secs(5));

        let outcome = h.pipeline.process("bucket/a.csv").await;

        let MessageOutcome::Failed(error) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(error.error_type(), "io_failure");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn storage_failures_are_io_failures() {
        let h = harness();
        h.objects
            .fail_with(StorageError::OperationFailed("connection reset".to_string()));

        let outcome = h.pipeline.process("bucket/a.csv").await;

        assert!(matches!(
            outcome,
            MessageOutcome::Failed(PipelineError::IoFailure { .. })
        ));
    }

    #[tokio::test]
    async fn failed_update_emit_keeps_state_for_redelivery() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "id;name\n1;alice\n");
        h.sink.fail(
            Destination::ChangedOnly,
            SinkError::Retryable("broker down".to_string()),
        );

        let outcome = h.pipeline.process("bucket/a.csv").await;
        assert!(matches!(
            outcome,
            MessageOutcome::Failed(PipelineError::Publish { .. })
        ));
        assert_eq!(h.state.get("1").await.unwrap(), None);

        h.sink.recover(Destination::ChangedOnly);
        assert!(h.pipeline.process("bucket/a.csv").await.is_done());
        assert_eq!(h.sink.sent_to(Destination::ChangedOnly).len(), 1);
        assert!(h.state.get("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_header_is_done_and_reported() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "name;region\nalice;eu\n");

        let MessageOutcome::Done(stats) = h.pipeline.process("bucket/a.csv").await else {
            panic!("expected the message to be done");
        };

        assert!(stats.rejected);
        assert!(h.sink.sent().is_empty());
        assert!(h
            .hooks
            .events()
            .iter()
            .any(|event| matches!(event, HookEvent::FileRejected(_))));
    }

    #[tokio::test]
    async fn invalid_utf8_content_is_an_io_failure() {
        let h = harness();
        h.objects.insert("bucket/a.csv", &b"id;name\n1;\xff\xfe\n"[..]);

        let outcome = h.pipeline.process("bucket/a.csv").await;

        assert!(matches!(
            outcome,
            MessageOutcome::Failed(PipelineError::IoFailure { .. })
        ));
        assert_eq!(h.sink.sent_to(Destination::FailedMessages).len(), 1);
    }

    #[tokio::test]
    async fn hooks_follow_each_row_then_the_message() {
        let h = harness();
        h.objects.insert("bucket/a.csv", "id;name\n1;a\n2;b\n");

        assert!(h.pipeline.process("bucket/a.csv").await.is_done());

        assert_eq!(
            h.hooks.events(),
            vec![
                HookEvent::RowEmitted("1".to_string()),
                HookEvent::UpdateEmitted("1".to_string()),
                HookEvent::RowEmitted("2".to_string()),
                HookEvent::UpdateEmitted("2".to_string()),
                HookEvent::MessageDone(FileStats {
                    rows_emitted: 2,
                    updates_emitted: 2,
                    rows_skipped: 0,
                    rejected: false,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn failed_message_reports_only_the_error() {
        let h = harness();

        let outcome = h.pipeline.process("bucket/missing.csv").await;

        assert!(!outcome.is_done());
        assert_eq!(
            h.hooks.events(),
            vec![HookEvent::Error {
                error_type: "object_not_found"
            }]
        );
    }
}
