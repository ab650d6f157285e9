use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::extractor::{HeaderRejection, SkipReason};
use crate::metrics_consts::{
    FILES_REJECTED_TOTAL, MESSAGES_CONSUMED_TOTAL, MESSAGE_FAILURES_TOTAL, ROWS_EMITTED_TOTAL,
    ROWS_SKIPPED_TOTAL, UPDATES_EMITTED_TOTAL, UPDATES_SUPPRESSED_TOTAL,
};
use crate::source_ref::SourceReference;

/// What one path message produced once it reached `Done`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub rows_emitted: usize,
    pub updates_emitted: usize,
    pub rows_skipped: usize,
    pub rejected: bool,
}

/// Observation points of the pipeline. Every method defaults to doing nothing.
pub trait PipelineHooks: Send + Sync {
    fn on_row_emitted(&self, _source: &SourceReference, _key: &str) {}

    fn on_update_emitted(&self, _source: &SourceReference, _key: &str) {}

    fn on_update_suppressed(&self, _source: &SourceReference, _key: &str) {}

    fn on_row_skipped(&self, _source: &SourceReference, _line: usize, _reason: &SkipReason) {}

    /// A row whose value map could not be encoded.
    fn on_encoding_failure(&self, _source: &SourceReference, _key: &str, _error: &str) {}

    fn on_file_rejected(&self, _source: &SourceReference, _rejection: &HeaderRejection) {}

    fn on_message_done(&self, _path: &str, _stats: &FileStats) {}

    fn on_error(&self, _path: &str, _error: &PipelineError) {}
}

/// Logs through `tracing` and counts through `metrics`.
#[derive(Clone, Default)]
pub struct TracingHooks {}

impl PipelineHooks for TracingHooks {
    fn on_row_emitted(&self, source: &SourceReference, key: &str) {
        debug!(source = %source, key, "record emitted");
        counter!(ROWS_EMITTED_TOTAL).increment(1);
    }

    fn on_update_emitted(&self, source: &SourceReference, key: &str) {
        debug!(source = %source, key, "update emitted");
        counter!(UPDATES_EMITTED_TOTAL).increment(1);
    }

    fn on_update_suppressed(&self, _source: &SourceReference, _key: &str) {
        counter!(UPDATES_SUPPRESSED_TOTAL).increment(1);
    }

    fn on_row_skipped(&self, source: &SourceReference, line: usize, reason: &SkipReason) {
        match reason {
            SkipReason::TooFewFields { found, required } => debug!(
                source = %source,
                line,
                "skipping row with {} fields, {} required",
                found,
                required
            ),
            SkipReason::BlankKey => debug!(source = %source, line, "skipping row with blank key"),
        }
        counter!(ROWS_SKIPPED_TOTAL, "reason" => reason.as_str()).increment(1);
    }

    fn on_encoding_failure(&self, source: &SourceReference, key: &str, error: &str) {
        warn!(source = %source, key, "failed to encode record: {}", error);
        counter!(ROWS_SKIPPED_TOTAL, "reason" => "encoding_failure").increment(1);
    }

    fn on_file_rejected(&self, source: &SourceReference, rejection: &HeaderRejection) {
        match rejection {
            HeaderRejection::MissingKeyColumns { missing, columns } => warn!(
                source = %source,
                "header of {} columns lacks key columns {:?}, no rows extracted",
                columns,
                missing
            ),
        }
        counter!(FILES_REJECTED_TOTAL).increment(1);
    }

    fn on_message_done(&self, path: &str, stats: &FileStats) {
        info!(
            path,
            rows = stats.rows_emitted,
            updates = stats.updates_emitted,
            skipped = stats.rows_skipped,
            "processed file"
        );
        counter!(MESSAGES_CONSUMED_TOTAL, "status" => "done").increment(1);
    }

    fn on_error(&self, path: &str, error: &PipelineError) {
        match error {
            PipelineError::InvalidReference(_) | PipelineError::ObjectNotFound(_) => {
                warn!(path, error_type = error.error_type(), "{}", error)
            }
            _ => error!(path, error_type = error.error_type(), "{}", error),
        }
        counter!(MESSAGES_CONSUMED_TOTAL, "status" => "failed").increment(1);
        counter!(MESSAGE_FAILURES_TOTAL, "error_type" => error.error_type()).increment(1);
    }
}
