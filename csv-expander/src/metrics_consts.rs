/// Path messages consumed from the input topic, labelled by outcome
pub const MESSAGES_CONSUMED_TOTAL: &str = "csv_expander_messages_consumed_total";

/// Path messages that failed, labelled by error_type
pub const MESSAGE_FAILURES_TOTAL: &str = "csv_expander_message_failures_total";

/// Time spent processing one path message, fetch included
pub const MESSAGE_PROCESSING_DURATION: &str = "csv_expander_message_processing_duration_seconds";

/// Records emitted to the all-records destination
pub const ROWS_EMITTED_TOTAL: &str = "csv_expander_rows_emitted_total";

/// Records emitted to the changed-only destination
pub const UPDATES_EMITTED_TOTAL: &str = "csv_expander_updates_emitted_total";

/// Records held back by the change policy
pub const UPDATES_SUPPRESSED_TOTAL: &str = "csv_expander_updates_suppressed_total";

/// Data rows skipped during extraction, labelled by reason
pub const ROWS_SKIPPED_TOTAL: &str = "csv_expander_rows_skipped_total";

/// Files whose header lacks one of the key columns
pub const FILES_REJECTED_TOTAL: &str = "csv_expander_files_rejected_total";

/// Failed path messages handed to the failed-messages destination
pub const DEAD_LETTERS_TOTAL: &str = "csv_expander_dead_letters_total";

/// Values accepted by a sink, labelled by destination
pub const SINK_MESSAGES_TOTAL: &str = "csv_expander_sink_messages_total";

/// Produce calls rejected by Kafka, labelled by destination
pub const KAFKA_PRODUCE_ERRORS_TOTAL: &str = "csv_expander_kafka_produce_errors_total";

/// Messages waiting in the rdkafka producer queue
pub const KAFKA_PRODUCER_QUEUE_DEPTH: &str = "csv_expander_kafka_producer_queue_depth";

/// Input messages that were empty or not valid UTF-8 and were skipped, labelled by reason
pub const POISONED_MESSAGES_TOTAL: &str = "csv_expander_poisoned_messages_total";

/// Dispatches that found their processing lane full, labelled by lane
pub const LANE_BACKPRESSURE_TOTAL: &str = "csv_expander_lane_backpressure_total";

/// Time the consumer loop waited for room in a full lane
pub const LANE_BACKPRESSURE_WAIT: &str = "csv_expander_lane_backpressure_wait_seconds";

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

pub const HTTP_REQUESTS_DURATION: &str = "http_requests_duration_seconds";
