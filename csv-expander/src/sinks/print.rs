use async_trait::async_trait;
use metrics::counter;

use super::{Destination, RecordSink, SinkError};
use crate::metrics_consts::SINK_MESSAGES_TOTAL;

/// Logs records instead of producing them, for local runs.
pub struct PrintSink {}

#[async_trait]
impl RecordSink for PrintSink {
    async fn send(
        &self,
        destination: Destination,
        key: &str,
        value: &str,
    ) -> Result<(), SinkError> {
        tracing::info!(
            destination = destination.as_str(),
            "key='{}' value='{}'",
            key,
            value
        );
        counter!(SINK_MESSAGES_TOTAL, "destination" => destination.as_str()).increment(1);
        Ok(())
    }
}
