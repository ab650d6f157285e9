use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use super::{Destination, RecordSink, SinkError};
use crate::config::KafkaConfig;
use crate::health::HealthHandle;
use crate::metrics_consts::{
    KAFKA_PRODUCER_QUEUE_DEPTH, KAFKA_PRODUCE_ERRORS_TOTAL, SINK_MESSAGES_TOTAL,
};

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();

        gauge!(KAFKA_PRODUCER_QUEUE_DEPTH).set(stats.msg_cnt as f64);
    }
}

#[derive(Debug, Clone)]
pub struct SinkTopics {
    pub all_records: String,
    pub changed_only: String,
    /// No failed-messages topic means failures are only logged.
    pub failed_messages: Option<String>,
}

impl SinkTopics {
    fn resolve(&self, destination: Destination) -> Option<&str> {
        match destination {
            Destination::AllRecords => Some(&self.all_records),
            Destination::ChangedOnly => Some(&self.changed_only),
            Destination::FailedMessages => self.failed_messages.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topics: SinkTopics,
}

impl KafkaSink {
    pub fn new(
        config: &KafkaConfig,
        topics: SinkTopics,
        liveness: HealthHandle,
    ) -> Result<KafkaSink, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", config.kafka_compression_codec.clone())
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set("enable.idempotence", "true");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(KafkaSink { producer, topics })
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn send(
        &self,
        destination: Destination,
        key: &str,
        value: &str,
    ) -> Result<(), SinkError> {
        let Some(topic) = self.topics.resolve(destination) else {
            debug!(
                "no topic configured for {}, dropping key '{}'",
                destination.as_str(),
                key
            );
            return Ok(());
        };

        let record = FutureRecord {
            topic,
            payload: Some(value),
            partition: None,
            key: Some(key),
            timestamp: None,
            headers: None,
        };

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                counter!(KAFKA_PRODUCE_ERRORS_TOTAL, "destination" => destination.as_str())
                    .increment(1);
                error!("failed to produce to {}: {}", topic, e);
                return Err(classify(e));
            }
        };

        match delivery.await {
            Ok(Ok(_)) => {
                counter!(SINK_MESSAGES_TOTAL, "destination" => destination.as_str())
                    .increment(1);
                Ok(())
            }
            Ok(Err((e, _))) => {
                counter!(KAFKA_PRODUCE_ERRORS_TOTAL, "destination" => destination.as_str())
                    .increment(1);
                error!("failed to produce to {}: {}", topic, e);
                Err(classify(e))
            }
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!(KAFKA_PRODUCE_ERRORS_TOTAL, "destination" => destination.as_str())
                    .increment(1);
                error!("failed to produce to {} before write timeout", topic);
                Err(SinkError::Retryable(format!(
                    "delivery to {topic} timed out"
                )))
            }
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.producer
            .flush(Duration::new(30, 0))
            .map_err(|e| SinkError::Retryable(e.to_string()))
    }
}

fn classify(error: KafkaError) -> SinkError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageSizeTooLarge) => SinkError::NonRetryable(error.to_string()),
        _ => SinkError::Retryable(error.to_string()),
    }
}
