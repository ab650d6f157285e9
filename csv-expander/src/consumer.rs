use std::sync::{Arc, Weak};

use metrics::counter;
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::KafkaConfig;
use crate::metrics_consts::POISONED_MESSAGES_TOTAL;

/// Consumes path messages from one topic. Offsets are only stored on request.
#[derive(Clone)]
pub struct PathConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty(Offset),
    #[error("Payload is not UTF-8: {source}")]
    Utf8 {
        offset: Offset,
        #[source]
        source: std::str::Utf8Error,
    },
}

impl RecvErr {
    /// Offset of a poisoned message, to be stored once every earlier message of its
    /// partition is done.
    pub fn into_offset(self) -> Option<Offset> {
        match self {
            RecvErr::Kafka(_) => None,
            RecvErr::Empty(offset) | RecvErr::Utf8 { offset, .. } => Some(offset),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

impl PathConsumer {
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        let inner = Inner {
            consumer,
            topic: topic.to_string(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Next path message and the offset to store once it reached a terminal state.
    ///
    /// Empty and non UTF-8 payloads are poison pills. Their offset comes back in the
    /// error and is never stored here.
    pub async fn recv(&self) -> Result<(String, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            counter!(POISONED_MESSAGES_TOTAL, "reason" => "empty").increment(1);
            return Err(RecvErr::Empty(offset));
        };

        match std::str::from_utf8(payload) {
            Ok(path) => Ok((path.to_string(), offset)),
            Err(source) => {
                counter!(POISONED_MESSAGES_TOTAL, "reason" => "not_utf8").increment(1);
                Err(RecvErr::Utf8 { offset, source })
            }
        }
    }
}

#[derive(Debug)]
pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
