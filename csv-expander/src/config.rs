use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::comparator::{ChangePolicy, PolicyKind};
use crate::sinks::kafka::SinkTopics;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub storage: StorageConfig,

    #[envconfig(default = "local-input-topic")]
    pub input_topic: String,

    // Receives every extracted record
    #[envconfig(default = "local-stream-topic")]
    pub output_topic: String,

    // Receives records whose content changed
    #[envconfig(default = "local-updates-only-topic")]
    pub update_topic: String,

    pub failed_messages_topic: Option<String>,

    #[envconfig(default = "o_orderkey,o_custkey")]
    pub key_columns: CommaList,

    #[envconfig(default = "s3,cos")]
    pub source_schemes: CommaList,

    #[envconfig(default = "equality")]
    pub change_policy: PolicyKind,

    #[envconfig(default = "ExtractionTS")]
    pub extraction_timestamp_field: String,

    #[envconfig(default = "30000")]
    pub fetch_timeout_ms: EnvMsDuration,

    // RocksDB directory, the state is kept in memory when unset
    pub state_store_path: Option<String>,

    #[envconfig(default = "4")]
    pub worker_lanes: usize,

    // Messages queued per lane before polling waits
    #[envconfig(default = "64")]
    pub worker_lane_capacity: usize,

    #[envconfig(default = "1024")]
    pub key_lock_stripes: usize,

    #[envconfig(default = "false")]
    pub print_sink: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn change_policy(&self) -> ChangePolicy {
        match self.change_policy {
            PolicyKind::Equality => ChangePolicy::Equality,
            PolicyKind::Timestamp => ChangePolicy::Timestamp {
                field: self.extraction_timestamp_field.clone(),
            },
        }
    }

    pub fn sink_topics(&self) -> SinkTopics {
        SinkTopics {
            all_records: self.output_topic.clone(),
            changed_only: self.update_topic.clone(),
            failed_messages: self
                .failed_messages_topic
                .clone()
                .filter(|topic| !topic.trim().is_empty()),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "cos-csv-expander-app")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

#[derive(Envconfig, Clone)]
pub struct StorageConfig {
    #[envconfig(default = "s3")]
    pub object_storage_backend: StorageBackend,

    pub object_storage_endpoint: Option<String>,

    #[envconfig(default = "eu-fr2")]
    pub object_storage_region: String,

    pub object_storage_access_key_id: Option<String>,

    pub object_storage_secret_access_key: Option<String>,

    // IBM COS and MinIO need path-style addressing
    #[envconfig(default = "true")]
    pub object_storage_path_style: bool,

    #[envconfig(default = "./data")]
    pub object_storage_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Folder,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "s3" => Ok(StorageBackend::S3),
            "folder" => Ok(StorageBackend::Folder),
            _ => Err(format!("Unknown storage backend: {s}, must be s3 or folder")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Ordered, comma separated and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommaList(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct EmptyListError;

impl FromStr for CommaList {
    type Err = EmptyListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let items: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect();
        if items.is_empty() {
            Err(EmptyListError)
        } else {
            Ok(CommaList(items))
        }
    }
}
