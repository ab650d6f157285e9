//! Expand delimited files named by Kafka messages into keyed records.
//!
//! Every inbound message carries the location of a semicolon-delimited file in object
//! storage. The file is fetched, split into one record per row keyed by a composite
//! business key, and each record is published to the "all records" topic. Records whose
//! content changed since the last time their key was seen are also published to the
//! "changed only" topic, and the state store is updated.

pub mod comparator;
pub mod config;
pub mod consumer;
pub mod error;
pub mod extractor;
pub mod health;
pub mod hooks;
pub mod metrics;
pub mod metrics_consts;
pub mod pipeline;
pub mod record;
pub mod sinks;
pub mod source_ref;
pub mod state;
pub mod storage;
pub mod test_utils;
pub mod worker;
