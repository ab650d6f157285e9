use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use axum::{routing::get, Router};
use csv_expander::{
    comparator::ChangeDetector,
    config::{Config, StorageBackend},
    consumer::PathConsumer,
    extractor::TabularExtractor,
    health::HealthRegistry,
    metrics::{serve, setup_metrics_router},
    pipeline::Pipeline,
    sinks::{KafkaSink, PrintSink, RecordSink},
    state::{MemoryStateStore, RocksDbStateStore, StateStore},
    storage::{FolderObjectStore, ObjectStore, S3ObjectStore},
    worker::{self, Lanes},
};
use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "csv expander"
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("invalid configuration")?;

    let mut term = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };
        info!("Shutting down gracefully...");
    };

    let health = HealthRegistry::new();
    let consumer_liveness = health
        .register("consumer", Duration::from_secs(60))
        .await;

    let sink: Arc<dyn RecordSink> = if config.print_sink {
        Arc::new(PrintSink {})
    } else {
        let producer_liveness = health.register("rdkafka", Duration::from_secs(30)).await;
        Arc::new(
            KafkaSink::new(&config.kafka, config.sink_topics(), producer_liveness)
                .context("failed to create kafka sink")?,
        )
    };

    let objects: Arc<dyn ObjectStore> = match config.storage.object_storage_backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::from_config(&config.storage).await),
        StorageBackend::Folder => Arc::new(FolderObjectStore::new(
            &config.storage.object_storage_root,
        )),
    };

    let state: Arc<dyn StateStore> = match &config.state_store_path {
        Some(path) => {
            info!("opening state store at {}", path);
            Arc::new(RocksDbStateStore::open(path).context("failed to open state store")?)
        }
        None => Arc::new(MemoryStateStore::new()),
    };

    let policy = config.change_policy();
    info!(
        policy = policy.name(),
        key_columns = ?config.key_columns.0,
        "building pipeline"
    );
    let detector = ChangeDetector::new(state, policy, config.key_lock_stripes);
    let pipeline = Pipeline::new(
        objects,
        TabularExtractor::new(config.key_columns.0.clone()),
        sink.clone(),
        detector,
    )
    .with_schemes(config.source_schemes.0.clone())
    .with_fetch_timeout(config.fetch_timeout_ms.0);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get({
                let health = health.clone();
                move || ready(health.get_status())
            }),
        )
        .merge(setup_metrics_router().context("failed to install metrics recorder")?);
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, e);
        }
    });

    let consumer = PathConsumer::new(&config.kafka, &config.input_topic)
        .context("failed to create kafka consumer")?;
    let lanes = Lanes::start(
        Arc::new(pipeline),
        config.worker_lanes,
        config.worker_lane_capacity,
    );
    info!(
        "consuming {} with {} lanes",
        config.input_topic, config.worker_lanes
    );

    worker::run(consumer, lanes, consumer_liveness, shutdown).await;

    if let Err(e) = sink.flush() {
        error!("failed to flush sink: {}", e);
    }
    info!("Exiting");

    Ok(())
}
