use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::consumer::{Offset, PathConsumer, RecvErr};
use crate::health::HealthHandle;
use crate::metrics_consts::{LANE_BACKPRESSURE_TOTAL, LANE_BACKPRESSURE_WAIT};
use crate::pipeline::{MessageOutcome, Pipeline};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

type Completion = Box<dyn FnOnce(&MessageOutcome) + Send>;

enum Job {
    Process { path: String, on_terminal: Completion },
    /// Runs once every job queued before it in the lane is done.
    Defer(Box<dyn FnOnce() + Send>),
}

#[derive(Debug, thiserror::Error)]
#[error("processing lane {0} is closed")]
pub struct LaneClosed(usize);

/// Sequential processing lanes. All messages of one partition go through the same lane,
/// in the order they were dispatched.
///
/// A full lane holds back its dispatcher. The consumer loop dispatches one message at a
/// time, so while one lane is full no other lane receives new messages either.
pub struct Lanes {
    senders: Vec<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl Lanes {
    pub fn start(pipeline: Arc<Pipeline>, count: usize, capacity: usize) -> Self {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for lane in 0..count {
            let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    match job {
                        Job::Process { path, on_terminal } => {
                            let outcome = pipeline.process(&path).await;
                            on_terminal(&outcome);
                        }
                        Job::Defer(action) => action(),
                    }
                }
                info!(lane, "processing lane drained");
            }));
            senders.push(tx);
        }

        Self { senders, handles }
    }

    pub fn lane_for(&self, partition: i32) -> usize {
        partition.rem_euclid(self.senders.len() as i32) as usize
    }

    /// Queues a message, waiting while its lane is full. `on_terminal` runs once the
    /// message reached `Done` or `Failed`.
    pub async fn dispatch<F>(
        &self,
        partition: i32,
        path: String,
        on_terminal: F,
    ) -> Result<(), LaneClosed>
    where
        F: FnOnce(&MessageOutcome) + Send + 'static,
    {
        let job = Job::Process {
            path,
            on_terminal: Box::new(on_terminal),
        };
        self.enqueue(partition, job).await
    }

    /// Queues `action` behind the messages already dispatched for `partition`.
    pub async fn defer<F>(&self, partition: i32, action: F) -> Result<(), LaneClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(partition, Job::Defer(Box::new(action))).await
    }

    async fn enqueue(&self, partition: i32, job: Job) -> Result<(), LaneClosed> {
        let lane = self.lane_for(partition);
        let sender = &self.senders[lane];

        let waited_from = if sender.capacity() == 0 {
            counter!(LANE_BACKPRESSURE_TOTAL, "lane" => lane.to_string()).increment(1);
            Some(Instant::now())
        } else {
            None
        };

        sender.send(job).await.map_err(|_| LaneClosed(lane))?;

        if let Some(started) = waited_from {
            histogram!(LANE_BACKPRESSURE_WAIT, "lane" => lane.to_string())
                .record(started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    /// Stops accepting messages and waits for the queued ones.
    pub async fn drain(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("processing lane panicked: {}", e);
            }
        }
    }
}

fn store(offset: Offset) {
    let partition = offset.partition();
    if let Err(e) = offset.store() {
        error!(partition, "failed to store offset: {}", e);
    }
}

/// Polls path messages until `shutdown` resolves, then drains the lanes. Offsets are
/// stored in lane order once their message reached a terminal state, poisoned ones
/// included.
pub async fn run(
    consumer: PathConsumer,
    lanes: Lanes,
    liveness: HealthHandle,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, no longer polling");
                break;
            }
            _ = heartbeat.tick() => liveness.report_healthy().await,
            received = consumer.recv() => {
                liveness.report_healthy().await;
                let (path, offset) = match received {
                    Ok(message) => message,
                    Err(RecvErr::Kafka(e)) => {
                        error!("failed to receive from kafka: {}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("dropping poisoned message: {}", e);
                        let Some(offset) = e.into_offset() else {
                            continue;
                        };
                        let partition = offset.partition();
                        if let Err(e) = lanes.defer(partition, move || store(offset)).await {
                            error!("{}", e);
                            break;
                        }
                        continue;
                    }
                };

                let partition = offset.partition();
                let stored = move |_: &MessageOutcome| store(offset);
                if let Err(e) = lanes.dispatch(partition, path, stored).await {
                    error!("{}", e);
                    break;
                }
            }
        }
    }

    lanes.drain().await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::comparator::{ChangeDetector, ChangePolicy};
    use crate::extractor::TabularExtractor;
    use crate::sinks::Destination;
    use crate::state::MemoryStateStore;
    use crate::test_utils::{MemoryObjectStore, RecordingSink};

    const LANE_CAPACITY: usize = 16;

    fn pipeline(objects: Arc<MemoryObjectStore>, sink: Arc<RecordingSink>) -> Arc<Pipeline> {
        let detector = ChangeDetector::new(
            Arc::new(MemoryStateStore::new()),
            ChangePolicy::Equality,
            16,
        );
        Arc::new(Pipeline::new(
            objects,
            TabularExtractor::new(vec!["id".to_string()]),
            sink,
            detector,
        ))
    }

    #[tokio::test]
    async fn partitions_map_to_stable_lanes() {
        let lanes = Lanes::start(
            pipeline(Arc::new(MemoryObjectStore::new()), Arc::new(RecordingSink::new())),
            4,
            LANE_CAPACITY,
        );

        assert_eq!(lanes.lane_for(0), 0);
        assert_eq!(lanes.lane_for(5), 1);
        assert_eq!(lanes.lane_for(-1), 3);
        lanes.drain().await;
    }

    #[tokio::test]
    async fn one_partition_is_processed_in_order() {
        let objects = Arc::new(MemoryObjectStore::new());
        let sink = Arc::new(RecordingSink::new());
        for version in 0..10 {
            objects.insert(
                &format!("bucket/{version}.csv"),
                format!("id;version\n1;{version}\n"),
            );
        }
        let lanes = Lanes::start(pipeline(objects, sink.clone()), 3, LANE_CAPACITY);

        let completed = Arc::new(Mutex::new(Vec::new()));
        for version in 0..10 {
            let completed = completed.clone();
            lanes
                .dispatch(7, format!("bucket/{version}.csv"), move |outcome| {
                    assert!(outcome.is_done());
                    completed.lock().unwrap().push(version);
                })
                .await
                .unwrap();
        }
        lanes.drain().await;

        assert_eq!(*completed.lock().unwrap(), (0..10).collect::<Vec<_>>());
        // Every version differs from the previous one.
        assert_eq!(sink.sent_to(Destination::ChangedOnly).len(), 10);
        let last = sink.sent_to(Destination::ChangedOnly).pop().unwrap();
        assert!(last.1.contains(r#""version":"9""#));
    }

    #[tokio::test]
    async fn failed_messages_still_complete() {
        let lanes = Lanes::start(
            pipeline(Arc::new(MemoryObjectStore::new()), Arc::new(RecordingSink::new())),
            2,
            LANE_CAPACITY,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        lanes
            .dispatch(0, "bucket/missing.csv".to_string(), move |outcome| {
                tx.send(outcome.is_done()).unwrap();
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(false));
        lanes.drain().await;
    }

    #[tokio::test]
    async fn deferred_actions_wait_for_earlier_messages() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.insert("bucket/a.csv", "id;name\n1;alice\n");
        objects.delay_by(Duration::from_millis(200));
        let lanes = Lanes::start(
            pipeline(objects, Arc::new(RecordingSink::new())),
            2,
            LANE_CAPACITY,
        );

        let order = Arc::new(Mutex::new(Vec::new()));
        let processed = order.clone();
        lanes
            .dispatch(0, "bucket/a.csv".to_string(), move |outcome| {
                assert!(outcome.is_done());
                processed.lock().unwrap().push("offset 10");
            })
            .await
            .unwrap();
        let deferred = order.clone();
        lanes
            .defer(0, move || deferred.lock().unwrap().push("offset 11"))
            .await
            .unwrap();
        lanes.drain().await;

        assert_eq!(*order.lock().unwrap(), vec!["offset 10", "offset 11"]);
    }

    #[tokio::test]
    async fn full_lane_holds_back_dispatch() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.insert("bucket/a.csv", "id;name\n1;alice\n");
        objects.delay_by(Duration::from_millis(300));
        let lanes = Lanes::start(pipeline(objects, Arc::new(RecordingSink::new())), 2, 1);

        // One message in progress, one queued.
        for _ in 0..2 {
            lanes
                .dispatch(0, "bucket/a.csv".to_string(), |_| {})
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            lanes.dispatch(2, "bucket/a.csv".to_string(), |_| {}),
        )
        .await;
        assert!(blocked.is_err());

        let other_lane = tokio::time::timeout(
            Duration::from_millis(50),
            lanes.dispatch(1, "bucket/a.csv".to_string(), |_| {}),
        )
        .await;
        assert!(matches!(other_lane, Ok(Ok(()))));
        lanes.drain().await;
    }
}
