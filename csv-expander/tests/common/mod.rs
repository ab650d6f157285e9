use std::sync::Arc;

use csv_expander::comparator::{ChangeDetector, ChangePolicy};
use csv_expander::extractor::TabularExtractor;
use csv_expander::pipeline::Pipeline;
use csv_expander::state::StateStore;
use csv_expander::test_utils::{FixedClock, MemoryObjectStore, RecordingHooks, RecordingSink};
use time::macros::datetime;

pub const ORDERS_HEADER: &str = "o_orderkey;o_custkey;o_orderstatus;o_totalprice;o_orderdate";

pub struct TestPipeline {
    pub objects: Arc<MemoryObjectStore>,
    pub sink: Arc<RecordingSink>,
    pub hooks: Arc<RecordingHooks>,
    pub pipeline: Pipeline,
}

pub fn orders_pipeline(state: Arc<dyn StateStore>, policy: ChangePolicy) -> TestPipeline {
    let objects = Arc::new(MemoryObjectStore::new());
    let sink = Arc::new(RecordingSink::new());
    let hooks = Arc::new(RecordingHooks::new());

    let pipeline = Pipeline::new(
        objects.clone(),
        TabularExtractor::new(vec!["o_orderkey".to_string(), "o_custkey".to_string()]),
        sink.clone(),
        ChangeDetector::new(state, policy, 64),
    )
    .with_hooks(hooks.clone())
    .with_clock(Arc::new(FixedClock(datetime!(2024-01-02 03:04:05 UTC))));

    TestPipeline {
        objects,
        sink,
        hooks,
        pipeline,
    }
}

pub fn orders_file(rows: &[&str]) -> String {
    let mut content = String::from(ORDERS_HEADER);
    for row in rows {
        content.push('\n');
        content.push_str(row);
    }
    content.push('\n');
    content
}
