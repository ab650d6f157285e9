use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use ahash::RandomState;
use tokio::sync::{Mutex, MutexGuard};

use crate::state::{StateStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePolicy {
    /// Propagate whenever the encoded value differs from the stored one.
    Equality,
    /// Propagate only when the numeric field grows past the stored one.
    Timestamp { field: String },
}

impl ChangePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ChangePolicy::Equality => "equality",
            ChangePolicy::Timestamp { .. } => "timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Equality,
    Timestamp,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "equality" => Ok(PolicyKind::Equality),
            "timestamp" => Ok(PolicyKind::Timestamp),
            _ => Err(format!(
                "Unknown change policy: {s}, must be equality or timestamp"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Propagate,
    Suppress,
}

/// Decide whether a new value for a key is an update over the stored one.
///
/// A key with no stored value always propagates, under both policies.
pub fn decide(policy: &ChangePolicy, new_value: &str, old_value: Option<&str>) -> Decision {
    let Some(old_value) = old_value else {
        return Decision::Propagate;
    };
    let changed = match policy {
        ChangePolicy::Equality => new_value != old_value,
        ChangePolicy::Timestamp { field } => {
            extraction_timestamp(new_value, field) > extraction_timestamp(old_value, field)
        }
    };
    if changed {
        Decision::Propagate
    } else {
        Decision::Suppress
    }
}

/// Reads a numeric field from an encoded record. Missing or unparseable fields count as 0.
pub fn extraction_timestamp(encoded: &str, field: &str) -> i64 {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_str::<serde_json::Value>(encoded) else {
        return 0;
    };
    match object.get(field) {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().unwrap_or(0)
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// Striped async locks: two keys may share a stripe, one key always maps to the same one.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
    hasher: RandomState,
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let index = (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

/// Runs the read-decide-emit-write sequence for one key at a time.
pub struct ChangeDetector {
    store: Arc<dyn StateStore>,
    policy: ChangePolicy,
    locks: KeyLocks,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn StateStore>, policy: ChangePolicy, lock_stripes: usize) -> Self {
        Self {
            store,
            policy,
            locks: KeyLocks::new(lock_stripes),
        }
    }

    pub fn policy(&self) -> &ChangePolicy {
        &self.policy
    }

    /// Compares `value` with the stored entry for `key`. On `Propagate`, `emit` runs first
    /// and the entry is only overwritten once it succeeded.
    pub async fn observe<F, Fut, E>(&self, key: &str, value: &str, emit: F) -> Result<Decision, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StoreError>,
    {
        let _guard = self.locks.lock(key).await;

        let previous = self.store.get(key).await?;
        let decision = decide(&self.policy, value, previous.as_deref());
        if decision == Decision::Propagate {
            emit().await?;
            self.store.put(key, value).await?;
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::state::MemoryStateStore;

    fn timestamp_policy() -> ChangePolicy {
        ChangePolicy::Timestamp {
            field: "ExtractionTS".to_string(),
        }
    }

    #[test]
    fn equality_propagates_only_changes() {
        let policy = ChangePolicy::Equality;
        assert_eq!(decide(&policy, "a", None), Decision::Propagate);
        assert_eq!(decide(&policy, "a", Some("b")), Decision::Propagate);
        assert_eq!(decide(&policy, "a", Some("a")), Decision::Suppress);
    }

    #[test]
    fn timestamp_requires_a_newer_extraction() {
        let policy = timestamp_policy();
        let old = r#"{"ExtractionTS":"20240101","v":"1"}"#;

        assert_eq!(
            decide(&policy, r#"{"ExtractionTS":"20240102","v":"1"}"#, Some(old)),
            Decision::Propagate
        );
        assert_eq!(
            decide(&policy, r#"{"ExtractionTS":"20240101","v":"2"}"#, Some(old)),
            Decision::Suppress
        );
        assert_eq!(
            decide(&policy, r#"{"ExtractionTS":"20231231","v":"2"}"#, Some(old)),
            Decision::Suppress
        );
    }

    #[test]
    fn timestamp_treats_missing_fields_as_zero() {
        let policy = timestamp_policy();
        assert_eq!(
            decide(&policy, r#"{"ExtractionTS":"1"}"#, Some(r#"{"v":"1"}"#)),
            Decision::Propagate
        );
        assert_eq!(
            decide(&policy, r#"{"v":"2"}"#, Some(r#"{"v":"1"}"#)),
            Decision::Suppress
        );
        assert_eq!(
            decide(&policy, r#"{"ExtractionTS":"12ab"}"#, Some("not json")),
            Decision::Suppress
        );
    }

    #[test]
    fn timestamp_propagates_first_observation() {
        assert_eq!(
            decide(&timestamp_policy(), r#"{"v":"1"}"#, None),
            Decision::Propagate
        );
    }

    #[test]
    fn reads_numeric_and_string_timestamps() {
        assert_eq!(extraction_timestamp(r#"{"ts":42}"#, "ts"), 42);
        assert_eq!(extraction_timestamp(r#"{"ts":" 42 "}"#, "ts"), 42);
        assert_eq!(extraction_timestamp(r#"{"ts":"-42"}"#, "ts"), 0);
        assert_eq!(extraction_timestamp(r#"{"ts":4.5}"#, "ts"), 4);
        assert_eq!(extraction_timestamp(r#"{"ts":-4.5}"#, "ts"), -4);
        assert_eq!(extraction_timestamp(r#"{"ts":null}"#, "ts"), 0);
        assert_eq!(extraction_timestamp(r#"["ts"]"#, "ts"), 0);
    }

    #[test]
    fn parses_policy_kind() {
        assert_eq!("Timestamp".parse::<PolicyKind>(), Ok(PolicyKind::Timestamp));
        assert_eq!(" equality".parse::<PolicyKind>(), Ok(PolicyKind::Equality));
        assert!("latest".parse::<PolicyKind>().is_err());
    }

    #[tokio::test]
    async fn observe_writes_state_only_on_propagate() {
        let store = Arc::new(MemoryStateStore::new());
        let detector = ChangeDetector::new(store.clone(), ChangePolicy::Equality, 8);
        let emitted = AtomicUsize::new(0);
        let counter = &emitted;
        let emit = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(())
        };

        assert_eq!(detector.observe("k", "A", emit).await.unwrap(), Decision::Propagate);
        assert_eq!(detector.observe("k", "A", emit).await.unwrap(), Decision::Suppress);
        assert_eq!(detector.observe("k", "B", emit).await.unwrap(), Decision::Propagate);

        assert_eq!(emitted.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("B"));
    }

    #[derive(Debug)]
    enum TestError {
        Emit,
        Store,
    }

    impl From<StoreError> for TestError {
        fn from(_: StoreError) -> Self {
            TestError::Store
        }
    }

    #[tokio::test]
    async fn failed_emit_leaves_state_untouched() {
        let store = Arc::new(MemoryStateStore::new());
        let detector = ChangeDetector::new(store.clone(), ChangePolicy::Equality, 8);

        let result = detector
            .observe("k", "A", || async { Err(TestError::Emit) })
            .await;
        assert!(matches!(result, Err(TestError::Emit)));
        assert_eq!(store.get("k").await.unwrap(), None);

        let retried = detector
            .observe("k", "A", || async { Ok::<_, TestError>(()) })
            .await;
        assert!(matches!(retried, Ok(Decision::Propagate)));
    }

    #[tokio::test]
    async fn concurrent_observations_of_one_key_propagate_once() {
        let store = Arc::new(MemoryStateStore::new());
        let detector = Arc::new(ChangeDetector::new(store, ChangePolicy::Equality, 4));
        let emitted = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let detector = detector.clone();
            let emitted = emitted.clone();
            handles.push(tokio::spawn(async move {
                let counter = &emitted;
                detector
                    .observe("same-key", "same-value", move || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok::<_, StoreError>(())
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }
}
