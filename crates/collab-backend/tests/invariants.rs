//! Property tests for the quantified invariants 1, 4, and 5: exactly-once
//! delivery to a full-range subscriber, schema hash determinism, and
//! exactly-one-winner among version-contesting concurrent submits.

use collab_backend::{BackendConfig, ContentBackend, InProcessBus, MemoryStore};
use collab_core::content_type::JsonMergeContentType;
use collab_core::error::CoreError;
use collab_core::ids::{OperationKey, SchemaRef, MAX_VERSION};
use collab_core::model::{Operation, OperationMeta, Schema};
use futures::StreamExt;
use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;

fn tokio_rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn backend() -> Arc<ContentBackend> {
    let store: Arc<dyn collab_core::store::ContentStore> = Arc::new(MemoryStore::new());
    let bus = Arc::new(InProcessBus::new());
    let mut backend = ContentBackend::new(store, bus, BackendConfig::default());
    backend.register_content_type("counter", Arc::new(JsonMergeContentType::new()));
    Arc::new(backend)
}

fn op(version: u64, data: i64) -> Operation {
    Operation {
        key: OperationKey::new(),
        content_type: "counter".into(),
        id: "doc-1".into(),
        version,
        schema: SchemaRef::empty(),
        data: Value::from(data),
        meta: OperationMeta::new(None, None, chrono::Utc::now()),
    }
}

proptest! {
    /// Invariant 1: every successful submit with `version == currentMax + 1`
    /// is observed exactly once, at that version, by a subscriber on the
    /// full range.
    #[test]
    fn invariant_1_exactly_once_delivery(values in prop::collection::vec(any::<i64>(), 1..30)) {
        let rt = tokio_rt();
        let result: Result<(), proptest::test_runner::TestCaseError> = rt.block_on(async {
            let backend = backend();
            let mut stream = backend.stream_operations("counter", "doc-1", 1, MAX_VERSION).await.unwrap();

            for (idx, value) in values.iter().enumerate() {
                let version = idx as u64 + 1;
                backend.submit_operation(op(version, *value)).await.unwrap();
            }

            let mut seen = Vec::new();
            for _ in 0..values.len() {
                let item = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
                    .await
                    .expect("subscriber must observe every successful submit")
                    .expect("stream must not end before version_end")
                    .expect("delivered operation must not be an error");
                seen.push(item.version);
            }

            let expected: Vec<u64> = (1..=values.len() as u64).collect();
            prop_assert_eq!(seen, expected, "each version must be observed exactly once, in order");
            Ok(())
        });
        result?;
    }

    /// Invariant 4: `createSchemaHash(type, data)` is deterministic —
    /// equal `(type, data)` hashes equal, and a change in either input
    /// changes the hash.
    #[test]
    fn invariant_4_schema_hash_determinism(
        content_type in "[a-z]{1,12}",
        other_content_type in "[a-z]{1,12}",
        value in any::<i64>(),
        other_value in any::<i64>(),
    ) {
        let a = Schema::new(content_type.clone(), Value::from(value), Value::Null);
        let b = Schema::new(content_type.clone(), Value::from(value), Value::Null);
        prop_assert_eq!(a.hash.clone(), b.hash.clone(), "identical (type, data) must hash equal");

        if other_content_type != content_type {
            let c = Schema::new(other_content_type, Value::from(value), Value::Null);
            prop_assert_ne!(a.hash.clone(), c.hash, "a changed content_type must change the hash");
        }
        if other_value != value {
            let d = Schema::new(content_type, Value::from(other_value), Value::Null);
            prop_assert_ne!(a.hash, d.hash, "changed data must change the hash");
        }
    }

    /// Invariant 5: of N concurrent submits contesting the same next
    /// version, exactly one succeeds; the rest resolve to
    /// `AlreadyExists{key=version, value=winnerVersion}`, and a subscriber
    /// has the winning operation in hand by the time its own submit call
    /// returns.
    #[test]
    fn invariant_5_exactly_one_winner_among_contesting_submits(contestants in 2usize..6) {
        let rt = tokio_rt();
        let result: Result<(), proptest::test_runner::TestCaseError> = rt.block_on(async {
            let backend = backend();
            backend.submit_operation(op(1, 0)).await.unwrap();

            let mut stream = backend.stream_operations("counter", "doc-1", 1, MAX_VERSION).await.unwrap();
            assert_eq!(stream.next().await.unwrap().unwrap().version, 1);

            let mut handles = Vec::new();
            for i in 0..contestants {
                let backend = Arc::clone(&backend);
                handles.push(tokio::spawn(async move { backend.submit_operation(op(2, i as i64 * 10)).await }));
            }

            let mut successes = 0;
            let mut conflict_values = Vec::new();
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(()) => successes += 1,
                    Err(CoreError::AlreadyExists { key, value, .. }) => {
                        prop_assert_eq!(&key, "version");
                        conflict_values.push(value);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
            }

            prop_assert_eq!(successes, 1, "exactly one contestant must win the next version");
            prop_assert_eq!(conflict_values.len(), contestants - 1);
            for value in conflict_values {
                prop_assert_eq!(value, "2", "losers observe the winner's version as currentMax");
            }

            let winning_op = stream.next().await.unwrap().unwrap();
            prop_assert_eq!(winning_op.version, 2, "subscriber must have advanced past the winner");
            Ok(())
        });
        result?;
    }
}
