// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for resource-sync.
//!
//! Uses proptest to generate random documents, label sets and conflict
//! counts and verify the merge and retry invariants.

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use resource_sync::resource::merge_patch;
use resource_sync::store::memory::Operation;
use resource_sync::{Error, MemoryStore, MergeEngine, MergePolicy, ResourceHandle};

use common::{DocumentBuilder, widget};

/// Run an async test body on a fresh single-threaded runtime.
fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Strategy for label maps whose keys share a prefix.
fn labels(prefix: &'static str) -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        "[a-z]{1,6}".prop_map(move |k| format!("{prefix}{k}")),
        "[a-z0-9]{1,8}",
        0..6,
    )
}

/// Strategy for JSON leaf values.
fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

/// Strategy for nested, null-free JSON objects.
fn object() -> impl Strategy<Value = Map<String, Value>> {
    let value = leaf().prop_recursive(3, 16, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    });
    prop::collection::btree_map("[a-z]{1,4}", value, 0..5).prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Applying the diff between two documents yields the second.
    #[test]
    fn merge_patch_diff_reaches_target(base in object(), desired in object()) {
        let base = Value::Object(base);
        let desired = Value::Object(desired);
        let mut patched = base.clone();
        merge_patch::apply(&mut patched, &merge_patch::diff(&base, &desired));
        prop_assert_eq!(patched, desired);
    }

    /// Created documents read back with exactly the requested spec.
    #[test]
    fn apply_unbound_round_trips_spec(desired in object()) {
        block_on(async {
            let store = MemoryStore::new();
            let mut handle = ResourceHandle::new(store.clone(), widget("p"), desired.clone());
            MergeEngine::default().apply(&mut handle).await.unwrap();
            handle.load().await.unwrap();
            assert_eq!(handle.spec(), &desired);
        });
    }

    /// After an apply that raced a labelling controller, remote labels are
    /// the union of pre-apply, concurrent and local labels, local winning.
    #[test]
    fn apply_never_loses_remote_labels(
        remote in labels("r-"),
        concurrent in labels("c-"),
        local in labels("r-"),
        replicas in 1i64..10,
    ) {
        block_on(async {
            let store = MemoryStore::new();
            store.insert(&widget("p"), DocumentBuilder::new("p").labels(remote.clone()).build());
            let mut handle = ResourceHandle::existing(store.clone(), widget("p"));
            handle.load().await.unwrap();
            handle.set_spec_field("replicas", json!(replicas));
            handle.labels_mut().extend(local.clone());

            let injected = concurrent.clone();
            store.interleave_writes(&widget("p"), 1, move |doc| {
                doc.labels_mut().extend(injected.clone());
            });
            MergeEngine::default().apply(&mut handle).await.unwrap();

            let stored = store.snapshot(&widget("p")).unwrap().document;
            let final_labels = stored.labels().cloned().unwrap_or_default();
            let mut expected = remote.clone();
            expected.extend(concurrent.clone());
            expected.extend(local.clone());
            for (key, value) in &expected {
                assert_eq!(final_labels.get(key), Some(value), "label {key}");
            }
            assert_eq!(stored.spec["replicas"], replicas);
        });
    }

    /// Fewer conflicts than the ceiling converge; as many exhaust it.
    #[test]
    fn apply_retries_are_bounded(max_attempts in 1u32..12, conflicts in 0u32..16) {
        block_on(async {
            let store = MemoryStore::new();
            store.insert(&widget("p"), DocumentBuilder::new("p").replicas(1).build());
            let mut handle = ResourceHandle::existing(store.clone(), widget("p"));
            handle.load().await.unwrap();
            handle.set_spec_field("replicas", json!(2));
            store.interleave_writes(&widget("p"), conflicts, |doc| {
                doc.status.insert("tick".into(), json!(1));
            });

            let result = MergeEngine::new(MergePolicy { max_attempts }).apply(&mut handle).await;
            let patches = store.write_count(Operation::Patch) as u32;
            if conflicts < max_attempts {
                assert!(result.is_ok());
                assert_eq!(patches, conflicts + 1);
            } else {
                assert!(matches!(result, Err(Error::MergeExhausted { attempts, .. }) if attempts == max_attempts));
                assert_eq!(patches, max_attempts);
            }
        });
    }
}
