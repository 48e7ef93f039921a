//! Multi-step flows: a test driver and a controller sharing one resource.

use std::time::Duration;

use resource_sync::store::memory::Operation;
use resource_sync::{
    Applied, BindingState, ConvergencePoller, MemoryStore, MergeEngine, ResourceHandle,
    StandardPhase, SyncConfig, WaitOptions,
};
use serde_json::json;

use crate::common::{SimulatedController, init_tracing, spec, widget};

#[tokio::test(start_paused = true)]
async fn test_concurrent_label_survives_scale_up() {
    init_tracing();
    let store = MemoryStore::new();
    let engine = MergeEngine::default();

    // Create with replicas=1
    let mut handle = ResourceHandle::new(store.clone(), widget("db"), spec(json!({"replicas": 1})));
    assert_eq!(engine.apply(&mut handle).await.unwrap(), Applied::Created);
    handle.load().await.unwrap();
    assert_eq!(handle.binding(), BindingState::Bound);
    assert_eq!(handle.spec()["replicas"], 1);

    // Scale to 3 while another actor labels the resource
    handle.set_spec_field("replicas", json!(3));
    store.interleave_writes(&widget("db"), 1, |doc| {
        doc.labels_mut().insert("team".into(), "ops".into());
    });
    engine.apply(&mut handle).await.unwrap();

    let stored = store.snapshot(&widget("db")).unwrap().document;
    assert_eq!(stored.spec["replicas"], 3);
    assert_eq!(stored.labels().unwrap()["team"], "ops");
}

#[tokio::test(start_paused = true)]
async fn test_label_added_between_load_and_apply_survives() {
    let store = MemoryStore::new();
    let engine = MergeEngine::default();
    let mut handle = ResourceHandle::new(store.clone(), widget("db"), spec(json!({"replicas": 1})));
    engine.apply(&mut handle).await.unwrap();

    handle.set_spec_field("replicas", json!(3));
    store
        .mutate(&widget("db"), |doc| {
            doc.labels_mut().insert("team".into(), "ops".into());
        })
        .unwrap();
    let applied = engine.apply(&mut handle).await.unwrap();

    assert_eq!(applied, Applied::Patched { attempts: 2 });
    let stored = store.snapshot(&widget("db")).unwrap().document;
    assert_eq!(stored.spec["replicas"], 3);
    assert_eq!(stored.labels().unwrap()["team"], "ops");
}

#[tokio::test(start_paused = true)]
async fn test_apply_then_wait_for_reconciliation() {
    init_tracing();
    let store = MemoryStore::new();
    let _controller = SimulatedController::spawn(
        store.clone(),
        widget("db"),
        Duration::from_secs(1),
        Duration::from_secs(20),
    );
    let engine = MergeEngine::default();
    let poller = ConvergencePoller::new();
    let options = WaitOptions::default().with_timeout(Duration::from_secs(120));

    let mut handle = ResourceHandle::new(store.clone(), widget("db"), spec(json!({"replicas": 1})));
    engine.apply(&mut handle).await.unwrap();
    poller
        .wait_for_phase(&mut handle, StandardPhase::Running, &options)
        .await
        .unwrap();

    // Change the spec; make sure the controller picked it up before waiting
    // for it to converge again.
    handle.set_spec_field("replicas", json!(3));
    engine.apply(&mut handle).await.unwrap();
    poller
        .abandons_phase(&mut handle, StandardPhase::Running, Duration::from_secs(30))
        .await
        .unwrap();
    poller
        .wait_for_phase(&mut handle, StandardPhase::Running, &options)
        .await
        .unwrap();

    let observation = handle.document().phase_observation();
    assert_eq!(observation.observed_generation, handle.document().generation());
    assert_eq!(handle.spec()["replicas"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_and_wait_for_removal() {
    let store = MemoryStore::new();
    let engine = MergeEngine::default();
    let mut handle = ResourceHandle::new(store.clone(), widget("db"), spec(json!({"replicas": 1})));
    engine.apply(&mut handle).await.unwrap();

    handle.delete().await.unwrap();
    ConvergencePoller::new()
        .wait_for_deletion(
            handle.store(),
            handle.identity(),
            &WaitOptions::default().with_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    // A retired handle never resurrects the resource.
    assert!(engine.apply(&mut handle).await.is_err());
    assert_eq!(store.write_count(Operation::Create), 1);
    assert!(store.snapshot(&widget("db")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_config_policies_drive_components() {
    let config = SyncConfig {
        max_merge_attempts: 2,
        poll_interval: Duration::from_secs(1),
        wait_timeout: Duration::from_secs(5),
        ..SyncConfig::default()
    };
    let store = MemoryStore::new();
    let engine = MergeEngine::new(config.merge_policy());
    let mut handle = ResourceHandle::new(store.clone(), widget("db"), spec(json!({"replicas": 1})))
        .with_reload_policy(config.reload_policy());
    engine.apply(&mut handle).await.unwrap();

    store.interleave_writes(&widget("db"), 2, |doc| {
        doc.status.insert("tick".into(), json!(1));
    });
    handle.set_spec_field("replicas", json!(2));
    assert!(engine.apply(&mut handle).await.is_err());
    assert_eq!(store.write_count(Operation::Patch), 2);

    let err = ConvergencePoller::new()
        .wait_for_phase(&mut handle, StandardPhase::Running, &config.wait_options())
        .await
        .unwrap_err();
    assert!(matches!(err, resource_sync::Error::Timeout { .. }));
}
