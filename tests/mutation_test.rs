//! Optimistic mutations sent through the real coordinator and transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, RecordingTransport};
use parking_lot::Mutex;
use presage_core::config::CoreConfig;
use presage_core::connectivity::ConnectivitySignal;
use presage_core::mutation::{
    MutationError, MutationEvent, MutationOutcome, MutationRequest, MutationStatus,
    ProceedOnConflict, RemoteEffect,
};
use presage_core::Core;
use serde_json::{json, Value};

type Doc = Arc<Mutex<Value>>;

fn edit(doc: &Doc, id: &str, title: &str) -> MutationRequest {
    let (apply_doc, rollback_doc, snapshot_doc) = (doc.clone(), doc.clone(), doc.clone());
    let applied = title.to_string();
    MutationRequest::new(
        "note:1",
        move || apply_doc.lock()["title"] = json!(applied),
        RemoteEffect::request("PUT /notes", json!({ "id": id, "title": title })),
    )
    .with_id(id)
    .with_snapshot(move || snapshot_doc.lock().clone())
    .with_rollback(move |snapshot: &Value| *rollback_doc.lock() = snapshot.clone())
}

fn core(transport: Arc<RecordingTransport>, signal: ConnectivitySignal) -> Core {
    let mut config = CoreConfig::default();
    config.scheduler.pool_size = 2;
    config.mutation.max_retries = 1;
    config.mutation.retry_delay = Duration::from_millis(1);
    Core::builder(transport, Arc::new(ProceedOnConflict))
        .config(config)
        .connectivity(signal)
        .build()
}

#[tokio::test]
async fn test_committed_edit_reaches_transport_uncached() {
    let transport = Arc::new(RecordingTransport::default());
    let core = core(transport.clone(), ConnectivitySignal::new(true));
    let doc: Doc = Arc::new(Mutex::new(json!({ "title": "draft" })));

    for id in ["m1", "m2"] {
        let outcome = core.mutations().update(edit(&doc, id, "final")).await.unwrap();
        assert!(matches!(outcome, MutationOutcome::Committed { .. }));
    }

    // Writes bypass the cache; every update reaches the transport.
    assert_eq!(transport.ids_for("PUT /notes"), ["m1", "m2"]);
    assert_eq!(doc.lock()["title"], "final");
    assert!(core.mutations().can_undo());
}

#[tokio::test]
async fn test_rejected_edit_rolls_back_local_state() {
    let transport = Arc::new(RecordingTransport::default());
    transport.fail_next("m1", 5);
    let core = core(transport.clone(), ConnectivitySignal::new(true));
    let doc: Doc = Arc::new(Mutex::new(json!({ "title": "draft", "tags": ["a"] })));
    let before = doc.lock().clone();

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let sink = events.clone();
    core.mutations().subscribe(Arc::new(move |e: &MutationEvent| sink.lock().push(e.kind())));

    let err = core.mutations().update(edit(&doc, "m1", "lost")).await.unwrap_err();

    assert!(matches!(err, MutationError::RolledBack { .. }));
    assert_eq!(*doc.lock(), before);
    // One initial send plus one retry.
    assert_eq!(transport.ids_for("PUT /notes").len(), 2);
    assert_eq!(core.mutations().record("m1").unwrap().status, MutationStatus::RolledBack);
    assert_eq!(*events.lock(), ["failure", "rollback"]);
    assert!(!core.mutations().can_undo());
}

#[tokio::test]
async fn test_reconnect_replays_queue_in_submission_order() {
    let transport = Arc::new(RecordingTransport::default());
    transport.fail_next("b", 1);
    let signal = ConnectivitySignal::new(false);
    let core = core(transport.clone(), signal.clone());
    core.start().await.unwrap();
    let doc: Doc = Arc::new(Mutex::new(json!({ "title": "draft" })));

    for id in ["a", "b", "c"] {
        let outcome = core.mutations().update(edit(&doc, id, id)).await.unwrap();
        assert!(outcome.is_queued());
    }
    assert_eq!(doc.lock()["title"], "c");
    assert_eq!(transport.call_count(), 0);

    signal.set_online(true);
    let committed = |id: &str| {
        core.mutations().record(id).map(|r| r.status) == Some(MutationStatus::Committed)
    };
    wait_until(|| committed("c")).await;
    assert_eq!(transport.ids_for("PUT /notes")[..3], ["a", "b", "c"]);
    assert_eq!(core.mutations().offline_queue_ids(), ["b"]);

    // The failed entry went to the tail; the next pass sends it.
    let report = core.mutations().drain_offline_queue().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(transport.ids_for("PUT /notes"), ["a", "b", "c", "b"]);
    assert!(["a", "b", "c"].into_iter().all(committed));
    // Local state was never rolled back.
    assert_eq!(doc.lock()["title"], "c");

    core.shutdown(Duration::from_secs(1)).await;
}
