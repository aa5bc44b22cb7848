//! End-to-end lifecycle of the wired core.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingTransport;
use parking_lot::Mutex;
use presage_core::config::CoreConfig;
use presage_core::connectivity::ConnectivitySignal;
use presage_core::health::HealthState;
use presage_core::mutation::{MutationError, MutationRequest, ProceedOnConflict, RemoteEffect};
use presage_core::persistence::FileStore;
use presage_core::prefetch::AccessContext;
use presage_core::shutdown::{ShutdownResult, ShutdownState};
use presage_core::{Core, StartReport};
use serde_json::json;

fn config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.scheduler.pool_size = 2;
    config.mutation.retry_delay = Duration::from_millis(1);
    config
}

fn core(transport: Arc<RecordingTransport>, store: FileStore, signal: ConnectivitySignal) -> Core {
    Core::builder(transport, Arc::new(ProceedOnConflict))
        .config(config())
        .persistence(Arc::new(store))
        .connectivity(signal)
        .build()
}

fn rename(titles: &Arc<Mutex<Vec<String>>>, id: &str) -> MutationRequest {
    let titles = titles.clone();
    let title = format!("title {id}");
    let applied = title.clone();
    MutationRequest::new(
        format!("note:{id}"),
        move || titles.lock().push(applied.clone()),
        RemoteEffect::request("PUT /notes", json!({ "id": id, "title": title })),
    )
    .with_id(id)
}

#[tokio::test]
async fn test_restart_restores_history_and_replays_queue() {
    let dir = tempfile::tempdir().unwrap();
    let titles: Arc<Mutex<Vec<String>>> = Arc::default();

    let first_transport = Arc::new(RecordingTransport::default());
    let first = core(
        first_transport.clone(),
        FileStore::new(dir.path()),
        ConnectivitySignal::new(false),
    );
    assert_eq!(first.start().await.unwrap(), StartReport::default());

    let ctx = AccessContext::in_directory("inbox");
    for id in ["note:1", "note:2", "note:1", "note:2"] {
        first.prefetcher().record_access(id, &ctx);
    }
    for id in ["e1", "e2"] {
        assert!(first.mutations().update(rename(&titles, id)).await.unwrap().is_queued());
    }
    assert_eq!(*titles.lock(), ["title e1", "title e2"]);
    assert_eq!(first.shutdown(Duration::from_secs(1)).await, ShutdownResult::Complete);
    assert_eq!(first_transport.ids_for("PUT /notes"), Vec::<String>::new());

    let second_transport = Arc::new(RecordingTransport::default());
    let second = core(
        second_transport.clone(),
        FileStore::new(dir.path()),
        ConnectivitySignal::new(true),
    );
    let report = second.start().await.unwrap();

    assert_eq!(report, StartReport { history_events: 4, offline_mutations: 2 });
    // Online at start, so the restored queue replays right away.
    assert_eq!(second_transport.ids_for("PUT /notes"), ["e1", "e2"]);
    assert_eq!(second.mutations().offline_queue_len(), 0);
    let stats = second.stats();
    assert_eq!(stats.mutation.replayed, 2);
    assert_eq!(stats.prefetch.history_len, 4);
    // Restored entries are replay-only; local state is untouched.
    assert_eq!(titles.lock().len(), 2);

    second.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_health_follows_connectivity_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let signal = ConnectivitySignal::new(true);
    let core = core(Arc::default(), FileStore::new(dir.path()), signal.clone());
    core.start().await.unwrap();

    let health = core.health();
    assert_eq!(health.state, HealthState::Healthy);
    assert!(health.ready);
    assert_eq!(health.pool_size, 2);

    signal.set_online(false);
    assert_eq!(core.health().state, HealthState::Degraded);
    assert!(core.health().ready);
    signal.set_online(true);

    assert_eq!(core.shutdown_gracefully().await, ShutdownResult::Complete);
    let stats = core.stats();
    assert_eq!(stats.shutdown, ShutdownState::Stopped);
    assert_eq!(core.health().state, HealthState::Unhealthy);

    let titles: Arc<Mutex<Vec<String>>> = Arc::default();
    let err = core.mutations().update(rename(&titles, "late")).await.unwrap_err();
    assert!(matches!(err, MutationError::ShuttingDown));
    assert!(titles.lock().is_empty());
}

#[tokio::test]
async fn test_reads_and_prefetch_share_one_cache() {
    let transport = Arc::new(RecordingTransport::default());
    let core = Core::builder(transport.clone(), Arc::new(ProceedOnConflict))
        .config(config())
        .build();
    let ctx = AccessContext::default();
    for _ in 0..3 {
        core.prefetcher().record_access("GET /profile", &ctx);
        core.prefetcher().record_access("GET /inbox", &ctx);
    }

    // The default resolver uses the resource id as the endpoint.
    core.prefetcher().on_access("GET /profile", &ctx);
    common::wait_until(|| core.prefetcher().is_prefetched("GET /inbox")).await;
    let calls = transport.call_count();

    core.coordinator()
        .request("GET /inbox", serde_json::Value::Null, Default::default())
        .await
        .unwrap();
    assert_eq!(transport.call_count(), calls);
    assert!(core.stats().coordinator.cache_hits >= 1);

    core.shutdown(Duration::from_secs(1)).await;
}
