//! Controller integration tests exercising the full operation surface
//! against in-memory and filesystem stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use crate::events::{ConfigEvent, EventStream};
use crate::store::{
    FileStore, MemoryStore, SnapshotStore, StoreError, FILE_ACTIVATED, FILE_FETCHED,
};
use crate::transport::FetchTransport;

use super::engine::now_millis;
use super::{ControllerConfig, FetchDispatch, ProductConfigController};

/// Transport double counting dispatch requests.
#[derive(Debug, Default)]
struct RecordingTransport {
    requests: AtomicUsize,
}

impl RecordingTransport {
    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl FetchTransport for RecordingTransport {
    fn request_fetch(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store double whose writes can be made to fail mid-test.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl SnapshotStore for FlakyStore {
    fn write(
        &self,
        namespace: &str,
        name: &str,
        snapshot: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.write(namespace, name, snapshot)
    }

    fn read(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        self.inner.read(namespace, name)
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete(namespace, name)
    }

    fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.inner.delete_namespace(namespace)
    }
}

/// Builds a controller over the given store, bound to `device-1`.
fn bound_controller(
    store: Arc<dyn SnapshotStore>,
) -> (
    ProductConfigController,
    EventStream,
    Arc<RecordingTransport>,
) {
    let transport = Arc::new(RecordingTransport::default());
    let config = ControllerConfig {
        account_id: "acct".into(),
        identity: Some("device-1".into()),
        ..Default::default()
    };
    let (controller, events) = ProductConfigController::new(config, store, transport.clone());
    (controller, events, transport)
}

/// Drains every event currently queued on the stream.
fn drain(events: &mut EventStream) -> Vec<ConfigEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// A fetch response carrying one `color: blue` entry and a fresh timestamp.
fn blue_payload() -> Value {
    json!({
        "kv": [{"k": "color", "v": "blue"}],
        "ts": now_millis(),
    })
}

#[tokio::test]
/// Defaults load on initialization, the fetched value stays invisible until
/// activation, and activation makes it win over the default.
async fn fetched_value_wins_after_activation() {
    let store = Arc::new(MemoryStore::new());
    let (controller, mut events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared
        .run_set_defaults(json!({"color": "red", "limit": 25}).as_object().cloned().unwrap())
        .await;
    assert!(controller.is_initialized().await);
    assert_eq!(controller.get_string("color").await, "red");

    assert_eq!(shared.run_fetch(None).await, FetchDispatch::Dispatched);
    assert_eq!(transport.request_count(), 1);
    shared.run_ingest(blue_payload()).await;
    // Fetched data is not readable until activated.
    assert_eq!(controller.get_string("color").await, "red");

    shared.run_activate().await;
    assert_eq!(controller.get_string("color").await, "blue");
    // Keys only present in defaults survive the merge.
    assert_eq!(controller.get_long("limit").await, 25);

    assert_eq!(
        drain(&mut events),
        vec![
            ConfigEvent::InitSuccess,
            ConfigEvent::Fetched,
            ConfigEvent::Activated,
        ]
    );
}

#[tokio::test]
/// A second fetch inside the throttle window is rejected; widening the
/// elapsed time past the window lets it through again.
async fn fetch_is_throttled_inside_the_window() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(Default::default()).await;
    assert_eq!(shared.run_fetch(None).await, FetchDispatch::Dispatched);
    // The response reports a fetch ten seconds in the past.
    shared
        .run_ingest(json!({"kv": [], "ts": now_millis() - 10_000}))
        .await;

    // Ten seconds is well inside the default window.
    assert_eq!(shared.run_fetch(None).await, FetchDispatch::Throttled);
    assert_eq!(transport.request_count(), 1);

    // A caller-supplied interval narrower than the elapsed time passes.
    assert_eq!(shared.run_fetch(Some(5)).await, FetchDispatch::Dispatched);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
/// An in-flight fetch makes further attempts silent no-ops until the
/// response is ingested.
async fn concurrent_fetch_attempts_collapse() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(Default::default()).await;
    assert_eq!(shared.run_fetch(None).await, FetchDispatch::Dispatched);
    assert_eq!(shared.run_fetch(Some(0)).await, FetchDispatch::AlreadyFetching);
    assert_eq!(transport.request_count(), 1);

    shared.run_ingest(blue_payload()).await;
    assert!(!shared.state.lock().await.fetching);
}

#[tokio::test]
/// Typed getters return sentinels before initialization completes.
async fn getters_return_sentinels_before_initialization() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, _transport) = bound_controller(store);

    assert!(!controller.is_initialized().await);
    assert_eq!(controller.get_string("color").await, "");
    assert!(!controller.get_boolean("enabled").await);
    assert_eq!(controller.get_long("limit").await, 0);
    assert_eq!(controller.get_double("ratio").await, 0.0);
}

#[tokio::test]
/// Duplicate fetch-and-activate requests chain exactly one activation.
async fn duplicate_fetch_and_activate_chains_once() {
    let store = Arc::new(MemoryStore::new());
    let (controller, mut events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(Default::default()).await;
    shared.run_fetch_and_activate().await;
    shared.run_fetch_and_activate().await;
    assert_eq!(transport.request_count(), 1);

    shared.run_ingest(blue_payload()).await;
    assert_eq!(controller.get_string("color").await, "blue");

    let activations = drain(&mut events)
        .into_iter()
        .filter(|event| *event == ConfigEvent::Activated)
        .count();
    assert_eq!(activations, 1);
    assert!(!shared.state.lock().await.fetch_and_activate);
}

#[tokio::test]
/// A throttled fetch-and-activate clears the pending chain so a later
/// ingest does not activate unexpectedly.
async fn throttled_fetch_and_activate_clears_pending_chain() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(Default::default()).await;
    {
        let mut guard = shared.state.lock().await;
        guard.settings.record_fetch_timestamp(now_millis());
    }
    shared.run_fetch_and_activate().await;
    assert_eq!(transport.request_count(), 0);
    assert!(!shared.state.lock().await.fetch_and_activate);
}

#[tokio::test]
#[tracing_test::traced_test]
/// An unparseable response still completes the fetch cycle: the fetched
/// event fires, the in-flight flag clears, and no activation is chained.
async fn malformed_response_completes_the_fetch_cycle() {
    let store = Arc::new(MemoryStore::new());
    let (controller, mut events, _transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    shared.run_fetch_and_activate().await;
    shared.run_ingest(json!({"unexpected": true})).await;

    assert!(logs_contain("failed to parse fetch response"));
    assert_eq!(controller.get_string("color").await, "red");
    let seen = drain(&mut events);
    assert!(seen.contains(&ConfigEvent::Fetched));
    assert!(!seen.contains(&ConfigEvent::Activated));
    assert!(!shared.state.lock().await.fetching);
}

#[tokio::test]
/// Reset clears every tier and the persisted namespace; reads degrade to
/// sentinels and a late-arriving response is tolerated.
async fn reset_clears_state_and_tolerates_late_ingest() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, _transport) = bound_controller(store.clone());
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    shared.run_fetch(None).await;
    shared.run_ingest(blue_payload()).await;
    shared.run_activate().await;
    assert_eq!(controller.get_string("color").await, "blue");

    shared.run_reset().await;
    assert_eq!(controller.get_string("color").await, "");
    let namespace = "product_config_acct_device-1";
    assert!(store.read(namespace, FILE_ACTIVATED).unwrap().is_none());
    assert!(store.read(namespace, FILE_FETCHED).unwrap().is_none());

    // A response from a fetch dispatched before the reset lands harmlessly.
    shared.run_ingest(blue_payload()).await;
}

#[tokio::test]
/// Activating twice without an intervening fetch yields the same activated
/// mapping both times: the fetched tier stays in memory after the first
/// fold, so the second pass does not revert to defaults.
async fn repeated_activation_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, _transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    shared.run_fetch(None).await;
    shared.run_ingest(blue_payload()).await;
    shared.run_activate().await;
    assert_eq!(controller.get_string("color").await, "blue");
    let first = shared.state.lock().await.cache.activated_snapshot().clone();

    shared.run_activate().await;
    assert_eq!(controller.get_string("color").await, "blue");
    assert_eq!(shared.state.lock().await.cache.activated_snapshot(), &first);
}

#[tokio::test]
/// A persist failure during ingestion still completes the fetch cycle but
/// clears the pending chain, so data that never reached disk is not
/// activated.
async fn persist_failure_during_ingest_clears_pending_chain() {
    let store = Arc::new(FlakyStore::default());
    let (controller, mut events, _transport) = bound_controller(store.clone());
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    shared.run_fetch_and_activate().await;
    store.fail_writes();
    shared.run_ingest(blue_payload()).await;

    let seen = drain(&mut events);
    assert!(seen.contains(&ConfigEvent::Fetched));
    assert!(!seen.contains(&ConfigEvent::Activated));
    assert_eq!(controller.get_string("color").await, "red");
    let guard = shared.state.lock().await;
    assert!(!guard.fetch_and_activate);
    assert!(!guard.fetching);
}

#[tokio::test]
/// Activated configuration survives a restart through the filesystem store.
async fn activated_snapshot_survives_restart() {
    let tmp = TempDir::new().unwrap();

    {
        let store = Arc::new(FileStore::new(tmp.path()));
        let (controller, _events, _transport) = bound_controller(store);
        let shared = controller.shared_for_tests();
        shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
        shared.run_fetch(None).await;
        shared.run_ingest(blue_payload()).await;
        shared.run_activate().await;
    }

    let store = Arc::new(FileStore::new(tmp.path()));
    let (controller, mut events, _transport) = bound_controller(store);
    controller.shared_for_tests().run_initialize().await;

    assert!(controller.is_initialized().await);
    assert_eq!(controller.get_string("color").await, "blue");
    assert_eq!(drain(&mut events), vec![ConfigEvent::InitSuccess]);
}

#[tokio::test]
/// The persisted throttle timestamp survives a restart, so an immediate
/// re-fetch after relaunch is still rejected.
async fn throttle_window_survives_restart() {
    let tmp = TempDir::new().unwrap();

    {
        let store = Arc::new(FileStore::new(tmp.path()));
        let (controller, _events, _transport) = bound_controller(store);
        let shared = controller.shared_for_tests();
        shared.run_set_defaults(Default::default()).await;
        shared.run_fetch(None).await;
        shared.run_ingest(blue_payload()).await;
    }

    let store = Arc::new(FileStore::new(tmp.path()));
    let (controller, _events, transport) = bound_controller(store);
    let shared = controller.shared_for_tests();
    shared.run_initialize().await;

    assert_eq!(shared.run_fetch(None).await, FetchDispatch::Throttled);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
/// Without an identity the controller is an inert shell: no events, no
/// dispatches, no persistence, sentinel reads.
async fn identity_less_controller_is_inert() {
    let transport = Arc::new(RecordingTransport::default());
    let config = ControllerConfig {
        account_id: "acct".into(),
        identity: None,
        ..Default::default()
    };
    let (controller, mut events) = ProductConfigController::new(
        config,
        Arc::new(MemoryStore::new()),
        transport.clone(),
    );
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    assert!(!controller.is_initialized().await);
    assert_eq!(shared.run_fetch(None).await, FetchDispatch::NoIdentity);
    assert_eq!(transport.request_count(), 0);
    assert_eq!(controller.get_string("color").await, "");
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
/// A server fetch policy wider than the caller interval takes precedence.
async fn server_policy_widens_the_fetch_interval() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, _transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(Default::default()).await;
    shared.run_fetch(None).await;
    shared
        .run_ingest(json!({
            "kv": [],
            "ts": now_millis(),
            "arp": {"rc_n": 1, "rc_w": 120},
        }))
        .await;

    let guard = shared.state.lock().await;
    // 120 minutes for a single call: 7200 seconds, wider than the default.
    assert_eq!(guard.settings.next_fetch_interval_seconds(), 7_200);
}

#[tokio::test]
/// Rebinding switches the persistence namespace and re-initializes; data
/// activated for the previous identity is no longer visible.
async fn rebind_switches_identity_namespace() {
    let store = Arc::new(MemoryStore::new());
    let (controller, _events, _transport) = bound_controller(store);
    let shared = controller.shared_for_tests();

    shared.run_set_defaults(json!({"color": "red"}).as_object().cloned().unwrap()).await;
    shared.run_fetch(None).await;
    shared.run_ingest(blue_payload()).await;
    shared.run_activate().await;
    assert_eq!(controller.get_string("color").await, "blue");

    shared.run_rebind("device-2".into()).await;

    let snapshot = controller.snapshot().await;
    assert!(snapshot.initialized);
    assert_eq!(snapshot.identity.as_deref(), Some("device-2"));
    // The new namespace has no fetched history, only the defaults.
    assert_eq!(controller.get_string("color").await, "red");
}

#[tokio::test]
/// An interval override set through the async API persists immediately and
/// is visible to the throttle gate.
async fn interval_override_persists_through_store() {
    let tmp = TempDir::new().unwrap();

    {
        let store = Arc::new(FileStore::new(tmp.path()));
        let (controller, _events, _transport) = bound_controller(store);
        controller.shared_for_tests().run_initialize().await;
        controller.set_minimum_fetch_interval_seconds(30).await;
    }

    let store = Arc::new(FileStore::new(tmp.path()));
    let (controller, _events, _transport) = bound_controller(store);
    let shared = controller.shared_for_tests();
    shared.run_initialize().await;
    let guard = shared.state.lock().await;
    assert_eq!(guard.settings.next_fetch_interval_seconds(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
/// The spawn-based public API completes its background work; initialization
/// is observed by polling rather than by awaiting internals.
async fn spawned_operations_complete_in_background() {
    let store = Arc::new(MemoryStore::new());
    let (controller, mut events, _transport) = bound_controller(store);

    controller.set_defaults_json(json!({"color": "red"}));

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        while !controller.is_initialized().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "initialization did not complete");
    assert_eq!(controller.get_string("color").await, "red");
    assert_eq!(events.recv().await, Some(ConfigEvent::InitSuccess));
}
