//! Background operation bodies shared by the controller API.
//!
//! Each public controller operation is a thin dispatcher around one of the
//! async bodies below. Every body acquires the single controller mutex for
//! the whole mutation, so merges, ingestions, and resets never interleave.
//! Persisted writes complete before the corresponding event is emitted.
//! No body returns an error to the caller: I/O failures degrade to logged
//! fallbacks and, for initialization, an explicit failure event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::events::{ConfigEvent, EventSink};
use crate::response::FetchPayload;
use crate::store::{
    read_snapshot_map, snapshot_from_map, SnapshotStore, FILE_ACTIVATED, FILE_FETCHED,
};
use crate::transport::FetchTransport;

use super::state::{ControllerState, FetchDispatch};
use super::ControllerConfig;

/// Shared controller internals referenced by API handles and spawned tasks.
pub(crate) struct ControllerShared {
    /// Persistence collaborator for whole-snapshot reads and writes.
    pub(crate) store: Arc<dyn SnapshotStore>,
    /// Network collaborator receiving fire-and-forget fetch requests.
    pub(crate) transport: Arc<dyn FetchTransport>,
    /// Notification sink feeding the host's event stream.
    pub(crate) events: EventSink,
    /// Mutable state guarded by the controller-wide mutex.
    pub(crate) state: Mutex<ControllerState>,
    /// Static configuration fixed at construction.
    pub(crate) config: ControllerConfig,
}

impl std::fmt::Debug for ControllerShared {
    /// Keeps debug output concise by only printing static configuration.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerShared")
            .field("config", &self.config)
            .finish()
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

impl ControllerShared {
    /// Builds the activated tier from defaults plus the persisted snapshot,
    /// persists the merge, and loads settings.
    ///
    /// Safe to re-run: `set_defaults` and `rebind` both funnel through here.
    /// Identity-less controllers skip all I/O and stay uninitialized. Write
    /// failures leave the state uninitialized and emit [`ConfigEvent::InitFailed`]
    /// so the host can retry once the environment recovers.
    pub(crate) async fn run_initialize(&self) {
        let mut guard = self.state.lock().await;
        let Some(namespace) = guard.namespace(&self.config.account_id) else {
            debug!("initialize skipped: no identity bound");
            return;
        };

        let stored = read_snapshot_map(self.store.as_ref(), &namespace, FILE_ACTIVATED);
        guard.cache.merge_into_activated(&stored);
        let snapshot = snapshot_from_map(guard.cache.activated_snapshot());
        if let Err(err) = self.store.write(&namespace, FILE_ACTIVATED, &snapshot) {
            warn!("initialize failed to persist activated snapshot: {err}");
            self.events.emit(ConfigEvent::InitFailed);
            return;
        }
        guard.settings.load(self.store.as_ref(), &namespace);
        guard.initialized = true;
        let (_, _, activated) = guard.cache.tier_sizes();
        debug!("initialized with {activated} activated entries");
        self.events.emit(ConfigEvent::InitSuccess);
    }

    /// Replaces the default tier and refreshes the activated view.
    pub(crate) async fn run_set_defaults(&self, defaults: Map<String, Value>) {
        {
            let mut guard = self.state.lock().await;
            guard.cache.set_defaults(&defaults);
            let (default_len, _, _) = guard.cache.tier_sizes();
            debug!("defaults replaced with {default_len} entries");
        }
        self.run_initialize().await;
    }

    /// Runs the throttle gate and, when it passes, hands off to the transport.
    ///
    /// `min_interval_override` carries a caller-requested interval; `None`
    /// uses the settings-derived value (caller minimum or server policy).
    /// The transport call happens outside the mutex so a transport that
    /// re-enters the controller cannot deadlock.
    pub(crate) async fn run_fetch(&self, min_interval_override: Option<u64>) -> FetchDispatch {
        let dispatch = {
            let mut guard = self.state.lock().await;
            let interval_seconds = min_interval_override
                .unwrap_or_else(|| guard.settings.next_fetch_interval_seconds());
            let decision = guard.gate_fetch(now_millis(), interval_seconds);
            if decision == FetchDispatch::Dispatched {
                guard.fetching = true;
            }
            decision
        };
        match dispatch {
            FetchDispatch::Dispatched => {
                debug!("dispatching fetch to transport");
                self.transport.request_fetch();
            }
            FetchDispatch::Throttled => debug!("fetch throttled"),
            FetchDispatch::AlreadyFetching => debug!("fetch already in flight"),
            FetchDispatch::NoIdentity => debug!("fetch skipped: no identity bound"),
        }
        dispatch
    }

    /// Marks a fetch-then-activate chain pending and dispatches the fetch.
    ///
    /// When the gate rejects the dispatch for a reason that means no result
    /// will ever arrive (throttled, no identity) the pending flag is cleared
    /// again; an in-flight fetch keeps it set so the arriving result chains
    /// into activation.
    pub(crate) async fn run_fetch_and_activate(&self) {
        {
            let mut guard = self.state.lock().await;
            if guard.fetch_and_activate {
                debug!("fetch-and-activate already pending");
                return;
            }
            guard.fetch_and_activate = true;
        }
        match self.run_fetch(None).await {
            FetchDispatch::Dispatched | FetchDispatch::AlreadyFetching => {}
            FetchDispatch::Throttled | FetchDispatch::NoIdentity => {
                let mut guard = self.state.lock().await;
                guard.fetch_and_activate = false;
                debug!("clearing pending activation: fetch was not dispatched");
            }
        }
    }

    /// Ingests a raw fetch response delivered by the transport.
    ///
    /// Parsing and tier replacement run under the mutex so a concurrent
    /// activation or reset never observes a half-ingested snapshot. The
    /// fetched event fires on both outcomes; a parse or persist failure
    /// additionally clears the pending activation so data that never made
    /// it to disk is not activated. `fetching` is cleared last, regardless
    /// of outcome. The body tolerates arriving after a reset or rebind: it
    /// simply operates on whatever cache is bound now and its result is
    /// overwritten by the next fetch.
    pub(crate) async fn run_ingest(&self, payload: Value) {
        let chain_activation = {
            let mut guard = self.state.lock().await;
            let namespace = guard.namespace(&self.config.account_id);
            let chain = match FetchPayload::parse(&payload) {
                Ok(parsed) => {
                    if let Some(timestamp) = parsed.timestamp_millis {
                        guard.settings.record_fetch_timestamp(timestamp);
                    }
                    if let Some(arp) = &parsed.arp {
                        guard.settings.apply_arp(arp);
                    }
                    let entry_count = parsed.entries.len();
                    guard.cache.replace_fetched(parsed.entries);
                    let mut persisted = true;
                    if let Some(namespace) = &namespace {
                        let snapshot = snapshot_from_map(guard.cache.fetched_snapshot());
                        if let Err(err) = self.store.write(namespace, FILE_FETCHED, &snapshot) {
                            warn!("failed to persist fetched snapshot: {err}");
                            persisted = false;
                        }
                        if let Err(err) = guard.settings.persist(self.store.as_ref(), namespace) {
                            warn!("failed to persist settings: {err}");
                            persisted = false;
                        }
                    }
                    debug!("fetch succeeded with {entry_count} entries");
                    self.events.emit(ConfigEvent::Fetched);
                    if persisted {
                        guard.fetch_and_activate
                    } else {
                        guard.fetch_and_activate = false;
                        false
                    }
                }
                Err(err) => {
                    warn!("failed to parse fetch response: {err}");
                    guard.fetch_and_activate = false;
                    self.events.emit(ConfigEvent::Fetched);
                    false
                }
            };
            guard.fetching = false;
            chain
        };
        if chain_activation {
            self.run_activate().await;
        }
    }

    /// Folds the pending fetched snapshot into the activated tier.
    ///
    /// The in-memory fetched tier supplies the pending data when non-empty
    /// and stays in place afterwards, so a second activation with no
    /// intervening fetch folds the same snapshot again and yields the same
    /// activated mapping. An empty in-memory tier falls back to the
    /// persisted fetched snapshot. The persisted file is deleted once
    /// consumed; deleting an already-absent file is not an error.
    pub(crate) async fn run_activate(&self) {
        let mut guard = self.state.lock().await;
        if guard.activating {
            debug!("activation already in progress");
            return;
        }
        guard.activating = true;

        let namespace = guard.namespace(&self.config.account_id);
        let pending = if !guard.cache.fetched_is_empty() {
            guard.cache.fetched_snapshot().clone()
        } else if let Some(namespace) = &namespace {
            read_snapshot_map(self.store.as_ref(), namespace, FILE_FETCHED)
        } else {
            HashMap::new()
        };
        guard.cache.merge_into_activated(&pending);

        if let Some(namespace) = &namespace {
            let snapshot = snapshot_from_map(guard.cache.activated_snapshot());
            if let Err(err) = self.store.write(namespace, FILE_ACTIVATED, &snapshot) {
                warn!("failed to persist activated snapshot: {err}");
            }
            if let Err(err) = self.store.delete(namespace, FILE_FETCHED) {
                warn!("failed to delete consumed fetched snapshot: {err}");
            }
        }

        let (_, _, activated) = guard.cache.tier_sizes();
        debug!("activated with {activated} entries");
        self.events.emit(ConfigEvent::Activated);
        guard.activating = false;
        guard.fetch_and_activate = false;
    }

    /// Clears the in-memory tiers, deletes the persisted namespace, and
    /// restores the default throttle interval.
    ///
    /// The last-fetch timestamp is kept so a reset does not open an
    /// immediate re-fetch window. The controller is not re-initialized.
    pub(crate) async fn run_reset(&self) {
        let mut guard = self.state.lock().await;
        guard.cache.clear_all();
        if let Some(namespace) = guard.namespace(&self.config.account_id) {
            if let Err(err) = self.store.delete_namespace(&namespace) {
                warn!("reset failed to delete persisted namespace: {err}");
            }
        }
        guard.settings.reset();
        debug!("reset complete");
    }

    /// Re-points the controller at a new identity and re-initializes.
    pub(crate) async fn run_rebind(&self, identity: String) {
        if identity.is_empty() {
            debug!("rebind ignored: empty identity");
            return;
        }
        {
            let mut guard = self.state.lock().await;
            guard.identity = Some(identity);
            guard.initialized = false;
        }
        self.run_initialize().await;
    }

    /// Applies a caller override of the minimum fetch interval.
    pub(crate) async fn run_set_minimum_interval(&self, interval_seconds: u64) {
        let mut guard = self.state.lock().await;
        guard.settings.set_minimum_fetch_interval_seconds(interval_seconds);
        self.persist_settings(&guard);
    }

    /// Applies a server-assigned fetch-policy blob.
    pub(crate) async fn run_set_arp(&self, policy: Map<String, Value>) {
        let mut guard = self.state.lock().await;
        guard.settings.apply_arp(&policy);
        self.persist_settings(&guard);
    }

    /// Persists settings immediately after a mutation, when an identity is bound.
    fn persist_settings(&self, guard: &ControllerState) {
        if let Some(namespace) = guard.namespace(&self.config.account_id) {
            if let Err(err) = guard.settings.persist(self.store.as_ref(), &namespace) {
                warn!("failed to persist settings: {err}");
            }
        }
    }
}
