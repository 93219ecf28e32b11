//! Public product-config controller API.
//!
//! The controller coordinates background initialization, fetch throttling,
//! response ingestion, activation, and reset for one identity. Mutating
//! operations are dispatched as background tasks and return immediately;
//! completion is observed through the event stream handed out at
//! construction, or by polling [`ProductConfigController::is_initialized`].
//! Typed getters read only the activated tier and degrade to documented
//! sentinel values instead of failing.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::{
    DEFAULT_VALUE_FOR_BOOLEAN, DEFAULT_VALUE_FOR_DOUBLE, DEFAULT_VALUE_FOR_LONG,
    DEFAULT_VALUE_FOR_STRING,
};
use crate::events::{EventSink, EventStream};
use crate::store::SnapshotStore;
use crate::transport::FetchTransport;

use super::engine::ControllerShared;
use super::state::{ControllerSnapshot, ControllerState};
use super::ControllerConfig;

/// Remote-configuration controller for a single identity.
///
/// Cheap to clone; clones share the same state and event sink.
#[derive(Debug, Clone)]
pub struct ProductConfigController {
    shared: Arc<ControllerShared>,
}

impl ProductConfigController {
    /// Builds a controller plus the event stream the host should drain on
    /// its caller-visible task.
    ///
    /// Construction performs no I/O; call [`Self::initialize`] to load the
    /// persisted state for the bound identity.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn FetchTransport>,
    ) -> (Self, EventStream) {
        let config = config.sanitise();
        let (events, stream) = EventSink::channel();
        let state = ControllerState::new(&config);
        let shared = ControllerShared {
            store,
            transport,
            events,
            state: Mutex::new(state),
            config,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            stream,
        )
    }

    /// Starts background initialization for the bound identity.
    ///
    /// Emits `InitSuccess` or `InitFailed`; safe to call again after a
    /// failure or once an identity becomes available.
    pub fn initialize(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_initialize().await;
        });
    }

    /// Replaces the default tier from an explicit mapping, then re-runs
    /// initialization so the new defaults layer under the persisted state.
    pub fn set_defaults(&self, defaults: Map<String, Value>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_set_defaults(defaults).await;
        });
    }

    /// Replaces the default tier from a structured resource document.
    ///
    /// Anything other than a JSON object is rejected with a log line and
    /// leaves the current defaults untouched.
    pub fn set_defaults_json(&self, document: Value) {
        match document {
            Value::Object(defaults) => self.set_defaults(defaults),
            other => warn!("ignoring defaults document of type {}", json_type_name(&other)),
        }
    }

    /// Requests a fetch honouring the settings-derived minimum interval.
    pub fn fetch(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_fetch(None).await;
        });
    }

    /// Requests a fetch honouring the supplied minimum interval in seconds.
    pub fn fetch_with_min_interval(&self, min_interval_seconds: u64) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_fetch(Some(min_interval_seconds)).await;
        });
    }

    /// Requests a fetch whose result is folded into the activated tier as
    /// soon as it arrives. A chain that is already pending is a no-op.
    pub fn fetch_and_activate(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_fetch_and_activate().await;
        });
    }

    /// Folds the pending fetched snapshot into the activated tier in the
    /// background. Re-entrant calls while an activation runs are no-ops.
    pub fn activate(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_activate().await;
        });
    }

    /// Clears all tiers and persisted state for the current identity and
    /// restores the default throttle interval. Does not re-initialize.
    pub fn reset(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.run_reset().await;
        });
    }

    /// Re-points the controller at a new identity's persisted namespace and
    /// re-runs initialization. Empty identities are ignored.
    pub fn rebind(&self, identity: impl Into<String>) {
        let shared = self.shared.clone();
        let identity = identity.into();
        tokio::spawn(async move {
            shared.run_rebind(identity).await;
        });
    }

    /// Ingests a raw fetch response delivered by the transport.
    ///
    /// Called by the network collaborator from its own task once a fetch
    /// request completes; tolerates arriving after a reset or rebind.
    pub async fn ingest_fetch_result(&self, payload: Value) {
        self.shared.run_ingest(payload).await;
    }

    /// Overrides the minimum fetch interval; persisted immediately.
    pub async fn set_minimum_fetch_interval_seconds(&self, interval_seconds: u64) {
        self.shared.run_set_minimum_interval(interval_seconds).await;
    }

    /// Applies a server-assigned fetch-policy blob; persisted immediately.
    pub async fn set_arp(&self, policy: Map<String, Value>) {
        self.shared.run_set_arp(policy).await;
    }

    /// True once initialization has completed for the bound identity.
    pub async fn is_initialized(&self) -> bool {
        self.shared.state.lock().await.initialized
    }

    /// Returns a diagnostics snapshot of flags, identity, and tier sizes.
    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.shared.state.lock().await.snapshot()
    }

    /// Returns the activated value for `key`, or `""` when the controller
    /// is uninitialized, the key is empty, or the key is absent.
    pub async fn get_string(&self, key: &str) -> String {
        let guard = self.shared.state.lock().await;
        if !guard.initialized {
            return DEFAULT_VALUE_FOR_STRING.to_owned();
        }
        guard.cache.string_value(key)
    }

    /// Returns the activated value for `key` as a boolean, defaulting to
    /// `false`. Only a case-insensitive `true` parses as `true`.
    pub async fn get_boolean(&self, key: &str) -> bool {
        let guard = self.shared.state.lock().await;
        if !guard.initialized {
            return DEFAULT_VALUE_FOR_BOOLEAN;
        }
        guard.cache.boolean_value(key)
    }

    /// Returns the activated value for `key` as an integer, defaulting to
    /// `0` on absence or parse failure.
    pub async fn get_long(&self, key: &str) -> i64 {
        let guard = self.shared.state.lock().await;
        if !guard.initialized {
            return DEFAULT_VALUE_FOR_LONG;
        }
        guard.cache.long_value(key)
    }

    /// Returns the activated value for `key` as a float, defaulting to
    /// `0.0` on absence or parse failure.
    pub async fn get_double(&self, key: &str) -> f64 {
        let guard = self.shared.state.lock().await;
        if !guard.initialized {
            return DEFAULT_VALUE_FOR_DOUBLE;
        }
        guard.cache.double_value(key)
    }

    /// Returns the shared internals for test support code (test builds only).
    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &Arc<ControllerShared> {
        &self.shared
    }
}

/// Human-readable JSON type label used in defaults rejection logs.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
