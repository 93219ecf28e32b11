//! Per-identity controller registry.
//!
//! Hosts that serve several identities in one process obtain controllers
//! here instead of constructing them directly. The registry hands back the
//! existing controller for an identity it has seen before, so two obtain
//! calls for the same identity share state, events, and throttle history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::events::EventStream;
use crate::service::{ControllerConfig, ProductConfigController};
use crate::store::SnapshotStore;
use crate::transport::FetchTransport;

/// Creates and caches one [`ProductConfigController`] per identity.
///
/// All controllers share the registry's store and transport; only the
/// bound identity differs between them.
pub struct ControllerRegistry {
    base: ControllerConfig,
    store: Arc<dyn SnapshotStore>,
    transport: Arc<dyn FetchTransport>,
    controllers: Mutex<HashMap<String, ProductConfigController>>,
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("base", &self.base)
            .finish()
    }
}

impl ControllerRegistry {
    /// Builds a registry from the shared collaborators and a base
    /// configuration whose identity field is ignored.
    pub fn new(
        base: ControllerConfig,
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn FetchTransport>,
    ) -> Self {
        Self {
            base: base.sanitise(),
            store,
            transport,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the controller bound to `identity`, constructing it on first
    /// use. The event stream is handed out exactly once, with the newly
    /// constructed controller; later calls return `None` for it.
    ///
    /// An empty identity yields an uncached inert controller that performs
    /// no I/O, so callers can hold a handle before sign-in completes.
    pub fn obtain(&self, identity: &str) -> (ProductConfigController, Option<EventStream>) {
        if identity.is_empty() {
            warn!("no identity available; handing out an inert controller");
            let config = ControllerConfig {
                identity: None,
                ..self.base.clone()
            };
            let (controller, events) =
                ProductConfigController::new(config, self.store.clone(), self.transport.clone());
            return (controller, Some(events));
        }

        let mut guard = self.controllers.lock().expect("lock poisoned");
        if let Some(existing) = guard.get(identity) {
            return (existing.clone(), None);
        }

        debug!("constructing controller for identity {identity:?}");
        let config = ControllerConfig {
            identity: Some(identity.to_owned()),
            ..self.base.clone()
        };
        let (controller, events) =
            ProductConfigController::new(config, self.store.clone(), self.transport.clone());
        guard.insert(identity.to_owned(), controller.clone());
        (controller, Some(events))
    }

    /// Drops the cached controller for `identity`; in-flight background
    /// tasks keep their own handle and finish normally.
    pub fn remove(&self, identity: &str) -> bool {
        let mut guard = self.controllers.lock().expect("lock poisoned");
        guard.remove(identity).is_some()
    }

    /// Number of cached controllers.
    pub fn len(&self) -> usize {
        let guard = self.controllers.lock().expect("lock poisoned");
        guard.len()
    }

    /// True when no controller has been constructed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
