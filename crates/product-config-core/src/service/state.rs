//! Mutable controller state and the throttle gate.
//!
//! Everything a background operation may mutate — the three cache tiers,
//! the fetch settings, the identity, and the re-entrancy flags — lives in
//! this single structure so one mutex acquisition covers a whole merge or
//! ingestion and no partially-merged tier is ever observable.

use crate::cache::ConfigCache;
use crate::settings::FetchSettings;
use crate::store::namespace_for;

use super::ControllerConfig;

/// Why a fetch dispatch attempt did not reach the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDispatch {
    /// The gate passed and the transport was asked to fetch.
    Dispatched,
    /// A fetch is already in flight; the attempt is a silent no-op.
    AlreadyFetching,
    /// The controller has no identity and performs no I/O.
    NoIdentity,
    /// The throttle window has not elapsed yet.
    Throttled,
}

/// Read-only diagnostics snapshot of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    /// Whether initialization has completed for the current identity.
    pub initialized: bool,
    /// Whether a fetch dispatch is outstanding.
    pub fetching: bool,
    /// Whether an activation is in progress.
    pub activating: bool,
    /// Whether a fetch-then-activate chain is pending.
    pub fetch_and_activate_pending: bool,
    /// Identity currently bound, when known.
    pub identity: Option<String>,
    /// Entry counts for the (default, fetched, activated) tiers.
    pub tier_sizes: (usize, usize, usize),
}

/// Mutable state guarded by the controller mutex.
#[derive(Debug)]
pub(crate) struct ControllerState {
    /// Three-tier key/value cache.
    pub(crate) cache: ConfigCache,
    /// Throttle policy and fetch bookkeeping.
    pub(crate) settings: FetchSettings,
    /// Identity namespacing persisted snapshots; `None` disables all I/O.
    pub(crate) identity: Option<String>,
    /// Set once initialization succeeds for the bound identity.
    pub(crate) initialized: bool,
    /// Re-entrancy guard for fetch dispatch.
    pub(crate) fetching: bool,
    /// Re-entrancy guard for activation.
    pub(crate) activating: bool,
    /// Pending fetch-then-activate chain flag.
    pub(crate) fetch_and_activate: bool,
}

impl ControllerState {
    /// Builds fresh state from the static configuration.
    pub(crate) fn new(config: &ControllerConfig) -> Self {
        let mut settings = FetchSettings::default();
        settings.set_minimum_fetch_interval_seconds(config.default_min_fetch_interval_seconds);
        Self {
            cache: ConfigCache::new(),
            settings,
            identity: config.identity.clone(),
            initialized: false,
            fetching: false,
            activating: false,
            fetch_and_activate: false,
        }
    }

    /// Persistence namespace for the bound identity, when one exists.
    pub(crate) fn namespace(&self, account_id: &str) -> Option<String> {
        self.identity
            .as_ref()
            .map(|identity| namespace_for(account_id, identity))
    }

    /// Throttle gate for fetch dispatch.
    ///
    /// A dispatch proceeds only when no fetch is in flight, an identity is
    /// bound, and strictly more than `min_interval_seconds` have elapsed
    /// since the last recorded fetch. A throttled or re-entrant attempt is
    /// an expected no-op, not an error.
    pub(crate) fn gate_fetch(&self, now_millis: i64, min_interval_seconds: u64) -> FetchDispatch {
        if self.fetching {
            return FetchDispatch::AlreadyFetching;
        }
        if self.identity.is_none() {
            return FetchDispatch::NoIdentity;
        }
        let elapsed_millis = now_millis.saturating_sub(self.settings.last_fetch_timestamp_millis());
        let window_millis = (min_interval_seconds as i64).saturating_mul(1_000);
        if elapsed_millis > window_millis {
            FetchDispatch::Dispatched
        } else {
            FetchDispatch::Throttled
        }
    }

    /// Produces the diagnostics snapshot exposed by the controller.
    pub(crate) fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            initialized: self.initialized,
            fetching: self.fetching,
            activating: self.activating,
            fetch_and_activate_pending: self.fetch_and_activate,
            identity: self.identity.clone(),
            tier_sizes: self.cache.tier_sizes(),
        }
    }
}
