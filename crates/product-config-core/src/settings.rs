//! Fetch throttle policy and bookkeeping.
//!
//! Settings are loaded once during controller initialization, mutated on
//! every successfully parsed fetch response, and persisted immediately on
//! each mutation. The backend may ship a fetch-policy blob (ARP) that
//! overrides the client-configured minimum interval when it demands a wider
//! spacing between calls.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::{read_snapshot_map, SnapshotStore, StoreError};

/// Number of fetch calls permitted inside one throttle window by default.
const DEFAULT_NO_OF_CALLS: u64 = 5;
/// Default throttle window length in minutes.
const DEFAULT_WINDOW_LENGTH_MINUTES: u64 = 60;
/// Default minimum spacing between fetch dispatches, in seconds.
pub const DEFAULT_MIN_FETCH_INTERVAL_SECONDS: u64 =
    DEFAULT_WINDOW_LENGTH_MINUTES * 60 / DEFAULT_NO_OF_CALLS;

/// File name holding the persisted settings snapshot.
pub(crate) const FILE_SETTINGS: &str = "config_settings.json";

/// Snapshot key for the last-fetch timestamp (milliseconds since epoch).
const KEY_LAST_FETCH_TS: &str = "ts";
/// Snapshot key for the caller-configured minimum fetch interval.
const KEY_MIN_FETCH_INTERVAL: &str = "fetch_min_interval_seconds";
/// ARP key carrying the number of calls allowed per window.
const KEY_ARP_CALLS: &str = "rc_n";
/// ARP key carrying the window length in minutes.
const KEY_ARP_WINDOW_MINUTES: &str = "rc_w";

/// Throttle policy plus fetch bookkeeping for a single controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    min_fetch_interval_seconds: u64,
    last_fetch_timestamp_millis: i64,
    arp_calls_per_window: Option<u64>,
    arp_window_minutes: Option<u64>,
}

impl Default for FetchSettings {
    /// Returns defaults: the constant minimum interval, no recorded fetch,
    /// and no server-assigned policy.
    fn default() -> Self {
        Self {
            min_fetch_interval_seconds: DEFAULT_MIN_FETCH_INTERVAL_SECONDS,
            last_fetch_timestamp_millis: 0,
            arp_calls_per_window: None,
            arp_window_minutes: None,
        }
    }
}

impl FetchSettings {
    /// Effective minimum spacing between fetch dispatches, in seconds.
    ///
    /// The caller-configured interval applies unless the server-assigned
    /// policy derives a wider one (window length divided by allowed calls).
    pub fn next_fetch_interval_seconds(&self) -> u64 {
        match self.server_interval_seconds() {
            Some(server) => self.min_fetch_interval_seconds.max(server),
            None => self.min_fetch_interval_seconds,
        }
    }

    /// Interval demanded by the server-assigned policy, when one is present.
    fn server_interval_seconds(&self) -> Option<u64> {
        let calls = self.arp_calls_per_window?;
        let window_minutes = self.arp_window_minutes?;
        if calls == 0 {
            return None;
        }
        Some(window_minutes * 60 / calls)
    }

    /// Timestamp of the most recent successfully parsed fetch response.
    pub fn last_fetch_timestamp_millis(&self) -> i64 {
        self.last_fetch_timestamp_millis
    }

    /// Records a fetch timestamp; the value never moves backwards.
    pub fn record_fetch_timestamp(&mut self, timestamp_millis: i64) {
        if timestamp_millis < self.last_fetch_timestamp_millis {
            debug!(
                "ignoring fetch timestamp {timestamp_millis} older than recorded {}",
                self.last_fetch_timestamp_millis
            );
            return;
        }
        self.last_fetch_timestamp_millis = timestamp_millis;
    }

    /// Overrides the caller-configured minimum interval. Zero is rejected.
    pub fn set_minimum_fetch_interval_seconds(&mut self, interval_seconds: u64) {
        if interval_seconds == 0 {
            warn!("minimum fetch interval must be positive; keeping current value");
            return;
        }
        self.min_fetch_interval_seconds = interval_seconds;
    }

    /// Applies a server-assigned fetch-policy blob.
    ///
    /// Only the recognized policy keys are consumed; unknown entries are
    /// ignored so future policy fields do not break older clients.
    pub fn apply_arp(&mut self, arp: &Map<String, Value>) {
        for (key, value) in arp {
            let Some(number) = value.as_u64() else {
                debug!("ignoring non-numeric fetch policy entry {key:?}");
                continue;
            };
            match key.as_str() {
                KEY_ARP_CALLS if number > 0 => self.arp_calls_per_window = Some(number),
                KEY_ARP_WINDOW_MINUTES if number > 0 => self.arp_window_minutes = Some(number),
                KEY_ARP_CALLS | KEY_ARP_WINDOW_MINUTES => {
                    debug!("ignoring zero fetch policy entry {key:?}");
                }
                _ => {}
            }
        }
    }

    /// Restores the default minimum interval and drops the server policy.
    ///
    /// The last-fetch timestamp is deliberately kept so a reset cannot be
    /// used to sidestep the throttle window.
    pub fn reset(&mut self) {
        self.min_fetch_interval_seconds = DEFAULT_MIN_FETCH_INTERVAL_SECONDS;
        self.arp_calls_per_window = None;
        self.arp_window_minutes = None;
    }

    /// Loads persisted settings over the current in-memory baseline.
    ///
    /// Only keys present in the snapshot override the baseline, so a
    /// missing or damaged snapshot leaves the configured values in place.
    /// The timestamp goes through [`Self::record_fetch_timestamp`] to keep
    /// the monotonicity guarantee across restarts.
    pub fn load(&mut self, store: &dyn SnapshotStore, namespace: &str) {
        let stored = read_snapshot_map(store, namespace, FILE_SETTINGS);
        self.apply_stored(&stored);
    }

    /// Overlays decoded snapshot entries onto the current settings.
    fn apply_stored(&mut self, stored: &HashMap<String, String>) {
        if let Some(value) = stored.get(KEY_LAST_FETCH_TS).and_then(|raw| raw.parse().ok()) {
            self.record_fetch_timestamp(value);
        }
        if let Some(value) = stored
            .get(KEY_MIN_FETCH_INTERVAL)
            .and_then(|raw| raw.parse().ok())
        {
            self.set_minimum_fetch_interval_seconds(value);
        }
        if let Some(value) = stored.get(KEY_ARP_CALLS).and_then(|raw| raw.parse().ok()) {
            if value > 0 {
                self.arp_calls_per_window = Some(value);
            }
        }
        if let Some(value) = stored
            .get(KEY_ARP_WINDOW_MINUTES)
            .and_then(|raw| raw.parse().ok())
        {
            if value > 0 {
                self.arp_window_minutes = Some(value);
            }
        }
    }

    /// Persists the current settings as a whole snapshot.
    pub fn persist(&self, store: &dyn SnapshotStore, namespace: &str) -> Result<(), StoreError> {
        let mut snapshot = Map::new();
        snapshot.insert(
            KEY_LAST_FETCH_TS.into(),
            Value::String(self.last_fetch_timestamp_millis.to_string()),
        );
        snapshot.insert(
            KEY_MIN_FETCH_INTERVAL.into(),
            Value::String(self.min_fetch_interval_seconds.to_string()),
        );
        if let Some(calls) = self.arp_calls_per_window {
            snapshot.insert(KEY_ARP_CALLS.into(), Value::String(calls.to_string()));
        }
        if let Some(window) = self.arp_window_minutes {
            snapshot.insert(
                KEY_ARP_WINDOW_MINUTES.into(),
                Value::String(window.to_string()),
            );
        }
        store.write(namespace, FILE_SETTINGS, &snapshot)
    }
}
