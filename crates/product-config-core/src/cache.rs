//! Three-tier configuration cache and merge logic.
//!
//! Values flow through three maps: *default* (supplied by the embedding
//! application), *fetched* (the most recent successfully parsed backend
//! response), and *activated* (the only tier visible to readers). Every
//! value is stored string-encoded and parsed on read, so a single
//! unparseable entry never poisons the rest of the cache.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

/// Sentinel returned by string lookups when no activated value exists.
pub const DEFAULT_VALUE_FOR_STRING: &str = "";
/// Sentinel returned by boolean lookups when no activated value exists.
pub const DEFAULT_VALUE_FOR_BOOLEAN: bool = false;
/// Sentinel returned by integer lookups when no activated value exists.
pub const DEFAULT_VALUE_FOR_LONG: i64 = 0;
/// Sentinel returned by floating-point lookups when no activated value exists.
pub const DEFAULT_VALUE_FOR_DOUBLE: f64 = 0.0;

/// Holds the default/fetched/activated tiers for one controller.
#[derive(Debug, Default)]
pub struct ConfigCache {
    default: HashMap<String, String>,
    fetched: HashMap<String, String>,
    activated: HashMap<String, String>,
}

impl ConfigCache {
    /// Creates an empty cache with all three tiers blank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default tier wholesale from a JSON object.
    ///
    /// Only boolean, numeric, and string values are retained; entries with
    /// other value types or empty keys are dropped rather than merged.
    pub fn set_defaults(&mut self, defaults: &Map<String, Value>) {
        self.default.clear();
        for (key, value) in defaults {
            if key.is_empty() {
                continue;
            }
            let Some(encoded) = encode_scalar(value) else {
                debug!("dropping default {key:?}: unsupported value type");
                continue;
            };
            self.default.insert(key.clone(), encoded);
        }
    }

    /// Replaces the fetched tier wholesale with a parsed server response.
    pub fn replace_fetched(&mut self, entries: HashMap<String, String>) {
        self.fetched = entries;
    }

    /// True when no fetched snapshot is held in memory.
    pub fn fetched_is_empty(&self) -> bool {
        self.fetched.is_empty()
    }

    /// Rebuilds the activated tier from defaults plus a pending snapshot.
    ///
    /// Defaults are applied first, then the pending entries overlay them, so
    /// for any key present in both tiers the fetched value wins.
    pub fn merge_into_activated(&mut self, pending: &HashMap<String, String>) {
        self.activated.clear();
        for (key, value) in &self.default {
            self.activated.insert(key.clone(), value.clone());
        }
        for (key, value) in pending {
            self.activated.insert(key.clone(), value.clone());
        }
    }

    /// Returns the activated tier as a map snapshot for persistence.
    pub fn activated_snapshot(&self) -> &HashMap<String, String> {
        &self.activated
    }

    /// Returns the fetched tier for persistence.
    pub fn fetched_snapshot(&self) -> &HashMap<String, String> {
        &self.fetched
    }

    /// Clears every tier. Used by reset.
    pub fn clear_all(&mut self) {
        self.default.clear();
        self.fetched.clear();
        self.activated.clear();
    }

    /// Number of entries per tier, in (default, fetched, activated) order.
    pub fn tier_sizes(&self) -> (usize, usize, usize) {
        (self.default.len(), self.fetched.len(), self.activated.len())
    }

    /// Raw activated lookup; `None` when the key is absent or empty.
    pub fn activated_value(&self, key: &str) -> Option<&str> {
        if key.is_empty() {
            return None;
        }
        self.activated.get(key).map(String::as_str)
    }

    /// Activated lookup parsed as a string.
    pub fn string_value(&self, key: &str) -> String {
        self.activated_value(key)
            .map(str::to_owned)
            .unwrap_or_else(|| DEFAULT_VALUE_FOR_STRING.to_owned())
    }

    /// Activated lookup parsed as a boolean; anything but `true` is `false`.
    pub fn boolean_value(&self, key: &str) -> bool {
        self.activated_value(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(DEFAULT_VALUE_FOR_BOOLEAN)
    }

    /// Activated lookup parsed as a signed 64-bit integer.
    pub fn long_value(&self, key: &str) -> i64 {
        match self.activated_value(key) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                debug!("error parsing long for key {key:?}: {err}");
                DEFAULT_VALUE_FOR_LONG
            }),
            None => DEFAULT_VALUE_FOR_LONG,
        }
    }

    /// Activated lookup parsed as a 64-bit float.
    pub fn double_value(&self, key: &str) -> f64 {
        match self.activated_value(key) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                debug!("error parsing double for key {key:?}: {err}");
                DEFAULT_VALUE_FOR_DOUBLE
            }),
            None => DEFAULT_VALUE_FOR_DOUBLE,
        }
    }
}

/// String-encodes a JSON scalar, rejecting arrays, objects, and null.
fn encode_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
