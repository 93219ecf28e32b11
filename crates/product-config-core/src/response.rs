//! Fetch-response payload parsing.
//!
//! The backend answers a fetch with a JSON object carrying a `kv` array of
//! `{"k": ..., "v": ...}` pairs, an optional millisecond timestamp under
//! `ts`, and an optional fetch-policy blob under `arp`. The timestamp is
//! parsed as a 64-bit integer so epoch values beyond the 32-bit range do
//! not silently overflow.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Response key holding the key/value pair array.
pub(crate) const KEY_KV: &str = "kv";
/// Pair key naming the configuration entry.
pub(crate) const KEY_ENTRY_KEY: &str = "k";
/// Pair key carrying the entry value.
pub(crate) const KEY_ENTRY_VALUE: &str = "v";
/// Response key holding the fetch timestamp in milliseconds.
pub(crate) const KEY_TIMESTAMP: &str = "ts";
/// Response key holding the server-assigned fetch-policy blob.
pub(crate) const KEY_ARP: &str = "arp";

/// Errors raised while decoding a fetch response.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload is missing the kv array")]
    MissingKv,
}

/// Decoded fetch response ready for ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPayload {
    /// Key/value configuration entries keyed by non-empty names.
    pub entries: HashMap<String, String>,
    /// Millisecond timestamp reported by the backend, when present.
    pub timestamp_millis: Option<i64>,
    /// Server-assigned fetch-policy blob, when present.
    pub arp: Option<Map<String, Value>>,
}

impl FetchPayload {
    /// Parses a raw JSON string into a payload.
    pub fn parse_str(raw: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::parse(&value)
    }

    /// Parses a decoded JSON document into a payload.
    ///
    /// Pairs with empty or missing keys are skipped; values of any scalar
    /// type are coerced to their string encoding. A document without a `kv`
    /// array is rejected outright.
    pub fn parse(document: &Value) -> Result<Self, PayloadError> {
        let Value::Object(object) = document else {
            return Err(PayloadError::NotAnObject);
        };
        let Some(Value::Array(pairs)) = object.get(KEY_KV) else {
            return Err(PayloadError::MissingKv);
        };

        let mut entries = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let Value::Object(pair) = pair else {
                debug!("skipping non-object kv entry");
                continue;
            };
            let key = match pair.get(KEY_ENTRY_KEY) {
                Some(Value::String(key)) if !key.is_empty() => key.clone(),
                _ => {
                    debug!("skipping kv entry without a usable key");
                    continue;
                }
            };
            let value = match pair.get(KEY_ENTRY_VALUE) {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => {
                    debug!("skipping kv entry {key:?} without a value");
                    continue;
                }
            };
            entries.insert(key, value);
        }

        let timestamp_millis = object.get(KEY_TIMESTAMP).and_then(Value::as_i64);
        let arp = match object.get(KEY_ARP) {
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => {
                debug!("ignoring non-object fetch policy blob");
                None
            }
            None => None,
        };

        Ok(Self {
            entries,
            timestamp_millis,
            arp,
        })
    }
}
