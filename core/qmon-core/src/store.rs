//! Key/value persistence seam.
//!
//! Each logical store is one key holding one JSON document. There are no
//! transactions: writes are last-write-wins per key. Reads are defensive: a
//! missing key yields the documented default, and so does a value that no
//! longer parses (with a diagnostic), so a corrupt entry never blocks startup.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{MonitorError, Result};

pub mod keys {
    pub const SLOT_ROSTER: &str = "slot_roster";
    pub const SLOT_COUNTER: &str = "slot_counter";
    pub const CONNECTED_AGENTS: &str = "connected_agents";
    pub const STATUS_TIMERS: &str = "status_timers";
    pub const CALL_TIMERS: &str = "call_timers";
    pub const CHAT_TIMERS: &str = "chat_timers";
    pub const PROHIBITED_KINDS: &str = "prohibited_kinds";
    pub const DAILY_AGGREGATES: &str = "daily_aggregates";
    pub const HISTORY: &str = "history";
    pub const ALERT_PREFS: &str = "alert_prefs";
    pub const FAVORITES: &str = "favorites";
    pub const VIEW_PREFS: &str = "view_prefs";
    pub const LAST_GROUP: &str = "last_group";

    pub const ALL: [&str; 13] = [
        SLOT_ROSTER,
        SLOT_COUNTER,
        CONNECTED_AGENTS,
        STATUS_TIMERS,
        CALL_TIMERS,
        CHAT_TIMERS,
        PROHIBITED_KINDS,
        DAILY_AGGREGATES,
        HISTORY,
        ALERT_PREFS,
        FAVORITES,
        VIEW_PREFS,
        LAST_GROUP,
    ];
}

pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// In-process store. Backs tests and `--memory` runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.values.clear();
        Ok(())
    }
}

/// Diagnostics collected while loading persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Keys whose value failed to parse and were replaced by defaults.
    pub malformed: Vec<String>,
    /// Keys that could not be read at all.
    pub unavailable: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty() && self.unavailable.is_empty()
    }
}

/// Reads and parses `key`, falling back to `T::default()` when it is absent,
/// unreadable or malformed.
pub fn load_or_default<T, S>(store: &S, key: &str, report: &mut LoadReport) -> T
where
    T: DeserializeOwned + Default,
    S: KvStore + ?Sized,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(err) => {
            tracing::warn!(key, error = %err, "Store read failed; using default");
            report.unavailable.push(key.to_string());
            return T::default();
        }
    };

    if raw.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key, error = %err, "Persisted value malformed; using default");
            report.malformed.push(key.to_string());
            T::default()
        }
    }
}

/// Serializes `value` under `key`.
pub fn save<T, S>(store: &mut S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: KvStore + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| MonitorError::Json {
        context: format!("Failed to serialize {}", key),
        source,
    })?;
    store.set(key, &raw)
}
