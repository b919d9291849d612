//! Application state owned by the engine.
//!
//! One struct holds every store; the engine passes it by reference into each
//! component. Each field (or pair of fields) maps to one persisted key.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::alerts::AlertPrefs;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::ledger::{AggregateTable, HistoryTable, Ledger};
use crate::slots::{SlotEntry, SlotRoster};
use crate::status::{ProhibitedKind, StatusKey};
use crate::store::{keys, load_or_default, KvStore, LoadReport};
use crate::timers::{CallTimer, ChatSlots, StatusTimer, TimerBook};
use crate::view::ViewPrefs;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub slots: SlotRoster,
    /// Names present in the latest processed cycle, in roster order.
    pub connected: Vec<String>,
    pub timers: TimerBook,
    pub ledger: Ledger,
    pub alert_prefs: AlertPrefs,
    pub favorites: BTreeSet<String>,
    pub view_prefs: ViewPrefs,
    /// Category each agent was last classified into.
    pub last_group: BTreeMap<String, StatusKey>,
}

impl AppState {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            ledger: Ledger::new(config),
            ..Self::default()
        }
    }

    /// Loads every key, substituting defaults for anything absent or
    /// malformed.
    pub fn load<S: KvStore + ?Sized>(store: &S, config: &MonitorConfig) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        let entries: Vec<SlotEntry> = load_or_default(store, keys::SLOT_ROSTER, &mut report);
        let counter: Option<u32> = load_or_default(store, keys::SLOT_COUNTER, &mut report);
        let slots = SlotRoster::from_parts(entries, counter.unwrap_or(1));

        let timers = TimerBook {
            status: load_or_default::<BTreeMap<String, StatusTimer>, _>(
                store,
                keys::STATUS_TIMERS,
                &mut report,
            ),
            calls: load_or_default::<BTreeMap<String, CallTimer>, _>(
                store,
                keys::CALL_TIMERS,
                &mut report,
            ),
            chats: load_or_default::<BTreeMap<String, ChatSlots>, _>(
                store,
                keys::CHAT_TIMERS,
                &mut report,
            ),
            prohibited: load_or_default::<BTreeMap<String, ProhibitedKind>, _>(
                store,
                keys::PROHIBITED_KINDS,
                &mut report,
            ),
        };

        let aggregates: AggregateTable = load_or_default(store, keys::DAILY_AGGREGATES, &mut report);
        let history: HistoryTable = load_or_default(store, keys::HISTORY, &mut report);

        let state = Self {
            slots,
            connected: load_or_default(store, keys::CONNECTED_AGENTS, &mut report),
            timers,
            ledger: Ledger::from_parts(aggregates, history, config),
            alert_prefs: load_or_default(store, keys::ALERT_PREFS, &mut report),
            favorites: load_or_default(store, keys::FAVORITES, &mut report),
            view_prefs: load_or_default(store, keys::VIEW_PREFS, &mut report),
            last_group: load_or_default(store, keys::LAST_GROUP, &mut report),
        };

        (state, report)
    }

    /// Clears every in-memory structure.
    pub fn reset(&mut self, config: &MonitorConfig) {
        *self = Self::new(config);
    }

    /// Drops timers and last groups for agents no longer on the slot roster.
    /// Run after slot cleanup.
    pub fn forget_departed(&mut self) {
        let known: BTreeSet<&str> = self
            .slots
            .entries()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        let keep = |name: &String| known.contains(name.as_str());
        self.timers.status.retain(|name, _| keep(name));
        self.timers.calls.retain(|name, _| keep(name));
        self.timers.chats.retain(|name, _| keep(name));
        self.timers.prohibited.retain(|name, _| keep(name));
        self.last_group.retain(|name, _| keep(name));
        tracing::debug!(remaining = known.len(), "Pruned timers for departed agents");
    }
}

/// Writes state back to the store, skipping keys whose serialized value has
/// not changed since the last successful write.
#[derive(Debug, Default)]
pub struct Persister {
    written: HashMap<&'static str, String>,
}

impl Persister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best effort: every key is attempted, failures are logged and returned.
    pub fn persist<S: KvStore + ?Sized>(&mut self, store: &mut S, state: &AppState) -> Vec<String> {
        let mut failures = Vec::new();

        self.write(store, keys::SLOT_ROSTER, state.slots.entries(), &mut failures);
        self.write(store, keys::SLOT_COUNTER, &state.slots.counter(), &mut failures);
        self.write(store, keys::CONNECTED_AGENTS, &state.connected, &mut failures);
        self.write(store, keys::STATUS_TIMERS, &state.timers.status, &mut failures);
        self.write(store, keys::CALL_TIMERS, &state.timers.calls, &mut failures);
        self.write(store, keys::CHAT_TIMERS, &state.timers.chats, &mut failures);
        self.write(store, keys::PROHIBITED_KINDS, &state.timers.prohibited, &mut failures);
        self.write(store, keys::DAILY_AGGREGATES, state.ledger.aggregates(), &mut failures);
        self.write(store, keys::HISTORY, state.ledger.history(), &mut failures);
        self.write(store, keys::ALERT_PREFS, &state.alert_prefs, &mut failures);
        self.write(store, keys::FAVORITES, &state.favorites, &mut failures);
        self.write(store, keys::VIEW_PREFS, &state.view_prefs, &mut failures);
        self.write(store, keys::LAST_GROUP, &state.last_group, &mut failures);

        failures
    }

    /// Clears the store and forgets what was written.
    pub fn clear<S: KvStore + ?Sized>(&mut self, store: &mut S) -> Result<()> {
        self.written.clear();
        store.clear()
    }

    fn write<S, T>(&mut self, store: &mut S, key: &'static str, value: &T, failures: &mut Vec<String>)
    where
        S: KvStore + ?Sized,
        T: Serialize + ?Sized,
    {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to serialize state");
                failures.push(key.to_string());
                return;
            }
        };
        if self.written.get(key) == Some(&raw) {
            return;
        }
        match store.set(key, &raw) {
            Ok(()) => {
                self.written.insert(key, raw);
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to persist state; continuing in memory");
                failures.push(key.to_string());
            }
        }
    }
}
