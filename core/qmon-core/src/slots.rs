//! Stable slot numbers for connected agents.
//!
//! Slots only drive display ordering. An agent keeps its slot across restarts
//! until it finishes a call, at which point it moves to the back of the
//! roster and every slot is renumbered by position.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Slot used for sorting agents that have no roster entry.
pub const UNASSIGNED_SLOT: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEntry {
    pub name: String,
    pub slot: u32,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub total_calls: u32,
    #[serde(default)]
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

/// Ordered roster plus the allocation counter. The list order always matches
/// slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRoster {
    entries: Vec<SlotEntry>,
    counter: u32,
}

impl Default for SlotRoster {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            counter: 1,
        }
    }
}

impl SlotRoster {
    /// Rebuilds a roster from persisted parts. Entries are re-sorted by slot
    /// and duplicate names dropped; the counter is raised past every slot in
    /// use so a stale counter can never hand out a taken number.
    pub fn from_parts(mut entries: Vec<SlotEntry>, counter: u32) -> Self {
        entries.sort_by_key(|entry| entry.slot);
        let mut seen = std::collections::HashSet::new();
        entries.retain(|entry| seen.insert(entry.name.clone()));

        let floor = entries.iter().map(|entry| entry.slot).max().unwrap_or(0) + 1;
        Self {
            entries,
            counter: counter.max(floor).max(1),
        }
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the agent's slot, allocating the next counter value on first
    /// sight. Known agents get their `last_seen` refreshed.
    pub fn assign(&mut self, name: &str, now: DateTime<Utc>) -> u32 {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
            entry.last_seen = now;
            return entry.slot;
        }

        let slot = self.counter;
        self.counter += 1;
        self.entries.push(SlotEntry {
            name: name.to_string(),
            slot,
            assigned_at: now,
            total_calls: 0,
            last_call_at: None,
            last_seen: now,
        });
        slot
    }

    /// Assigns every present name, in order.
    pub fn update_presence<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) {
        for name in names {
            self.assign(name, now);
        }
    }

    /// Sends the agent to the back of the roster and renumbers `1..=N`.
    /// Returns false when the agent has no entry.
    pub fn reorder_after_call_ends(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let Some(idx) = self.entries.iter().position(|entry| entry.name == name) else {
            return false;
        };

        let mut entry = self.entries.remove(idx);
        entry.total_calls += 1;
        entry.last_call_at = Some(now);
        self.entries.push(entry);

        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.slot = u32::try_from(position + 1).unwrap_or(u32::MAX);
        }
        true
    }

    /// Evicts entries not seen within `max_idle_days`. Returns how many went.
    pub fn cleanup(&mut self, max_idle_days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(i64::from(max_idle_days));
        let before = self.entries.len();
        self.entries.retain(|entry| entry.last_seen > cutoff);
        before - self.entries.len()
    }

    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.slot)
    }

    pub fn sort_slot(&self, name: &str) -> u32 {
        self.slot_of(name).unwrap_or(UNASSIGNED_SLOT)
    }

    pub fn get(&self, name: &str) -> Option<&SlotEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}
