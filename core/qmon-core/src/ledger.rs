//! Daily aggregates and per-agent history.
//!
//! Both are keyed by UTC day (`YYYY-MM-DD`) and agent name. A closed interval
//! updates its aggregate bucket and appends its history event in one call, so
//! the two can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::config::{MonitorConfig, DEFAULT_AGGREGATE_CAP_MS, DEFAULT_HISTORY_CAP};
use crate::status::{ProhibitedKind, StatusKey};

pub type DayKey = String;

pub fn day_key(now: DateTime<Utc>) -> DayKey {
    now.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyAggregate {
    pub call_ms: u64,
    pub chat_ms: u64,
    pub postcall_ms: u64,
    pub rona_ms: u64,
}

impl DailyAggregate {
    pub fn total_ms(&self) -> u64 {
        self.call_ms + self.chat_ms + self.postcall_ms + self.rona_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HistoryEvent {
    Status {
        #[serde(default)]
        from: Option<StatusKey>,
        to: StatusKey,
        #[serde(default)]
        prev_ms: Option<i64>,
    },
    ProhibOn {
        #[serde(default)]
        sub: Option<ProhibitedKind>,
    },
    ProhibOff {
        #[serde(default)]
        sub: Option<ProhibitedKind>,
        dur_ms: u64,
    },
    CallEnd {
        dur_ms: u64,
    },
    ChatEnd {
        #[serde(default)]
        slot: usize,
        dur_ms: u64,
    },
}

impl HistoryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEvent::Status { .. } => "status",
            HistoryEvent::ProhibOn { .. } => "prohib_on",
            HistoryEvent::ProhibOff { .. } => "prohib_off",
            HistoryEvent::CallEnd { .. } => "call_end",
            HistoryEvent::ChatEnd { .. } => "chat_end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

/// Which aggregate bucket a closed interval feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Call,
    Chat { slot: usize },
    Prohibited(Option<ProhibitedKind>),
}

pub type AggregateTable = BTreeMap<DayKey, BTreeMap<String, DailyAggregate>>;
pub type HistoryTable = BTreeMap<DayKey, BTreeMap<String, VecDeque<HistoryEntry>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    aggregates: AggregateTable,
    history: HistoryTable,
    history_cap: usize,
    aggregate_cap_ms: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            aggregates: AggregateTable::new(),
            history: HistoryTable::new(),
            history_cap: DEFAULT_HISTORY_CAP,
            aggregate_cap_ms: DEFAULT_AGGREGATE_CAP_MS,
        }
    }
}

impl Ledger {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::from_parts(AggregateTable::new(), HistoryTable::new(), config)
    }

    /// Rebuilds from persisted tables, re-applying the history cap in case it
    /// shrank since the tables were written.
    pub fn from_parts(
        aggregates: AggregateTable,
        mut history: HistoryTable,
        config: &MonitorConfig,
    ) -> Self {
        let history_cap = config.retention.history_cap.max(1);
        for agents in history.values_mut() {
            for events in agents.values_mut() {
                while events.len() > history_cap {
                    events.pop_front();
                }
            }
        }
        Self {
            aggregates,
            history,
            history_cap,
            aggregate_cap_ms: config.retention.aggregate_cap_ms,
        }
    }

    pub fn aggregates(&self) -> &AggregateTable {
        &self.aggregates
    }

    pub fn history(&self) -> &HistoryTable {
        &self.history
    }

    /// Clamps `duration_ms` to `[0, aggregate cap]`, adds it to the matching
    /// bucket for today and appends the closing event. Returns the amount
    /// actually added.
    pub fn record_interval_close(
        &mut self,
        name: &str,
        kind: IntervalKind,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> u64 {
        let capped = clamp_duration(duration_ms, self.aggregate_cap_ms);
        let day = day_key(now);

        let bucket = self
            .aggregates
            .entry(day)
            .or_default()
            .entry(name.to_string())
            .or_default();
        let event = match kind {
            IntervalKind::Call => {
                bucket.call_ms += capped;
                HistoryEvent::CallEnd { dur_ms: capped }
            }
            IntervalKind::Chat { slot } => {
                bucket.chat_ms += capped;
                HistoryEvent::ChatEnd {
                    slot,
                    dur_ms: capped,
                }
            }
            IntervalKind::Prohibited(sub) => {
                match sub {
                    Some(ProhibitedKind::Rona) => bucket.rona_ms += capped,
                    Some(ProhibitedKind::Postcall) => bucket.postcall_ms += capped,
                    None => {}
                }
                HistoryEvent::ProhibOff { sub, dur_ms: capped }
            }
        };

        self.append(name, event, now);
        capped
    }

    /// Appends to today's ring for `name`, evicting the oldest entry past the
    /// cap.
    pub fn append(&mut self, name: &str, event: HistoryEvent, now: DateTime<Utc>) {
        let events = self
            .history
            .entry(day_key(now))
            .or_default()
            .entry(name.to_string())
            .or_default();
        events.push_back(HistoryEntry { ts: now, event });
        while events.len() > self.history_cap {
            events.pop_front();
        }
    }

    pub fn aggregate(&self, day: &str, name: &str) -> DailyAggregate {
        self.aggregates
            .get(day)
            .and_then(|agents| agents.get(name))
            .copied()
            .unwrap_or_default()
    }

    pub fn aggregates_for_day(&self, day: &str) -> Option<&BTreeMap<String, DailyAggregate>> {
        self.aggregates.get(day)
    }

    /// History for one agent on one day, oldest first.
    pub fn events(&self, day: &str, name: &str) -> Vec<&HistoryEntry> {
        self.history
            .get(day)
            .and_then(|agents| agents.get(name))
            .map(|events| events.iter().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.aggregates.clear();
        self.history.clear();
    }
}

fn clamp_duration(duration_ms: i64, cap_ms: u64) -> u64 {
    u64::try_from(duration_ms.max(0))
        .unwrap_or(0)
        .min(cap_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn close_updates_bucket_and_history_together() {
        let mut ledger = Ledger::default();
        let added = ledger.record_interval_close("A", IntervalKind::Call, 720_000, t0());
        assert_eq!(added, 720_000);

        let day = day_key(t0());
        assert_eq!(ledger.aggregate(&day, "A").call_ms, 720_000);
        let events = ledger.events(&day, "A");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, HistoryEvent::CallEnd { dur_ms: 720_000 });
    }

    #[test]
    fn single_increment_is_capped_at_eight_hours() {
        let mut ledger = Ledger::default();
        let ten_hours = 10 * 3600 * 1000;
        ledger.record_interval_close("A", IntervalKind::Chat { slot: 0 }, ten_hours, t0());
        assert_eq!(
            ledger.aggregate(&day_key(t0()), "A").chat_ms,
            8 * 3600 * 1000
        );
    }

    #[test]
    fn negative_duration_counts_as_zero() {
        let mut ledger = Ledger::default();
        assert_eq!(
            ledger.record_interval_close("A", IntervalKind::Call, -5, t0()),
            0
        );
    }

    #[test]
    fn prohibited_closes_route_by_sub_kind() {
        let mut ledger = Ledger::default();
        ledger.record_interval_close(
            "A",
            IntervalKind::Prohibited(Some(ProhibitedKind::Rona)),
            1_000,
            t0(),
        );
        ledger.record_interval_close(
            "A",
            IntervalKind::Prohibited(Some(ProhibitedKind::Postcall)),
            2_000,
            t0(),
        );
        let agg = ledger.aggregate(&day_key(t0()), "A");
        assert_eq!(agg.rona_ms, 1_000);
        assert_eq!(agg.postcall_ms, 2_000);
        assert_eq!(agg.total_ms(), 3_000);
    }

    #[test]
    fn history_ring_keeps_newest_two_hundred() {
        let mut ledger = Ledger::default();
        for n in 0..250u64 {
            ledger.append(
                "A",
                HistoryEvent::CallEnd { dur_ms: n },
                t0() + Duration::seconds(n as i64),
            );
        }
        let events = ledger.events(&day_key(t0()), "A");
        assert_eq!(events.len(), 200);
        assert_eq!(events[0].event, HistoryEvent::CallEnd { dur_ms: 50 });
        assert_eq!(events[199].event, HistoryEvent::CallEnd { dur_ms: 249 });
    }

    #[test]
    fn days_are_kept_apart() {
        let mut ledger = Ledger::default();
        ledger.record_interval_close("A", IntervalKind::Call, 1_000, t0());
        ledger.record_interval_close("A", IntervalKind::Call, 1_000, t0() + Duration::days(1));
        assert_eq!(ledger.aggregate(&day_key(t0()), "A").call_ms, 1_000);
        assert_eq!(ledger.aggregates().len(), 2);
    }

    #[test]
    fn history_entry_serializes_flat() {
        let entry = HistoryEntry {
            ts: t0(),
            event: HistoryEvent::ProhibOff {
                sub: Some(ProhibitedKind::Rona),
                dur_ms: 42,
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "prohib_off");
        assert_eq!(json["sub"], "rona");
        assert_eq!(json["durMs"], 42);

        let back: HistoryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn from_parts_applies_smaller_cap() {
        let mut ledger = Ledger::default();
        for n in 0..10u64 {
            ledger.append("A", HistoryEvent::CallEnd { dur_ms: n }, t0());
        }
        let mut config = MonitorConfig::default();
        config.retention.history_cap = 4;
        let rebuilt = Ledger::from_parts(ledger.aggregates().clone(), ledger.history().clone(), &config);
        let events = rebuilt.events(&day_key(t0()), "A");
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event, HistoryEvent::CallEnd { dur_ms: 6 });
    }
}
