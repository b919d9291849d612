//! Interval timers for status, call and chat occupancy.
//!
//! Each agent has at most one status timer, one call timer and a fixed array
//! of chat timers. Status changes are trusted immediately. Call and chat
//! intervals only close after `clear_ticks` consecutive negative observations,
//! which absorbs single-poll misses from the scraper.
//!
//! `started_at` only ever moves through [`correct_drift`]: when the host
//! reports an elapsed time that disagrees with ours by more than the
//! tolerance, the start is realigned without closing the interval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{MonitorConfig, MAX_CHAT_SLOTS};
use crate::status::{ProhibitedKind, StatusKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPolicy {
    pub clear_ticks: u32,
    pub drift_tolerance_ms: i64,
    pub max_chats: usize,
}

impl TimerPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            clear_ticks: config.timers.clear_ticks.max(1),
            drift_tolerance_ms: config.timers.drift_tolerance_ms,
            max_chats: config.max_chats(),
        }
    }
}

impl Default for TimerPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTimer {
    pub key: StatusKey,
    pub started_at: DateTime<Utc>,
}

/// A debounced interval. Used for calls and for each chat slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalTimer {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub off_streak: u32,
}

pub type CallTimer = IntervalTimer;
pub type ChatTimer = IntervalTimer;

/// Chat timers indexed by logical chat slot.
pub type ChatSlots = [Option<ChatTimer>; MAX_CHAT_SLOTS];

impl IntervalTimer {
    fn open(now: DateTime<Utc>, reported_secs: Option<u64>) -> Self {
        let started_at = reported_secs
            .and_then(|secs| start_for_elapsed(now, secs))
            .unwrap_or(now);
        Self {
            started_at,
            off_streak: 0,
        }
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        elapsed_ms(self.started_at, now)
    }
}

/// Emitted by the timer engine; the engine routes these into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    StatusChanged {
        from: Option<StatusKey>,
        to: StatusKey,
        /// Duration of the interval that just closed.
        closed_ms: Option<i64>,
    },
    ProhibitedStarted {
        kind: Option<ProhibitedKind>,
    },
    ProhibitedEnded {
        kind: Option<ProhibitedKind>,
        duration_ms: i64,
    },
    CallClosed {
        duration_ms: i64,
        forced: bool,
    },
    ChatClosed {
        slot: usize,
        duration_ms: i64,
    },
}

pub fn elapsed_ms(started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - started_at).num_milliseconds().max(0)
}

fn start_for_elapsed(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let ms = i64::try_from(secs).ok()?.checked_mul(1000)?;
    now.checked_sub_signed(Duration::try_milliseconds(ms)?)
}

/// Realigns `started_at` to a host-reported elapsed time when the two differ
/// by more than `tolerance_ms`. Returns whether the start moved.
pub fn correct_drift(
    started_at: &mut DateTime<Utc>,
    reported_secs: u64,
    now: DateTime<Utc>,
    tolerance_ms: i64,
) -> bool {
    let Some(desired_ms) = i64::try_from(reported_secs)
        .ok()
        .and_then(|secs| secs.checked_mul(1000))
    else {
        return false;
    };
    let local_ms = (now - *started_at).num_milliseconds();
    if (desired_ms - local_ms).abs() <= tolerance_ms {
        return false;
    }
    match start_for_elapsed(now, reported_secs) {
        Some(corrected) => {
            *started_at = corrected;
            true
        }
        None => false,
    }
}

/// All live timers, keyed by agent name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerBook {
    pub status: BTreeMap<String, StatusTimer>,
    pub calls: BTreeMap<String, CallTimer>,
    pub chats: BTreeMap<String, ChatSlots>,
    /// Sub-kind recorded when an agent entered the prohibited category.
    pub prohibited: BTreeMap<String, ProhibitedKind>,
}

impl TimerBook {
    /// Opens a new status interval when the key changes, closing the previous
    /// one. An unchanged key is a no-op apart from drift correction.
    pub fn observe_status(
        &mut self,
        name: &str,
        key: StatusKey,
        prohibited: Option<ProhibitedKind>,
        reported_secs: Option<u64>,
        now: DateTime<Utc>,
        policy: &TimerPolicy,
    ) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        let previous = self.status.get(name).copied();

        if previous.map(|timer| timer.key) != Some(key) {
            let closed_ms = previous.map(|timer| elapsed_ms(timer.started_at, now));

            if let Some(prev) = previous.filter(|timer| timer.key == StatusKey::Prohibited) {
                events.push(TimerEvent::ProhibitedEnded {
                    kind: self.prohibited.remove(name),
                    duration_ms: elapsed_ms(prev.started_at, now),
                });
            }
            if key == StatusKey::Prohibited {
                match prohibited {
                    Some(kind) => {
                        self.prohibited.insert(name.to_string(), kind);
                    }
                    None => {
                        self.prohibited.remove(name);
                    }
                }
                events.push(TimerEvent::ProhibitedStarted { kind: prohibited });
            }

            self.status.insert(
                name.to_string(),
                StatusTimer {
                    key,
                    started_at: now,
                },
            );
            events.push(TimerEvent::StatusChanged {
                from: previous.map(|timer| timer.key),
                to: key,
                closed_ms,
            });
        }

        if let (Some(secs), Some(timer)) = (reported_secs, self.status.get_mut(name)) {
            correct_drift(&mut timer.started_at, secs, now, policy.drift_tolerance_ms);
        }

        events
    }

    /// Feeds one call observation through the debounce.
    pub fn observe_call(
        &mut self,
        name: &str,
        in_call: bool,
        reported_secs: Option<u64>,
        now: DateTime<Utc>,
        policy: &TimerPolicy,
    ) -> Option<TimerEvent> {
        if in_call {
            match self.calls.get_mut(name) {
                Some(timer) => {
                    timer.off_streak = 0;
                    if let Some(secs) = reported_secs {
                        correct_drift(&mut timer.started_at, secs, now, policy.drift_tolerance_ms);
                    }
                }
                None => {
                    self.calls
                        .insert(name.to_string(), IntervalTimer::open(now, reported_secs));
                }
            }
            return None;
        }

        let timer = self.calls.get_mut(name)?;
        timer.off_streak += 1;
        if timer.off_streak < policy.clear_ticks {
            return None;
        }

        let duration_ms = timer.elapsed_ms(now);
        self.calls.remove(name);
        Some(TimerEvent::CallClosed {
            duration_ms,
            forced: false,
        })
    }

    /// Closes an open call without waiting for the debounce.
    pub fn force_close_call(&mut self, name: &str, now: DateTime<Utc>) -> Option<TimerEvent> {
        let timer = self.calls.remove(name)?;
        Some(TimerEvent::CallClosed {
            duration_ms: timer.elapsed_ms(now),
            forced: true,
        })
    }

    /// Feeds one chat observation. Slots below `count` are active; slots at or
    /// above it run their own debounce. A slot that has closed is cleared, so
    /// the array never holds closed timers beyond the reported count.
    pub fn observe_chats(
        &mut self,
        name: &str,
        count: usize,
        reported: &[Option<u64>],
        now: DateTime<Utc>,
        policy: &TimerPolicy,
    ) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        let count = count.min(policy.max_chats);

        if count == 0 && !self.chats.contains_key(name) {
            return events;
        }

        let slots = self.chats.entry(name.to_string()).or_default();
        for (idx, slot) in slots.iter_mut().enumerate() {
            let reported_secs = reported.get(idx).copied().flatten();

            if idx < count {
                match slot {
                    Some(timer) => {
                        timer.off_streak = 0;
                        if let Some(secs) = reported_secs {
                            correct_drift(
                                &mut timer.started_at,
                                secs,
                                now,
                                policy.drift_tolerance_ms,
                            );
                        }
                    }
                    None => *slot = Some(IntervalTimer::open(now, reported_secs)),
                }
                continue;
            }

            if let Some(timer) = slot {
                timer.off_streak += 1;
                if timer.off_streak >= policy.clear_ticks {
                    events.push(TimerEvent::ChatClosed {
                        slot: idx,
                        duration_ms: timer.elapsed_ms(now),
                    });
                    *slot = None;
                }
            }
        }

        if slots.iter().all(Option::is_none) {
            self.chats.remove(name);
        }

        events
    }

    pub fn status_key(&self, name: &str) -> Option<StatusKey> {
        self.status.get(name).map(|timer| timer.key)
    }

    pub fn status_elapsed_ms(&self, name: &str, now: DateTime<Utc>) -> Option<i64> {
        self.status
            .get(name)
            .map(|timer| elapsed_ms(timer.started_at, now))
    }

    pub fn call_elapsed_ms(&self, name: &str, now: DateTime<Utc>) -> Option<i64> {
        self.calls.get(name).map(|timer| timer.elapsed_ms(now))
    }

    /// Elapsed time per chat slot, `None` for idle slots.
    pub fn chat_elapsed_ms(&self, name: &str, now: DateTime<Utc>) -> [Option<i64>; MAX_CHAT_SLOTS] {
        let mut out = [None; MAX_CHAT_SLOTS];
        if let Some(slots) = self.chats.get(name) {
            for (idx, slot) in slots.iter().enumerate() {
                out[idx] = slot.map(|timer| timer.elapsed_ms(now));
            }
        }
        out
    }

    pub fn prohibited_kind(&self, name: &str) -> Option<ProhibitedKind> {
        self.prohibited.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn status_change_closes_previous_and_opens_new() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        let events = book.observe_status("A", StatusKey::QueuedIdle, None, None, t0(), &policy);
        assert_eq!(
            events,
            vec![TimerEvent::StatusChanged {
                from: None,
                to: StatusKey::QueuedIdle,
                closed_ms: None
            }]
        );

        let same = book.observe_status(
            "A",
            StatusKey::QueuedIdle,
            None,
            None,
            t0() + secs(5),
            &policy,
        );
        assert!(same.is_empty());

        let events = book.observe_status("A", StatusKey::Call, None, None, t0() + secs(30), &policy);
        assert_eq!(
            events,
            vec![TimerEvent::StatusChanged {
                from: Some(StatusKey::QueuedIdle),
                to: StatusKey::Call,
                closed_ms: Some(30_000)
            }]
        );
        assert_eq!(book.status["A"].started_at, t0() + secs(30));
    }

    #[test]
    fn leaving_prohibited_reports_stored_sub_kind() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        let entered = book.observe_status(
            "A",
            StatusKey::Prohibited,
            Some(ProhibitedKind::Postcall),
            None,
            t0(),
            &policy,
        );
        assert!(entered.contains(&TimerEvent::ProhibitedStarted {
            kind: Some(ProhibitedKind::Postcall)
        }));

        let left = book.observe_status("A", StatusKey::Available, None, None, t0() + secs(90), &policy);
        assert!(left.contains(&TimerEvent::ProhibitedEnded {
            kind: Some(ProhibitedKind::Postcall),
            duration_ms: 90_000
        }));
        assert!(book.prohibited.is_empty());
    }

    #[test]
    fn call_closes_only_after_clear_ticks() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        assert!(book.observe_call("A", true, None, t0(), &policy).is_none());
        assert!(book.observe_call("A", false, None, t0() + secs(1), &policy).is_none());
        assert!(book.observe_call("A", false, None, t0() + secs(2), &policy).is_none());
        assert!(book.calls.contains_key("A"));

        let closed = book.observe_call("A", false, None, t0() + secs(3), &policy);
        assert_eq!(
            closed,
            Some(TimerEvent::CallClosed {
                duration_ms: 3_000,
                forced: false
            })
        );
        assert!(!book.calls.contains_key("A"));
    }

    #[test]
    fn positive_observation_resets_off_streak() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        book.observe_call("A", true, None, t0(), &policy);
        book.observe_call("A", false, None, t0() + secs(1), &policy);
        book.observe_call("A", false, None, t0() + secs(2), &policy);
        book.observe_call("A", true, None, t0() + secs(3), &policy);
        assert_eq!(book.calls["A"].off_streak, 0);

        assert!(book.observe_call("A", false, None, t0() + secs(4), &policy).is_none());
        assert!(book.observe_call("A", false, None, t0() + secs(5), &policy).is_none());
        assert!(book.observe_call("A", false, None, t0() + secs(6), &policy).is_some());
    }

    #[test]
    fn not_in_call_without_timer_is_noop() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();
        assert!(book.observe_call("A", false, None, t0(), &policy).is_none());
        assert!(book.calls.is_empty());
    }

    #[test]
    fn call_opens_at_reported_elapsed() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();
        book.observe_call("A", true, Some(120), t0(), &policy);
        assert_eq!(book.calls["A"].started_at, t0() - secs(120));
    }

    #[test]
    fn drift_within_tolerance_leaves_start_alone() {
        let mut started = t0();
        let now = t0() + secs(60);
        assert!(!correct_drift(&mut started, 64, now, 5_000));
        assert!(!correct_drift(&mut started, 55, now, 5_000));
        assert_eq!(started, t0());
    }

    #[test]
    fn drift_beyond_tolerance_realigns_start() {
        let mut started = t0();
        let now = t0() + secs(60);
        assert!(correct_drift(&mut started, 90, now, 5_000));
        assert_eq!(elapsed_ms(started, now), 90_000);
    }

    #[test]
    fn force_close_skips_debounce() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();
        book.observe_call("A", true, None, t0(), &policy);
        let event = book.force_close_call("A", t0() + secs(45));
        assert_eq!(
            event,
            Some(TimerEvent::CallClosed {
                duration_ms: 45_000,
                forced: true
            })
        );
        assert!(book.force_close_call("A", t0() + secs(46)).is_none());
    }

    #[test]
    fn chat_slots_close_independently() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        book.observe_chats("A", 2, &[], t0(), &policy);
        assert!(book.chats["A"].iter().all(Option::is_some));

        // Second chat ends; first keeps running.
        for tick in 1..=2 {
            let events = book.observe_chats("A", 1, &[], t0() + secs(tick), &policy);
            assert!(events.is_empty());
        }
        let events = book.observe_chats("A", 1, &[], t0() + secs(3), &policy);
        assert_eq!(
            events,
            vec![TimerEvent::ChatClosed {
                slot: 1,
                duration_ms: 3_000
            }]
        );
        assert!(book.chats["A"][0].is_some());
        assert!(book.chats["A"][1].is_none());
        assert_eq!(book.chats["A"][0].unwrap().off_streak, 0);
    }

    #[test]
    fn chat_regrowth_resets_closing_slot() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        book.observe_chats("A", 2, &[], t0(), &policy);
        book.observe_chats("A", 1, &[], t0() + secs(1), &policy);
        assert_eq!(book.chats["A"][1].unwrap().off_streak, 1);

        book.observe_chats("A", 2, &[], t0() + secs(2), &policy);
        let slot = book.chats["A"][1].unwrap();
        assert_eq!(slot.off_streak, 0);
        assert_eq!(slot.started_at, t0());
    }

    #[test]
    fn chat_entry_dropped_once_every_slot_closes() {
        let policy = TimerPolicy::default();
        let mut book = TimerBook::default();

        book.observe_chats("A", 1, &[Some(30)], t0(), &policy);
        assert_eq!(book.chats["A"][0].unwrap().started_at, t0() - secs(30));
        for tick in 1..=3 {
            book.observe_chats("A", 0, &[], t0() + secs(tick), &policy);
        }
        assert!(!book.chats.contains_key("A"));
        assert!(book.observe_chats("A", 0, &[], t0() + secs(10), &policy).is_empty());
    }
}
