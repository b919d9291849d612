//! Edge-triggered alerts.
//!
//! Three conditions are tracked per agent: prohibited status, a long call and
//! a long first chat. Each fires once when it becomes true and re-arms when it
//! becomes false. Mute and snooze suppress delivery only; the armed flags move
//! exactly as they would unmuted, so unmuting mid-episode does not replay it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AlertConfig;
use crate::status::ProhibitedKind;
use crate::view::format_hms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudibleCue {
    pub frequency: u32,
    pub duration_ms: u32,
}

/// Receives alert output. Implementations must not block the cycle.
pub trait NotificationSink {
    fn notify(&mut self, notification: &Notification);
    fn cue(&mut self, cue: AudibleCue);
}

/// Keeps everything it is given. Used by tests and by replay summaries.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub notifications: Vec<Notification>,
    pub cues: Vec<AudibleCue>,
}

impl NotificationSink for CollectingSink {
    fn notify(&mut self, notification: &Notification) {
        self.notifications.push(notification.clone());
    }

    fn cue(&mut self, cue: AudibleCue) {
        self.cues.push(cue);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Prohibited,
    LongCall,
    LongChat,
}

impl AlertKind {
    pub fn cue(self) -> AudibleCue {
        let frequency = match self {
            AlertKind::Prohibited => 520,
            AlertKind::LongCall => 880,
            AlertKind::LongChat => 700,
        };
        AudibleCue {
            frequency,
            duration_ms: 200,
        }
    }
}

/// Persisted mute/snooze state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertPrefs {
    pub muted: bool,
    pub snooze_until: Option<DateTime<Utc>>,
}

impl AlertPrefs {
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.is_some_and(|until| now < until)
    }
}

/// Live signals for one agent in one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertInput<'a> {
    pub name: &'a str,
    /// `Some` while the agent is in the prohibited category.
    pub prohibited: Option<Option<ProhibitedKind>>,
    pub call_ms: Option<i64>,
    pub first_chat_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Armed {
    prohibited: bool,
    call: bool,
    chat: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertOutcome {
    /// Conditions currently true for the agent.
    pub active: u32,
    /// Alerts delivered this cycle.
    pub fired: u32,
}

impl AlertOutcome {
    pub fn is_alerting(&self) -> bool {
        self.active > 0
    }
}

#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    armed: HashMap<String, Armed>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            armed: HashMap::new(),
        }
    }

    fn call_threshold_ms(&self) -> i64 {
        i64::try_from(self.config.call_alert_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    fn chat_threshold_ms(&self) -> i64 {
        i64::try_from(self.config.chat_alert_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub fn call_exceeds_threshold(&self, call_ms: i64) -> bool {
        call_ms >= self.call_threshold_ms()
    }

    /// Evaluates one agent's conditions, delivering anything that crossed
    /// from false to true unless suppressed.
    pub fn evaluate(
        &mut self,
        input: AlertInput<'_>,
        prefs: &AlertPrefs,
        now: DateTime<Utc>,
        sink: &mut dyn NotificationSink,
    ) -> AlertOutcome {
        let deliver = self.config.enabled && !prefs.muted && !prefs.is_snoozed(now);
        let call_threshold = self.call_threshold_ms();
        let chat_threshold = self.chat_threshold_ms();
        let armed = self.armed.entry(input.name.to_string()).or_default();
        let mut outcome = AlertOutcome::default();
        let mut pending: Vec<(AlertKind, Notification)> = Vec::new();

        match input.prohibited {
            Some(sub) => {
                outcome.active += 1;
                if !armed.prohibited {
                    armed.prohibited = true;
                    let sub = sub.map_or("prohibé", ProhibitedKind::as_str);
                    pending.push((
                        AlertKind::Prohibited,
                        Notification {
                            title: "Statut prohibé".to_string(),
                            body: format!("{} en {}", input.name, sub),
                        },
                    ));
                }
            }
            None => armed.prohibited = false,
        }

        match input.call_ms.filter(|ms| *ms >= call_threshold) {
            Some(ms) => {
                outcome.active += 1;
                if !armed.call {
                    armed.call = true;
                    pending.push((
                        AlertKind::LongCall,
                        Notification {
                            title: "Appel long".to_string(),
                            body: format!("{} 📞 {}", input.name, format_hms(ms)),
                        },
                    ));
                }
            }
            None => armed.call = false,
        }

        match input.first_chat_ms.filter(|ms| *ms >= chat_threshold) {
            Some(ms) => {
                outcome.active += 1;
                if !armed.chat {
                    armed.chat = true;
                    pending.push((
                        AlertKind::LongChat,
                        Notification {
                            title: "Chat long".to_string(),
                            body: format!("{} 💬 {}", input.name, format_hms(ms)),
                        },
                    ));
                }
            }
            None => armed.chat = false,
        }

        if deliver {
            for (kind, notification) in pending {
                sink.cue(kind.cue());
                if self.config.notifications_enabled {
                    sink.notify(&notification);
                }
                tracing::info!(agent = %input.name, alert = ?kind, "Alert fired");
                outcome.fired += 1;
            }
        } else if !pending.is_empty() {
            tracing::debug!(agent = %input.name, count = pending.len(), "Alert suppressed");
        }

        outcome
    }

    /// Forgets every armed flag.
    pub fn reset(&mut self) {
        self.armed.clear();
    }

    /// Drops armed flags for agents `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.armed.retain(|name, _| keep(name));
    }

    pub fn tracked(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn call(name: &str, ms: i64) -> AlertInput<'_> {
        AlertInput {
            name,
            call_ms: Some(ms),
            ..AlertInput::default()
        }
    }

    #[test]
    fn long_call_fires_once_per_episode() {
        let mut engine = AlertEngine::new(AlertConfig::default());
        let prefs = AlertPrefs::default();
        let mut sink = CollectingSink::default();

        for secs in [590, 600, 610, 700] {
            engine.evaluate(call("Martin", secs * 1000), &prefs, t0(), &mut sink);
        }
        assert_eq!(sink.notifications.len(), 1);
        assert_eq!(sink.notifications[0].title, "Appel long");
        assert_eq!(sink.notifications[0].body, "Martin 📞 00:10:00");
        assert_eq!(sink.cues, vec![AlertKind::LongCall.cue()]);

        // Call ends, a new one crosses again.
        engine.evaluate(AlertInput { name: "Martin", ..Default::default() }, &prefs, t0(), &mut sink);
        engine.evaluate(call("Martin", 601_000), &prefs, t0(), &mut sink);
        assert_eq!(sink.notifications.len(), 2);
    }

    #[test]
    fn retain_forgets_departed_agents() {
        let mut engine = AlertEngine::new(AlertConfig::default());
        let mut sink = CollectingSink::default();
        for name in ["A", "B"] {
            engine.evaluate(call(name, 700_000), &AlertPrefs::default(), t0(), &mut sink);
        }
        engine.retain(|name| name == "B");
        assert_eq!(engine.tracked(), 1);

        // B is still mid-episode; A starts over.
        engine.evaluate(call("B", 710_000), &AlertPrefs::default(), t0(), &mut sink);
        engine.evaluate(call("A", 710_000), &AlertPrefs::default(), t0(), &mut sink);
        assert_eq!(sink.notifications.len(), 3);
    }

    #[test]
    fn prohibited_body_names_sub_kind() {
        let mut engine = AlertEngine::new(AlertConfig::default());
        let mut sink = CollectingSink::default();
        let input = AlertInput {
            name: "Dupont",
            prohibited: Some(Some(ProhibitedKind::Rona)),
            ..AlertInput::default()
        };
        let outcome = engine.evaluate(input, &AlertPrefs::default(), t0(), &mut sink);
        assert_eq!(outcome, AlertOutcome { active: 1, fired: 1 });
        assert_eq!(sink.notifications[0].body, "Dupont en RONA");
        assert_eq!(sink.cues[0].frequency, 520);
    }

    #[test]
    fn muted_crossing_arms_without_delivery() {
        let mut engine = AlertEngine::new(AlertConfig::default());
        let mut sink = CollectingSink::default();
        let muted = AlertPrefs {
            muted: true,
            snooze_until: None,
        };

        let outcome = engine.evaluate(call("A", 700_000), &muted, t0(), &mut sink);
        assert_eq!(outcome.active, 1);
        assert_eq!(outcome.fired, 0);

        // Unmuting mid-episode does not replay the crossing.
        engine.evaluate(call("A", 710_000), &AlertPrefs::default(), t0(), &mut sink);
        assert!(sink.notifications.is_empty());
        assert!(sink.cues.is_empty());
    }

    #[test]
    fn snooze_suppresses_until_deadline() {
        let mut engine = AlertEngine::new(AlertConfig::default());
        let mut sink = CollectingSink::default();
        let prefs = AlertPrefs {
            muted: false,
            snooze_until: Some(t0() + Duration::minutes(5)),
        };

        engine.evaluate(call("A", 700_000), &prefs, t0(), &mut sink);
        assert!(sink.notifications.is_empty());

        engine.evaluate(call("B", 700_000), &prefs, t0() + Duration::minutes(6), &mut sink);
        assert_eq!(sink.notifications.len(), 1);
    }

    #[test]
    fn notifications_toggle_keeps_cues() {
        let config = AlertConfig {
            notifications_enabled: false,
            ..AlertConfig::default()
        };
        let mut engine = AlertEngine::new(config);
        let mut sink = CollectingSink::default();
        let input = AlertInput {
            name: "A",
            first_chat_ms: Some(600_000),
            ..AlertInput::default()
        };
        engine.evaluate(input, &AlertPrefs::default(), t0(), &mut sink);
        assert!(sink.notifications.is_empty());
        assert_eq!(sink.cues, vec![AlertKind::LongChat.cue()]);
    }
}
