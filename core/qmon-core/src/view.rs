//! Presentation view: grouped, sorted agent cards plus KPIs.
//!
//! Everything here is a pure read of the application state. The renderer
//! receives a [`MonitorView`] per cycle and a list of [`TimerReadout`]s per
//! display tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::MAX_CHAT_SLOTS;
use crate::normalize::fold;
use crate::slots::UNASSIGNED_SLOT;
use crate::state::AppState;
use crate::status::{ProhibitedKind, StatusKey};
use crate::timers::TimerBook;

// ─────────────────────────────────────────────────────────────────────────────
// Sections and preferences
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    Favorites,
    Prohibited,
    Available,
    QueuedIdle,
    Call,
    Chat,
    AssociatedTask,
    Occupied,
    NonTelecontact,
    PaidWork,
    Break,
    Meal,
    Meeting,
    Training,
    InteractionOffQueue,
    Other,
}

impl SectionKey {
    /// Panel order, top to bottom.
    pub const DISPLAY_ORDER: [SectionKey; 16] = [
        SectionKey::Favorites,
        SectionKey::Prohibited,
        SectionKey::Available,
        SectionKey::QueuedIdle,
        SectionKey::Call,
        SectionKey::Chat,
        SectionKey::AssociatedTask,
        SectionKey::Occupied,
        SectionKey::NonTelecontact,
        SectionKey::PaidWork,
        SectionKey::Break,
        SectionKey::Meal,
        SectionKey::Meeting,
        SectionKey::Training,
        SectionKey::InteractionOffQueue,
        SectionKey::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self.status() {
            Some(key) => key.as_str(),
            None => "favorites",
        }
    }

    pub fn label(self) -> &'static str {
        match self.status() {
            Some(key) => key.label(),
            None => "Favoris",
        }
    }

    /// The status category this section lists, `None` for favorites.
    pub fn status(self) -> Option<StatusKey> {
        let key = match self {
            SectionKey::Favorites => return None,
            SectionKey::Prohibited => StatusKey::Prohibited,
            SectionKey::Available => StatusKey::Available,
            SectionKey::QueuedIdle => StatusKey::QueuedIdle,
            SectionKey::Call => StatusKey::Call,
            SectionKey::Chat => StatusKey::Chat,
            SectionKey::AssociatedTask => StatusKey::AssociatedTask,
            SectionKey::Occupied => StatusKey::Occupied,
            SectionKey::NonTelecontact => StatusKey::NonTelecontact,
            SectionKey::PaidWork => StatusKey::PaidWork,
            SectionKey::Break => StatusKey::Break,
            SectionKey::Meal => StatusKey::Meal,
            SectionKey::Meeting => StatusKey::Meeting,
            SectionKey::Training => StatusKey::Training,
            SectionKey::InteractionOffQueue => StatusKey::InteractionOffQueue,
            SectionKey::Other => StatusKey::Other,
        };
        Some(key)
    }
}

impl From<StatusKey> for SectionKey {
    fn from(key: StatusKey) -> Self {
        match key {
            StatusKey::Occupied => SectionKey::Occupied,
            StatusKey::AssociatedTask => SectionKey::AssociatedTask,
            StatusKey::Prohibited => SectionKey::Prohibited,
            StatusKey::NonTelecontact => SectionKey::NonTelecontact,
            StatusKey::Break => SectionKey::Break,
            StatusKey::Meal => SectionKey::Meal,
            StatusKey::Meeting => SectionKey::Meeting,
            StatusKey::Training => SectionKey::Training,
            StatusKey::PaidWork => SectionKey::PaidWork,
            StatusKey::Chat => SectionKey::Chat,
            StatusKey::Call => SectionKey::Call,
            StatusKey::QueuedIdle => SectionKey::QueuedIdle,
            StatusKey::InteractionOffQueue => SectionKey::InteractionOffQueue,
            StatusKey::Available => SectionKey::Available,
            StatusKey::Other => SectionKey::Other,
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        SectionKey::DISPLAY_ORDER
            .into_iter()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| format!("unknown section: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Parses `asc`, `desc` or `off` (`None`).
    pub fn parse_setting(value: &str) -> Result<Option<SortOrder>, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Some(SortOrder::Asc)),
            "desc" => Ok(Some(SortOrder::Desc)),
            "off" | "none" | "" => Ok(None),
            other => Err(format!("expected asc, desc or off, got {}", other)),
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewPrefs {
    pub filter: String,
    pub sort_calls: Option<SortOrder>,
    pub sort_status: Option<SortOrder>,
    /// Sections explicitly hidden or shown. Missing entries are visible.
    pub sections: BTreeMap<SectionKey, bool>,
}

impl Default for ViewPrefs {
    fn default() -> Self {
        Self {
            filter: String::new(),
            sort_calls: Some(SortOrder::Desc),
            sort_status: None,
            sections: BTreeMap::new(),
        }
    }
}

impl ViewPrefs {
    pub fn is_visible(&self, section: SectionKey) -> bool {
        self.sections.get(&section).copied().unwrap_or(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// View types
// ─────────────────────────────────────────────────────────────────────────────

/// One processed agent from the latest cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRow {
    pub name: String,
    pub key: StatusKey,
    pub raw_label: String,
    pub on_queue: bool,
    pub prohibited: Option<ProhibitedKind>,
    pub alerting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub slot: Option<u32>,
    pub status: StatusKey,
    pub raw_label: String,
    pub prohibited: Option<ProhibitedKind>,
    pub status_ms: Option<i64>,
    pub call_ms: Option<i64>,
    pub chat_ms: Vec<Option<i64>>,
    pub favorite: bool,
    pub alerting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSection {
    pub key: SectionKey,
    pub label: String,
    pub visible: bool,
    pub count: usize,
    /// Empty when the section is hidden.
    pub agents: Vec<AgentCard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongestActive {
    pub name: String,
    pub ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub connected: usize,
    pub on_queue: usize,
    pub longest_call: Option<LongestActive>,
    pub longest_chat: Option<LongestActive>,
    pub prohibited: usize,
    pub occupied: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<ViewSection>,
    pub kpis: Kpis,
    pub active_alerts: u32,
    pub muted: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub filter: Option<String>,
    pub error: Option<String>,
}

impl MonitorView {
    /// A view that only reports a failed cycle.
    pub fn error_state(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            sections: Vec::new(),
            kpis: Kpis::default(),
            active_alerts: 0,
            muted: false,
            snoozed_until: None,
            filter: None,
            error: Some(message.into()),
        }
    }

    pub fn section(&self, key: SectionKey) -> Option<&ViewSection> {
        self.sections.iter().find(|section| section.key == key)
    }

    /// Names in a section, in display order.
    pub fn names_in(&self, key: SectionKey) -> Vec<&str> {
        self.section(key)
            .map(|section| section.agents.iter().map(|card| card.name.as_str()).collect())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Building
// ─────────────────────────────────────────────────────────────────────────────

fn card_for(row: &AgentRow, state: &AppState, now: DateTime<Utc>) -> AgentCard {
    let chats = state.timers.chat_elapsed_ms(&row.name, now);
    let chat_ms = if chats.iter().any(Option::is_some) {
        chats.to_vec()
    } else {
        Vec::new()
    };
    AgentCard {
        name: row.name.clone(),
        slot: state.slots.slot_of(&row.name),
        status: row.key,
        raw_label: row.raw_label.clone(),
        prohibited: row.prohibited,
        status_ms: state.timers.status_elapsed_ms(&row.name, now),
        call_ms: state.timers.call_elapsed_ms(&row.name, now),
        chat_ms,
        favorite: state.favorites.contains(&row.name),
        alerting: row.alerting,
    }
}

fn sort_cards(section: SectionKey, cards: &mut [AgentCard], prefs: &ViewPrefs) {
    let slot_of = |card: &AgentCard| card.slot.unwrap_or(UNASSIGNED_SLOT);
    let by_slot = |a: &AgentCard, b: &AgentCard| slot_of(a).cmp(&slot_of(b));

    if section == SectionKey::Call {
        if let Some(order) = prefs.sort_calls {
            cards.sort_by(|a, b| {
                order
                    .apply(a.call_ms.unwrap_or(0).cmp(&b.call_ms.unwrap_or(0)))
                    .then_with(|| by_slot(a, b))
            });
            return;
        }
    }

    if let Some(order) = prefs.sort_status {
        cards.sort_by(|a, b| {
            order
                .apply(a.status_ms.unwrap_or(0).cmp(&b.status_ms.unwrap_or(0)))
                .then_with(|| by_slot(a, b))
        });
        return;
    }

    cards.sort_by(by_slot);
}

fn longest(
    current: Option<LongestActive>,
    name: &str,
    ms: Option<i64>,
) -> Option<LongestActive> {
    match (current, ms) {
        (Some(best), Some(ms)) if ms > best.ms => Some(LongestActive {
            name: name.to_string(),
            ms,
        }),
        (None, Some(ms)) => Some(LongestActive {
            name: name.to_string(),
            ms,
        }),
        (current, _) => current,
    }
}

pub fn compute_kpis(rows: &[AgentRow], timers: &TimerBook, now: DateTime<Utc>) -> Kpis {
    let mut kpis = Kpis {
        connected: rows.len(),
        ..Kpis::default()
    };

    for row in rows {
        if row.on_queue {
            kpis.on_queue += 1;
        }
        match row.key {
            StatusKey::Prohibited => kpis.prohibited += 1,
            StatusKey::Occupied => kpis.occupied += 1,
            _ => {}
        }
        kpis.longest_call = longest(
            kpis.longest_call.take(),
            &row.name,
            timers.call_elapsed_ms(&row.name, now),
        );
        kpis.longest_chat = longest(
            kpis.longest_chat.take(),
            &row.name,
            timers.chat_elapsed_ms(&row.name, now)[0],
        );
    }

    kpis
}

/// Groups the latest rows into display sections.
pub fn build_view(
    rows: &[AgentRow],
    state: &AppState,
    active_alerts: u32,
    now: DateTime<Utc>,
) -> MonitorView {
    let prefs = &state.view_prefs;
    let mut grouped: BTreeMap<SectionKey, Vec<AgentCard>> = BTreeMap::new();

    for row in rows {
        let card = card_for(row, state, now);
        if card.favorite {
            grouped
                .entry(SectionKey::Favorites)
                .or_default()
                .push(card.clone());
        }
        grouped.entry(SectionKey::from(row.key)).or_default().push(card);
    }

    let sections = SectionKey::DISPLAY_ORDER
        .into_iter()
        .map(|key| {
            let mut agents = grouped.remove(&key).unwrap_or_default();
            let visible = prefs.is_visible(key);
            let count = agents.len();
            if visible {
                sort_cards(key, &mut agents, prefs);
            } else {
                agents.clear();
            }
            ViewSection {
                key,
                label: key.label().to_string(),
                visible,
                count,
                agents,
            }
        })
        .collect();

    let filter = (!prefs.filter.trim().is_empty()).then(|| prefs.filter.clone());

    MonitorView {
        generated_at: now,
        sections,
        kpis: compute_kpis(rows, &state.timers, now),
        active_alerts,
        muted: state.alert_prefs.muted,
        snoozed_until: state.alert_prefs.snooze_until.filter(|until| now < *until),
        filter,
        error: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Display tick
// ─────────────────────────────────────────────────────────────────────────────

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_hms(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerReadout {
    pub name: String,
    pub status: Option<String>,
    pub call: Option<String>,
    pub chats: [Option<String>; MAX_CHAT_SLOTS],
    /// Call past the alert threshold; the renderer pulses the card.
    pub pulse: bool,
}

/// Elapsed-time text for each displayed agent. Reads timers only.
pub fn timer_readouts(
    rows: &[AgentRow],
    timers: &TimerBook,
    call_alert_ms: i64,
    now: DateTime<Utc>,
) -> Vec<TimerReadout> {
    rows.iter()
        .map(|row| {
            let call_ms = timers.call_elapsed_ms(&row.name, now);
            let chats = timers
                .chat_elapsed_ms(&row.name, now)
                .map(|ms| ms.map(format_hms));
            TimerReadout {
                name: row.name.clone(),
                status: timers.status_elapsed_ms(&row.name, now).map(format_hms),
                call: call_ms.map(format_hms),
                chats,
                pulse: call_ms.is_some_and(|ms| ms >= call_alert_ms),
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Presence check
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceResult {
    pub query: String,
    pub present: bool,
}

/// For each requested name, whether any connected agent's folded name
/// contains it.
pub fn presence_check<S: AsRef<str>>(connected: &[String], requested: &[S]) -> Vec<PresenceResult> {
    let folded: Vec<String> = connected.iter().map(|name| fold(name)).collect();
    requested
        .iter()
        .map(|query| query.as_ref().trim())
        .filter(|query| !query.is_empty())
        .map(|query| {
            let needle = fold(query);
            PresenceResult {
                query: query.to_string(),
                present: folded.iter().any(|name| name.contains(&needle)),
            }
        })
        .collect()
}
