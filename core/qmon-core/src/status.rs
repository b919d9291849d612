//! Status classification.
//!
//! Maps one roster row to exactly one [`StatusKey`]. The raw signal is not
//! mutually exclusive (a row can say "Occupé" and carry an interaction icon),
//! so the order of the checks in [`classify`] decides the outcome: first match
//! wins.

use qmon_protocol::AgentSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::normalize::{contains_any, fold};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKey {
    Occupied,
    AssociatedTask,
    Prohibited,
    NonTelecontact,
    Break,
    Meal,
    Meeting,
    Training,
    PaidWork,
    Chat,
    Call,
    QueuedIdle,
    InteractionOffQueue,
    Available,
    Other,
}

impl StatusKey {
    pub const ALL: [StatusKey; 15] = [
        StatusKey::Occupied,
        StatusKey::AssociatedTask,
        StatusKey::Prohibited,
        StatusKey::NonTelecontact,
        StatusKey::Break,
        StatusKey::Meal,
        StatusKey::Meeting,
        StatusKey::Training,
        StatusKey::PaidWork,
        StatusKey::Chat,
        StatusKey::Call,
        StatusKey::QueuedIdle,
        StatusKey::InteractionOffQueue,
        StatusKey::Available,
        StatusKey::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKey::Occupied => "occupied",
            StatusKey::AssociatedTask => "associated_task",
            StatusKey::Prohibited => "prohibited",
            StatusKey::NonTelecontact => "non_telecontact",
            StatusKey::Break => "break",
            StatusKey::Meal => "meal",
            StatusKey::Meeting => "meeting",
            StatusKey::Training => "training",
            StatusKey::PaidWork => "paid_work",
            StatusKey::Chat => "chat",
            StatusKey::Call => "call",
            StatusKey::QueuedIdle => "queued_idle",
            StatusKey::InteractionOffQueue => "interaction_off_queue",
            StatusKey::Available => "available",
            StatusKey::Other => "other",
        }
    }

    /// Section heading shown by the panel.
    pub fn label(self) -> &'static str {
        match self {
            StatusKey::Occupied => "Occupé",
            StatusKey::AssociatedTask => "Tâche associée",
            StatusKey::Prohibited => "Statut prohibé",
            StatusKey::NonTelecontact => "Non télécontact",
            StatusKey::Break => "Pause",
            StatusKey::Meal => "Repas",
            StatusKey::Meeting => "Réunion",
            StatusKey::Training => "Formation",
            StatusKey::PaidWork => "Travaux payants",
            StatusKey::Chat => "En chat",
            StatusKey::Call => "En call",
            StatusKey::QueuedIdle => "En file d'attente (sans call)",
            StatusKey::InteractionOffQueue => "En interaction (hors file)",
            StatusKey::Available => "Disponible",
            StatusKey::Other => "Autre",
        }
    }

    /// Categories that cannot coexist with an active call.
    pub fn excludes_call(self) -> bool {
        matches!(self, StatusKey::AssociatedTask | StatusKey::Occupied)
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        StatusKey::ALL
            .into_iter()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| format!("unknown status key: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProhibitedKind {
    Rona,
    Postcall,
}

impl ProhibitedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProhibitedKind::Rona => "RONA",
            ProhibitedKind::Postcall => "Postcall",
        }
    }
}

impl fmt::Display for ProhibitedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexicons (folded: lowercase, no accents)
// ─────────────────────────────────────────────────────────────────────────────

const RONA_TERMS: &[&str] = &[
    "sans reponse",
    "rona",
    "no answer",
    "ring no answer",
    "not answered",
];
const POSTCALL_TERMS: &[&str] = &[
    "travail apres appel",
    "postcall",
    "after call work",
    "acw",
    "wrap",
];
const TASK_TERMS: &[&str] = &["tache", "work item", "workitem", "associated task"];
const OCCUPIED_TERMS: &[&str] = &["occupe", "busy"];
const NON_TELECONTACT_TERMS: &[&str] = &[
    "non tele",
    "non-tele",
    "non telecontact",
    "non-telecontact",
    "non tele contact",
    "non telec",
];
const BREAK_TERMS: &[&str] = &["pause", "break"];
const MEAL_TERMS: &[&str] = &["repas", "meal"];
const MEETING_TERMS: &[&str] = &["reunion", "meeting"];
const TRAINING_TERMS: &[&str] = &["formation", "training"];
const PAID_WORK_TERMS: &[&str] = &["travaux pay"];
const VOICE_TERMS: &[&str] = &["interaction", "en cours de communication", "on call"];
const AVAILABLE_TERMS: &[&str] = &["available", "disponible"];
const IDLE_TERMS: &[&str] = &["non occupe", "inactif", "idle"];

// Presence-dot class tokens.
const BUSY_HINTS: &[&str] = &["busy"];
const VOICE_HINTS: &[&str] = &["interacting", "on_call"];
const QUEUE_HINTS: &[&str] = &["on_queue"];
const AVAILABLE_HINTS: &[&str] = &["available"];
const IDLE_HINTS: &[&str] = &["idle"];

/// Folded view of a snapshot's text signals, computed once per row.
struct Signals<'a> {
    snapshot: &'a AgentSnapshot,
    label: String,
    hints: Vec<String>,
}

impl<'a> Signals<'a> {
    fn new(snapshot: &'a AgentSnapshot) -> Self {
        Self {
            snapshot,
            label: fold(&snapshot.raw_label),
            hints: snapshot.raw_class_hints.iter().map(|h| fold(h)).collect(),
        }
    }

    fn label_has(&self, terms: &[&str]) -> bool {
        contains_any(&self.label, terms)
    }

    fn hint_has(&self, terms: &[&str]) -> bool {
        self.hints.iter().any(|hint| contains_any(hint, terms))
    }

    fn busy(&self) -> bool {
        self.snapshot.is_busy_flag || self.hint_has(BUSY_HINTS)
    }

    fn on_queue(&self) -> bool {
        self.snapshot.on_queue_flag || self.hint_has(QUEUE_HINTS)
    }

    /// "Non occupé" is an idle label and must not read as occupied.
    fn occupied_label(&self) -> bool {
        self.label_has(OCCUPIED_TERMS) && !self.label.contains("non occupe")
    }

    fn voice(&self) -> bool {
        self.snapshot.is_voice_flag || self.hint_has(VOICE_HINTS) || self.label_has(VOICE_TERMS)
    }
}

/// Sub-kind of a prohibited label, RONA checked first.
pub fn prohibited_kind(raw_label: &str) -> Option<ProhibitedKind> {
    let label = fold(raw_label);
    if contains_any(&label, RONA_TERMS) {
        Some(ProhibitedKind::Rona)
    } else if contains_any(&label, POSTCALL_TERMS) {
        Some(ProhibitedKind::Postcall)
    } else {
        None
    }
}

/// Assigns the canonical category for one roster row. Pure and total.
pub fn classify(snapshot: &AgentSnapshot) -> StatusKey {
    let signals = Signals::new(snapshot);

    if signals.busy() {
        return StatusKey::Occupied;
    }
    if snapshot.is_associated_task {
        return StatusKey::AssociatedTask;
    }
    if signals.label_has(RONA_TERMS) || signals.label_has(POSTCALL_TERMS) {
        return StatusKey::Prohibited;
    }
    if signals.label_has(TASK_TERMS) {
        return StatusKey::AssociatedTask;
    }
    if signals.occupied_label() {
        return StatusKey::Occupied;
    }

    let keyword_categories: [(&[&str], StatusKey); 6] = [
        (NON_TELECONTACT_TERMS, StatusKey::NonTelecontact),
        (BREAK_TERMS, StatusKey::Break),
        (MEAL_TERMS, StatusKey::Meal),
        (MEETING_TERMS, StatusKey::Meeting),
        (TRAINING_TERMS, StatusKey::Training),
        (PAID_WORK_TERMS, StatusKey::PaidWork),
    ];
    if let Some((_, key)) = keyword_categories
        .iter()
        .find(|(terms, _)| signals.label_has(terms))
    {
        return *key;
    }

    if snapshot.chat_count > 0 {
        return StatusKey::Chat;
    }
    if signals.voice() {
        return StatusKey::Call;
    }

    let on_queue = signals.on_queue();
    if on_queue && snapshot.interaction_count == 0 {
        return StatusKey::QueuedIdle;
    }
    if !on_queue && snapshot.interaction_count > 0 {
        return StatusKey::InteractionOffQueue;
    }
    if !on_queue && (signals.label_has(AVAILABLE_TERMS) || signals.hint_has(AVAILABLE_HINTS)) {
        return StatusKey::Available;
    }
    if signals.label_has(IDLE_TERMS) || signals.hint_has(IDLE_HINTS) {
        return StatusKey::Available;
    }

    StatusKey::Other
}

/// Everything the timer engine needs from one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub key: StatusKey,
    pub prohibited: Option<ProhibitedKind>,
    /// Queue membership by flag or presence hint, as `classify` reads it.
    pub on_queue: bool,
    pub in_call: bool,
    pub chat_count: usize,
}

/// Classifies a row and derives the call/chat signals that follow from the
/// category. A call is only tracked when the category allows one.
pub fn observe(snapshot: &AgentSnapshot, max_chats: usize) -> Observation {
    let key = classify(snapshot);
    let signals = Signals::new(snapshot);
    let prohibited = match key {
        StatusKey::Prohibited => prohibited_kind(&snapshot.raw_label),
        _ => None,
    };
    let in_call = !key.excludes_call() && key != StatusKey::Prohibited && signals.voice();
    let chat_count = if key == StatusKey::Chat {
        usize::from(snapshot.chat_count)
            .max(snapshot.chat_durations_sec.len())
            .max(1)
            .min(max_chats)
    } else {
        0
    };

    Observation {
        key,
        prohibited,
        on_queue: signals.on_queue(),
        in_call,
        chat_count,
    }
}
