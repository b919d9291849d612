//! Compiled regex patterns for reading host-reported elapsed times.
//!
//! These patterns are compiled once on first use. Input is lowercased and
//! has its non-breaking spaces replaced before any of them run.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Duration Parsing Regexes
// ═══════════════════════════════════════════════════════════════════════════════

/// `3 jours`, `1 jour`
pub static RE_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*jour").unwrap());

/// `hh:mm:ss` or `mm:ss`, whole numbers only (`123:45:00` is 123 hours).
pub static RE_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+):([0-5]\d)(?::([0-5]\d))?\b").unwrap());

/// `1h2m3s`, `12min`, `45sec`, the whole string with no separators.
pub static RE_COMPACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)h)?\s*(?:(\d+)(?:min|mn|m))?\s*(?:(\d+)(?:sec|s))?$").unwrap()
});

/// `1h 02m 03s`, `4 min 46 s`, `2 heures`, one match per number/unit pair.
pub static RE_VERBAL_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+)\s*(hours|hour|hrs|hr|heures|heure|h|minutes|minute|min|mn|m|seconds|second|secondes|seconde|secs|sec|s)\b",
    )
    .unwrap()
});
