//! Host-reported elapsed time reconciliation.
//!
//! The host shows elapsed times in several shapes depending on widget and
//! locale. Anything we cannot read is `None`, which callers treat as "no drift
//! correction this cycle" rather than an error.

use qmon_protocol::ReportedDuration;

use crate::patterns::{RE_CLOCK, RE_COMPACT, RE_DAYS, RE_VERBAL_UNIT};

const SECS_PER_DAY: u64 = 24 * 3600;

/// Resolves a snapshot duration field to whole seconds.
pub fn resolve(reported: &ReportedDuration) -> Option<u64> {
    match reported {
        ReportedDuration::Seconds(secs) => Some(*secs),
        ReportedDuration::Text(text) => parse_duration_secs(text),
    }
}

pub fn resolve_opt(reported: Option<&ReportedDuration>) -> Option<u64> {
    reported.and_then(resolve)
}

/// Parses a displayed elapsed time into seconds.
///
/// Tried in order: day counts, clock notation, compact unit notation covering
/// the whole string, then any number/unit pairs found in the text.
pub fn parse_duration_secs(text: &str) -> Option<u64> {
    let cleaned = text
        .replace(['\u{202F}', '\u{00A0}'], " ")
        .trim()
        .to_lowercase();
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = RE_DAYS.captures(&cleaned) {
        let days: u64 = caps[1].parse().ok()?;
        return Some(days.saturating_mul(SECS_PER_DAY));
    }

    if let Some(caps) = RE_CLOCK.captures(&cleaned) {
        let first: u64 = caps[1].parse().ok()?;
        let second: u64 = caps[2].parse().ok()?;
        return match caps.get(3) {
            Some(third) => {
                let secs: u64 = third.as_str().parse().ok()?;
                hms_secs(first, second, secs)
            }
            None => hms_secs(0, first, second),
        };
    }

    if let Some(caps) = RE_COMPACT.captures(&cleaned) {
        let part = |idx: usize| -> Option<u64> {
            caps.get(idx).and_then(|m| m.as_str().parse::<u64>().ok())
        };
        let (hours, minutes, secs) = (part(1), part(2), part(3));
        if hours.is_some() || minutes.is_some() || secs.is_some() {
            return hms_secs(hours.unwrap_or(0), minutes.unwrap_or(0), secs.unwrap_or(0));
        }
    }

    let mut total = 0u64;
    let mut found = false;
    for caps in RE_VERBAL_UNIT.captures_iter(&cleaned) {
        let Ok(n) = caps[1].parse::<u64>() else {
            continue;
        };
        let multiplier = match &caps[2] {
            "h" | "hr" | "hrs" | "hour" | "hours" | "heure" | "heures" => 3600,
            "m" | "min" | "mn" | "minute" | "minutes" => 60,
            _ => 1,
        };
        total = total.saturating_add(n.saturating_mul(multiplier));
        found = true;
    }

    found.then_some(total)
}

/// `None` when the total does not fit, so absurd readings skip correction.
fn hms_secs(hours: u64, minutes: u64, secs: u64) -> Option<u64> {
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(secs)
}
