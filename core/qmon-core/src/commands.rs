//! Operator control commands.
//!
//! Parsed from single console lines such as `snooze 15` or
//! `section break off`.

use std::str::FromStr;

use crate::error::MonitorError;
use crate::view::{SectionKey, SortOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Mute,
    Unmute,
    ToggleMute,
    /// Minutes to snooze alerts for. Zero clears the snooze.
    Snooze(u32),
    /// Case- and accent-insensitive name filter. Empty clears it.
    Filter(String),
    /// Toggles favorite status for an agent.
    Favorite(String),
    SortCalls(Option<SortOrder>),
    SortStatus(Option<SortOrder>),
    Section(SectionKey, bool),
    Presence(Vec<String>),
    Refresh,
    Reset,
}

impl ControlCommand {
    /// Commands that only read state.
    pub fn is_read_only(&self) -> bool {
        matches!(self, ControlCommand::Presence(_) | ControlCommand::Refresh)
    }
}

fn invalid(message: impl Into<String>) -> MonitorError {
    MonitorError::InvalidCommand(message.into())
}

fn parse_switch(value: &str) -> Result<bool, MonitorError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "show" | "true" | "1" => Ok(true),
        "off" | "hide" | "false" | "0" => Ok(false),
        other => Err(invalid(format!("expected on or off, got {}", other))),
    }
}

/// Splits a presence list on commas and newlines.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split([',', '\n', ';'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl FromStr for ControlCommand {
    type Err = MonitorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "mute" => ControlCommand::Mute,
            "unmute" => ControlCommand::Unmute,
            "toggle-mute" | "toggle_mute" => ControlCommand::ToggleMute,
            "snooze" => {
                let minutes = rest
                    .parse::<u32>()
                    .map_err(|_| invalid(format!("snooze expects minutes, got '{}'", rest)))?;
                ControlCommand::Snooze(minutes)
            }
            "filter" => ControlCommand::Filter(rest.to_string()),
            "favorite" | "fav" => {
                if rest.is_empty() {
                    return Err(invalid("favorite expects an agent name"));
                }
                ControlCommand::Favorite(rest.to_string())
            }
            "sort-calls" | "sort_calls" => {
                ControlCommand::SortCalls(SortOrder::parse_setting(rest).map_err(invalid)?)
            }
            "sort-status" | "sort_status" => {
                ControlCommand::SortStatus(SortOrder::parse_setting(rest).map_err(invalid)?)
            }
            "section" => {
                let (key, switch) = rest
                    .rsplit_once(char::is_whitespace)
                    .ok_or_else(|| invalid("section expects <key> <on|off>"))?;
                let key = key.parse::<SectionKey>().map_err(invalid)?;
                ControlCommand::Section(key, parse_switch(switch)?)
            }
            "presence" => {
                let names = split_names(rest);
                if names.is_empty() {
                    return Err(invalid("presence expects at least one name"));
                }
                ControlCommand::Presence(names)
            }
            "refresh" => ControlCommand::Refresh,
            "reset" => ControlCommand::Reset,
            "" => return Err(invalid("empty command")),
            other => return Err(invalid(format!("unknown command: {}", other))),
        };

        Ok(command)
    }
}
