//! Snapshot wire types and validation for the queue monitor.
//!
//! This crate is shared by the scraper that reads the host roster widget and by
//! the engine that consumes it, so both sides agree on one schema. The engine
//! remains the authority on validation; producers can reuse the same types to
//! emit valid batches.
//!
//! A batch is one poll of the host roster:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "capturedAt": "2026-03-02T09:15:00Z",
//!   "hostVisible": true,
//!   "agents": [
//!     { "name": "Dupont", "rawLabel": "En file d'attente", "onQueueFlag": true }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const SCHEMA_VERSION: u32 = 1;
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024; // 4MB
pub const MAX_AGENTS_PER_BATCH: usize = 5_000;
pub const MAX_NAME_CHARS: usize = 256;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Elapsed time as reported by the host, either already in seconds or as the
/// raw text shown next to the agent (`"04:12"`, `"1h 02m"`, ...).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ReportedDuration {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub name: String,
    #[serde(default)]
    pub raw_label: String,
    #[serde(default)]
    pub raw_class_hints: BTreeSet<String>,
    #[serde(default)]
    pub on_queue_flag: bool,
    #[serde(default)]
    pub interaction_count: u32,
    #[serde(default)]
    pub is_associated_task: bool,
    #[serde(default)]
    pub is_busy_flag: bool,
    #[serde(default)]
    pub is_offline_flag: bool,
    /// Voice channel icon present on the row.
    #[serde(default)]
    pub is_voice_flag: bool,
    /// Number of concurrent chat interactions shown on the row.
    #[serde(default)]
    pub chat_count: u8,
    /// Time in the current status as shown by the host.
    #[serde(default)]
    pub reported_duration_sec: Option<ReportedDuration>,
    /// Elapsed time of the ongoing voice interaction, read separately from
    /// the status duration.
    #[serde(default)]
    pub call_duration_sec: Option<ReportedDuration>,
    /// Per-chat elapsed durations, index aligned with chat slots.
    #[serde(default)]
    pub chat_durations_sec: Vec<ReportedDuration>,
}

impl AgentSnapshot {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.name, "name")?;
        if self.name.chars().count() > MAX_NAME_CHARS {
            return Err(ErrorInfo::new(
                "invalid_name",
                format!("name must be {} characters or fewer", MAX_NAME_CHARS),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBatch {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub captured_at: Option<String>,
    /// Whether the host surface is in the foreground. `None` means unknown.
    #[serde(default)]
    pub host_visible: Option<bool>,
    /// The host UI is mid-interaction (menu open, dropdown expanded).
    #[serde(default)]
    pub host_busy: bool,
    #[serde(default)]
    pub agents: Vec<AgentSnapshot>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for SnapshotBatch {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            captured_at: None,
            host_visible: None,
            host_busy: false,
            agents: Vec::new(),
        }
    }
}

impl SnapshotBatch {
    pub fn new(agents: Vec<AgentSnapshot>) -> Self {
        Self {
            agents,
            ..Self::default()
        }
    }

    /// Batch-level validation. Individual agents are validated separately so a
    /// single bad row never rejects the whole roster.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ErrorInfo::new(
                "schema_mismatch",
                format!(
                    "unsupported schema version {} (expected {})",
                    self.schema_version, SCHEMA_VERSION
                ),
            ));
        }

        if let Some(captured_at) = &self.captured_at {
            if DateTime::parse_from_rfc3339(captured_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "capturedAt must be RFC3339",
                ));
            }
        }

        if self.agents.len() > MAX_AGENTS_PER_BATCH {
            return Err(ErrorInfo::new(
                "batch_too_large",
                format!("batch exceeds {} agents", MAX_AGENTS_PER_BATCH),
            ));
        }

        Ok(())
    }

    pub fn captured_at_utc(&self) -> Option<DateTime<Utc>> {
        self.captured_at
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

pub fn parse_batch(bytes: &[u8]) -> Result<SnapshotBatch, ErrorInfo> {
    if bytes.len() > MAX_BATCH_BYTES {
        return Err(ErrorInfo::new(
            "batch_too_large",
            "batch exceeded maximum size",
        ));
    }
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_batch", "batch body was empty"));
    }

    let batch: SnapshotBatch = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("batch was not valid JSON: {}", err),
        )
    })?;
    batch.validate()?;
    Ok(batch)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}
