//! # qmon-core
//!
//! Core library for the queue monitor: turns periodic roster snapshots into
//! per-agent timers, slot order, daily aggregates, history and alerts.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The daemon drives cycles from its own thread.
//! - **Single writer**: One engine owns the state; callers serialize access.
//! - **Graceful degradation**: Missing or malformed persisted values load as defaults, not errors.
//! - **Injected time**: Every operation that reads the clock takes `now` as an argument.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qmon_core::{MemoryStore, MonitorConfig, MonitorEngine, CollectingSink};
//!
//! let mut engine = MonitorEngine::new(MonitorConfig::default(), MemoryStore::new(), now);
//! let report = engine.run_cycle(&batch, now, &mut CollectingSink::default())?;
//! let view = engine.view();
//! ```

pub mod alerts;
pub mod commands;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod normalize;
pub mod patterns;
pub mod slots;
pub mod state;
pub mod status;
pub mod storage;
pub mod store;
pub mod timers;
pub mod view;

// Re-export commonly used items at crate root
pub use alerts::{
    AlertEngine, AlertPrefs, AudibleCue, CollectingSink, Notification, NotificationSink,
};
pub use commands::ControlCommand;
pub use config::*;
pub use duration::parse_duration_secs;
pub use engine::{intake, AgentFailure, CommandOutcome, CycleReport, MonitorEngine};
pub use error::{MonitorError, Result};
pub use ledger::{day_key, DailyAggregate, HistoryEntry, HistoryEvent, Ledger};
pub use normalize::fold;
pub use slots::{SlotEntry, SlotRoster, UNASSIGNED_SLOT};
pub use state::AppState;
pub use status::{classify, observe, Observation, ProhibitedKind, StatusKey};
pub use storage::StoragePaths;
pub use store::{keys, KvStore, LoadReport, MemoryStore};
pub use timers::{TimerBook, TimerEvent, TimerPolicy};
pub use view::{
    MonitorView, PresenceResult, SectionKey, SortOrder, TimerReadout, ViewPrefs,
};
