//! MonitorEngine - the per-cycle orchestrator.
//!
//! One call to [`MonitorEngine::run_cycle`] takes a roster batch through
//! intake, classification, timers, slots, the ledger and alerts, then rebuilds
//! the view and persists. The engine is single-writer: callers must not run
//! cycles concurrently. `now` is always injected so tests can drive time.

use chrono::{DateTime, Duration, Utc};
use qmon_protocol::{AgentSnapshot, SnapshotBatch};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use crate::alerts::{AlertEngine, AlertInput, AlertOutcome, NotificationSink};
use crate::commands::ControlCommand;
use crate::config::MonitorConfig;
use crate::duration::{resolve, resolve_opt};
use crate::error::{MonitorError, Result};
use crate::ledger::{HistoryEvent, IntervalKind};
use crate::normalize::matches_filter;
use crate::state::{AppState, Persister};
use crate::status::{observe, StatusKey};
use crate::store::{KvStore, LoadReport};
use crate::timers::{TimerEvent, TimerPolicy};
use crate::view::{build_view, presence_check, timer_readouts, AgentRow, MonitorView, PresenceResult, TimerReadout};

const SLOT_CLEANUP_EVERY_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub name: String,
    pub error: String,
}

/// Agents accepted for processing this cycle, plus what was dropped.
#[derive(Debug, Default)]
pub struct Intake<'a> {
    pub agents: Vec<&'a AgentSnapshot>,
    pub rejected: Vec<AgentFailure>,
    pub offline: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
}

/// Drops offline rows, collapses duplicate names (first wins), rejects rows
/// with invalid names, then applies the name filter.
pub fn intake<'a>(batch: &'a SnapshotBatch, filter: &str) -> Intake<'a> {
    let mut out = Intake::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for agent in &batch.agents {
        if agent.is_offline_flag {
            out.offline += 1;
            continue;
        }
        if let Err(err) = agent.validate() {
            out.rejected.push(AgentFailure {
                name: agent.name.clone(),
                error: err.to_string(),
            });
            continue;
        }
        let name = agent.name.trim();
        if !seen.insert(name) {
            out.duplicates += 1;
            continue;
        }
        if !matches_filter(name, filter) {
            out.filtered_out += 1;
            continue;
        }
        out.agents.push(agent);
    }

    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub failures: Vec<AgentFailure>,
    pub offline: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub closed_intervals: usize,
    pub alerts_active: u32,
    pub alerts_fired: u32,
    pub evicted_slots: usize,
    pub persist_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Updated,
    Presence(Vec<PresenceResult>),
    RefreshRequested,
    Reset,
}

pub struct MonitorEngine<S: KvStore> {
    config: MonitorConfig,
    policy: TimerPolicy,
    store: S,
    state: AppState,
    alerts: AlertEngine,
    persister: Persister,
    rows: Vec<AgentRow>,
    view: MonitorView,
    last_cleanup: Option<DateTime<Utc>>,
    load_report: LoadReport,
}

impl<S: KvStore> MonitorEngine<S> {
    /// Loads persisted state from `store`. Malformed keys fall back to their
    /// defaults and are listed in [`MonitorEngine::load_report`].
    pub fn new(config: MonitorConfig, store: S, now: DateTime<Utc>) -> Self {
        let (state, load_report) = AppState::load(&store, &config);
        if !load_report.is_clean() {
            tracing::warn!(
                malformed = ?load_report.malformed,
                unavailable = ?load_report.unavailable,
                "Loaded state with defaults for some keys"
            );
        }

        let mut engine = Self {
            policy: TimerPolicy::from_config(&config),
            alerts: AlertEngine::new(config.alerts.clone()),
            config,
            store,
            state,
            persister: Persister::new(),
            rows: Vec::new(),
            view: MonitorView::error_state("", now),
            last_cleanup: None,
            load_report,
        };
        engine.view = build_view(&[], &engine.state, 0, now);
        engine
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn view(&self) -> &MonitorView {
        &self.view
    }

    pub fn rows(&self) -> &[AgentRow] {
        &self.rows
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Runs one full cycle. Only a malformed batch fails the cycle; problems
    /// with individual agents are reported in [`CycleReport::failures`].
    pub fn run_cycle(
        &mut self,
        batch: &SnapshotBatch,
        now: DateTime<Utc>,
        sink: &mut dyn NotificationSink,
    ) -> Result<CycleReport> {
        batch
            .validate()
            .map_err(|err| MonitorError::InvalidBatch(err.to_string()))?;

        let mut report = CycleReport {
            evicted_slots: self.maintain_slots(now),
            ..CycleReport::default()
        };

        let accepted = intake(batch, &self.state.view_prefs.filter);
        report.offline = accepted.offline;
        report.duplicates = accepted.duplicates;
        report.filtered_out = accepted.filtered_out;
        report.failures = accepted.rejected;

        let names: Vec<&str> = accepted.agents.iter().map(|agent| agent.name.trim()).collect();
        self.state.slots.update_presence(names.iter().copied(), now);
        self.state.connected = names.iter().map(|name| name.to_string()).collect();

        let mut rows = Vec::with_capacity(accepted.agents.len());
        for agent in &accepted.agents {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process_agent(agent, now)));
            match outcome {
                Ok(Ok((row, closed))) => {
                    report.closed_intervals += closed;
                    rows.push(row);
                }
                Ok(Err(err)) => {
                    tracing::warn!(agent = %agent.name, error = %err, "Agent update failed");
                    report.failures.push(AgentFailure {
                        name: agent.name.clone(),
                        error: err.to_string(),
                    });
                }
                Err(_) => {
                    tracing::error!(agent = %agent.name, "Agent update panicked");
                    report.failures.push(AgentFailure {
                        name: agent.name.clone(),
                        error: "agent update panicked".to_string(),
                    });
                }
            }
        }

        for row in &mut rows {
            let outcome = self.evaluate_alerts(row, now, sink);
            row.alerting = outcome.is_alerting();
            report.alerts_active += outcome.active;
            report.alerts_fired += outcome.fired;
        }

        report.processed = rows.len();
        self.rows = rows;
        self.view = build_view(&self.rows, &self.state, report.alerts_active, now);
        report.persist_failures = self.persist();

        tracing::debug!(
            processed = report.processed,
            failures = report.failures.len(),
            closed = report.closed_intervals,
            alerts = report.alerts_active,
            "Cycle complete"
        );

        Ok(report)
    }

    /// Publishes a visible error state in place of the view.
    pub fn record_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> &MonitorView {
        self.view = MonitorView::error_state(message, now);
        &self.view
    }

    /// Elapsed-time text for the agents in the latest view. No mutation.
    pub fn timer_readouts(&self, now: DateTime<Utc>) -> Vec<TimerReadout> {
        timer_readouts(&self.rows, &self.state.timers, self.config.call_alert_ms(), now)
    }

    pub fn presence_check<T: AsRef<str>>(&self, names: &[T]) -> Vec<PresenceResult> {
        presence_check(&self.state.connected, names)
    }

    pub fn apply_command(&mut self, command: ControlCommand, now: DateTime<Utc>) -> Result<CommandOutcome> {
        let prefs = &mut self.state.alert_prefs;
        match command {
            ControlCommand::Mute => prefs.muted = true,
            ControlCommand::Unmute => prefs.muted = false,
            ControlCommand::ToggleMute => prefs.muted = !prefs.muted,
            ControlCommand::Snooze(0) => prefs.snooze_until = None,
            ControlCommand::Snooze(minutes) => {
                prefs.snooze_until = Some(now + Duration::minutes(i64::from(minutes)));
            }
            ControlCommand::Filter(text) => self.state.view_prefs.filter = text.trim().to_string(),
            ControlCommand::Favorite(name) => self.toggle_favorite(name.trim())?,
            ControlCommand::SortCalls(order) => self.state.view_prefs.sort_calls = order,
            ControlCommand::SortStatus(order) => self.state.view_prefs.sort_status = order,
            ControlCommand::Section(key, visible) => {
                self.state.view_prefs.sections.insert(key, visible);
            }
            ControlCommand::Presence(names) => {
                return Ok(CommandOutcome::Presence(self.presence_check(&names)));
            }
            ControlCommand::Refresh => return Ok(CommandOutcome::RefreshRequested),
            ControlCommand::Reset => {
                self.reset(now);
                return Ok(CommandOutcome::Reset);
            }
        }

        self.view = build_view(&self.rows, &self.state, self.view.active_alerts, now);
        self.persist();
        Ok(CommandOutcome::Updated)
    }

    /// Clears the store and every in-memory structure.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        if let Err(err) = self.persister.clear(&mut self.store) {
            tracing::warn!(error = %err, "Failed to clear store during reset");
        }
        self.state.reset(&self.config);
        self.alerts.reset();
        self.rows.clear();
        self.last_cleanup = None;
        self.view = build_view(&[], &self.state, 0, now);
        tracing::info!("State reset");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cycle steps
    // ─────────────────────────────────────────────────────────────────────

    fn maintain_slots(&mut self, now: DateTime<Utc>) -> usize {
        let due = self
            .last_cleanup
            .map_or(true, |last| (now - last).num_seconds() >= SLOT_CLEANUP_EVERY_SECS);
        if !due {
            return 0;
        }
        self.last_cleanup = Some(now);

        let evicted = self
            .state
            .slots
            .cleanup(self.config.retention.slot_idle_days, now);
        if evicted > 0 {
            self.state.forget_departed();
            let slots = &self.state.slots;
            self.alerts.retain(|name| slots.get(name).is_some());
            tracing::info!(evicted, "Evicted idle slots");
        }
        evicted
    }

    /// Classifies one agent and advances its timers. Returns the view row and
    /// how many intervals closed.
    fn process_agent(&mut self, agent: &AgentSnapshot, now: DateTime<Utc>) -> Result<(AgentRow, usize)> {
        agent.validate().map_err(|err| MonitorError::InvalidSnapshot {
            agent: agent.name.clone(),
            details: err.to_string(),
        })?;
        let name = agent.name.trim();
        let observation = observe(agent, self.policy.max_chats);
        let reported = resolve_opt(agent.reported_duration_sec.as_ref());
        let timers = &mut self.state.timers;

        let mut events = timers.observe_status(
            name,
            observation.key,
            observation.prohibited,
            reported,
            now,
            &self.policy,
        );

        if observation.key.excludes_call() {
            if let Some(event) = timers.force_close_call(name, now) {
                tracing::debug!(agent = %name, status = %observation.key, "Call closed by status");
                events.push(event);
            }
        }

        let call_reported =
            resolve_opt(agent.call_duration_sec.as_ref()).filter(|_| observation.in_call);
        events.extend(timers.observe_call(
            name,
            observation.in_call,
            call_reported,
            now,
            &self.policy,
        ));

        let chat_reported: Vec<Option<u64>> = (0..observation.chat_count)
            .map(|idx| match agent.chat_durations_sec.get(idx) {
                Some(reported) => resolve(reported),
                None if idx == 0 => reported,
                None => None,
            })
            .collect();
        events.extend(timers.observe_chats(
            name,
            observation.chat_count,
            &chat_reported,
            now,
            &self.policy,
        ));

        let closed = events.iter().filter(|event| closes_interval(event)).count();
        for event in events {
            self.apply_event(name, event, now);
        }
        self.state.last_group.insert(name.to_string(), observation.key);

        let row = AgentRow {
            name: name.to_string(),
            key: observation.key,
            raw_label: agent.raw_label.clone(),
            on_queue: observation.on_queue,
            prohibited: observation
                .prohibited
                .or_else(|| self.state.timers.prohibited_kind(name)),
            alerting: false,
        };
        Ok((row, closed))
    }

    fn apply_event(&mut self, name: &str, event: TimerEvent, now: DateTime<Utc>) {
        let ledger = &mut self.state.ledger;
        match event {
            TimerEvent::StatusChanged { from, to, closed_ms } => ledger.append(
                name,
                HistoryEvent::Status {
                    from,
                    to,
                    prev_ms: closed_ms,
                },
                now,
            ),
            TimerEvent::ProhibitedStarted { kind } => {
                ledger.append(name, HistoryEvent::ProhibOn { sub: kind }, now)
            }
            TimerEvent::ProhibitedEnded { kind, duration_ms } => {
                ledger.record_interval_close(name, IntervalKind::Prohibited(kind), duration_ms, now);
            }
            TimerEvent::CallClosed { duration_ms, forced } => {
                let added = ledger.record_interval_close(name, IntervalKind::Call, duration_ms, now);
                // Only a call that ran out on its own gives the slot back.
                if !forced {
                    self.state.slots.reorder_after_call_ends(name, now);
                }
                tracing::info!(agent = %name, duration_ms = added, forced, "Call ended");
            }
            TimerEvent::ChatClosed { slot, duration_ms } => {
                ledger.record_interval_close(name, IntervalKind::Chat { slot }, duration_ms, now);
            }
        }
    }

    fn evaluate_alerts(
        &mut self,
        row: &AgentRow,
        now: DateTime<Utc>,
        sink: &mut dyn NotificationSink,
    ) -> AlertOutcome {
        let timers = &self.state.timers;
        let input = AlertInput {
            name: &row.name,
            prohibited: (row.key == StatusKey::Prohibited).then_some(row.prohibited),
            call_ms: timers.call_elapsed_ms(&row.name, now),
            first_chat_ms: timers.chat_elapsed_ms(&row.name, now)[0],
        };
        self.alerts
            .evaluate(input, &self.state.alert_prefs, now, sink)
    }

    fn toggle_favorite(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(MonitorError::InvalidCommand("favorite expects an agent name".to_string()));
        }
        if self.state.favorites.remove(name) {
            return Ok(());
        }
        if self.state.slots.get(name).is_none() {
            return Err(MonitorError::UnknownAgent(name.to_string()));
        }
        self.state.favorites.insert(name.to_string());
        Ok(())
    }

    fn persist(&mut self) -> Vec<String> {
        self.persister.persist(&mut self.store, &self.state)
    }
}

fn closes_interval(event: &TimerEvent) -> bool {
    matches!(
        event,
        TimerEvent::CallClosed { .. }
            | TimerEvent::ChatClosed { .. }
            | TimerEvent::ProhibitedEnded { .. }
    )
}
