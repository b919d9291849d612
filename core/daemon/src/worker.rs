//! The single-writer loop.
//!
//! One thread owns the engine. It wakes for whichever comes first: the next
//! roster poll, the next display tick, or a control message. A cycle that
//! fails or panics publishes an error view and the loop keeps going.

use chrono::Utc;
use qmon_core::{
    CommandOutcome, ControlCommand, KvStore, MonitorEngine, NotificationSink,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::cadence::Cadence;
use crate::publisher::ViewPublisher;
use crate::source::SnapshotSource;

pub type CommandReply = Result<CommandOutcome, String>;

pub enum Message {
    Command {
        command: ControlCommand,
        reply: Option<Sender<CommandReply>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Cycled { host_visible: Option<bool> },
    HostBusy,
    NoRoster,
    Failed,
}

pub struct Worker<S, Src, P, N>
where
    S: KvStore,
    Src: SnapshotSource,
    P: ViewPublisher,
    N: NotificationSink,
{
    engine: MonitorEngine<S>,
    source: Src,
    publisher: P,
    notifier: N,
    cadence: Cadence,
    tick: Duration,
}

impl<S, Src, P, N> Worker<S, Src, P, N>
where
    S: KvStore,
    Src: SnapshotSource,
    P: ViewPublisher,
    N: NotificationSink,
{
    pub fn new(engine: MonitorEngine<S>, source: Src, publisher: P, notifier: N) -> Self {
        let polling = &engine.config().polling;
        let cadence = Cadence::new(polling);
        let tick = Duration::from_millis(polling.tick_ms.max(1));
        Self {
            engine,
            source,
            publisher,
            notifier,
            cadence,
            tick,
        }
    }

    pub fn engine(&self) -> &MonitorEngine<S> {
        &self.engine
    }

    /// Runs until a `Shutdown` message arrives or every sender is dropped.
    pub fn run(mut self, rx: Receiver<Message>) {
        let mut next_poll = Instant::now();
        let mut next_tick = Instant::now();

        loop {
            let now = Instant::now();
            if now >= next_poll {
                let outcome = self.poll_once();
                let delay = self.next_delay(outcome);
                next_poll = Instant::now() + delay;
            }
            if now >= next_tick {
                self.tick();
                next_tick = now + self.tick;
            }

            let wait = next_poll.min(next_tick).saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(Message::Command { command, reply }) => {
                    let refresh = matches!(command, ControlCommand::Refresh);
                    let result = self.handle_command(command);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                    if refresh {
                        next_poll = Instant::now();
                    }
                }
                Ok(Message::Shutdown) => {
                    tracing::info!("Worker shutting down");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Reads the roster once and, unless the host is busy, runs a cycle.
    pub fn poll_once(&mut self) -> PollOutcome {
        let batch = match self.source.poll() {
            Ok(Some(batch)) => batch,
            Ok(None) => return PollOutcome::NoRoster,
            Err(err) => {
                tracing::warn!(error = %err, "Roster read failed");
                let view = self.engine.record_failure(err, Utc::now());
                publish_or_warn(self.publisher.publish_view(view));
                return PollOutcome::Failed;
            }
        };

        if batch.host_busy {
            tracing::debug!("Host busy; skipping cycle");
            return PollOutcome::HostBusy;
        }

        let now = Utc::now();
        let engine = &mut self.engine;
        let notifier = &mut self.notifier;
        let result = panic::catch_unwind(AssertUnwindSafe(|| engine.run_cycle(&batch, now, notifier)));

        let failure = match result {
            Ok(Ok(report)) => {
                if !report.failures.is_empty() {
                    tracing::warn!(failures = ?report.failures, "Some agents were not updated");
                }
                if !report.persist_failures.is_empty() {
                    tracing::warn!(keys = ?report.persist_failures, "State kept in memory only");
                }
                None
            }
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("Cycle panicked: {}", panic_message(payload.as_ref()))),
        };

        match failure {
            None => {
                publish_or_warn(self.publisher.publish_view(self.engine.view()));
                PollOutcome::Cycled {
                    host_visible: batch.host_visible,
                }
            }
            Some(message) => {
                tracing::error!(error = %message, "Cycle failed");
                let view = self.engine.record_failure(message, now);
                publish_or_warn(self.publisher.publish_view(view));
                PollOutcome::Failed
            }
        }
    }

    /// Refreshes the timer readouts. Never touches timer state.
    pub fn tick(&mut self) {
        let readouts = self.engine.timer_readouts(Utc::now());
        publish_or_warn(self.publisher.publish_timers(&readouts));
    }

    pub fn handle_command(&mut self, command: ControlCommand) -> CommandReply {
        tracing::info!(command = ?command, "Control command");
        let read_only = command.is_read_only();
        let outcome = self
            .engine
            .apply_command(command, Utc::now())
            .map_err(|err| err.to_string())?;
        if !read_only {
            publish_or_warn(self.publisher.publish_view(self.engine.view()));
        }
        Ok(outcome)
    }

    fn next_delay(&mut self, outcome: PollOutcome) -> Duration {
        match outcome {
            PollOutcome::Cycled { host_visible } => {
                self.cadence.after_cycle(host_visible, Instant::now())
            }
            PollOutcome::HostBusy => self.cadence.after_busy(),
            PollOutcome::NoRoster | PollOutcome::Failed => {
                self.cadence.after_cycle(None, Instant::now())
            }
        }
    }
}

/// Sends a command and waits for the worker's answer.
pub fn request(
    tx: &Sender<Message>,
    command: ControlCommand,
    timeout: Duration,
) -> Result<CommandOutcome, String> {
    let (reply_tx, reply_rx) = mpsc::channel();
    tx.send(Message::Command {
        command,
        reply: Some(reply_tx),
    })
    .map_err(|_| "Worker is not running".to_string())?;
    reply_rx
        .recv_timeout(timeout)
        .map_err(|err| format!("No reply from worker: {}", err))?
}

fn publish_or_warn(result: Result<(), String>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "Failed to publish");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
