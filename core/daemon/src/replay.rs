//! Offline replay of recorded rosters.
//!
//! Input is JSON lines, one batch per line. Each batch is processed at its own
//! `capturedAt`; a batch without one is placed one refresh interval after the
//! previous batch. Blank lines and `#` comments are ignored.

use chrono::{DateTime, Duration, Utc};
use qmon_core::{CollectingSink, KvStore, MonitorEngine, Notification};
use qmon_protocol::parse_batch;
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;

use crate::publisher::ViewPublisher;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub lines: usize,
    pub cycles: usize,
    pub skipped_busy: usize,
    pub bad_lines: Vec<BadLine>,
    pub agent_failures: usize,
    pub closed_intervals: usize,
    pub alerts_fired: u32,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadLine {
    pub line: usize,
    pub error: String,
}

pub fn replay_file<S: KvStore>(
    engine: &mut MonitorEngine<S>,
    path: &Path,
    publisher: &mut dyn ViewPublisher,
) -> Result<ReplaySummary, String> {
    let file = fs_err::File::open(path).map_err(|err| format!("Failed to open replay file: {}", err))?;
    replay_lines(engine, std::io::BufReader::new(file), publisher)
}

pub fn replay_lines<S: KvStore, R: BufRead>(
    engine: &mut MonitorEngine<S>,
    reader: R,
    publisher: &mut dyn ViewPublisher,
) -> Result<ReplaySummary, String> {
    let step = Duration::milliseconds(
        i64::try_from(engine.config().polling.refresh_ms).unwrap_or(i64::MAX),
    );
    let mut summary = ReplaySummary::default();
    let mut sink = CollectingSink::default();
    let mut previous: Option<DateTime<Utc>> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|err| format!("Failed to read line {}: {}", line_no, err))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        summary.lines += 1;

        let batch = match parse_batch(trimmed.as_bytes()) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "Skipping unreadable batch");
                summary.bad_lines.push(BadLine {
                    line: line_no,
                    error: err.to_string(),
                });
                continue;
            }
        };

        let now = batch
            .captured_at_utc()
            .or_else(|| previous.map(|prev| prev + step))
            .unwrap_or_else(Utc::now);
        previous = Some(now);

        if batch.host_busy {
            summary.skipped_busy += 1;
            continue;
        }

        match engine.run_cycle(&batch, now, &mut sink) {
            Ok(report) => {
                summary.cycles += 1;
                summary.agent_failures += report.failures.len();
                summary.closed_intervals += report.closed_intervals;
                summary.alerts_fired += report.alerts_fired;
                publisher.publish_view(engine.view())?;
                publisher.publish_timers(&engine.timer_readouts(now))?;
            }
            Err(err) => {
                summary.bad_lines.push(BadLine {
                    line: line_no,
                    error: err.to_string(),
                });
                publisher.publish_view(engine.record_failure(err.to_string(), now))?;
            }
        }
    }

    summary.notifications = sink.notifications;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::NullPublisher;
    use qmon_core::{MemoryStore, MonitorConfig};
    use std::io::Cursor;

    fn engine() -> MonitorEngine<MemoryStore> {
        MonitorEngine::new(MonitorConfig::default(), MemoryStore::new(), Utc::now())
    }

    #[test]
    fn replays_call_and_uses_batch_time() {
        let input = r#"
# Martin takes a call
{"capturedAt":"2026-03-02T09:00:00Z","agents":[{"name":"Martin","isVoiceFlag":true}]}
{"capturedAt":"2026-03-02T09:01:00Z","agents":[{"name":"Martin","rawLabel":"Disponible","onQueueFlag":true}]}
{"agents":[{"name":"Martin","rawLabel":"Disponible","onQueueFlag":true}]}
{"agents":[{"name":"Martin","rawLabel":"Disponible","onQueueFlag":true}]}
"#;
        let mut engine = engine();
        let summary = replay_lines(&mut engine, Cursor::new(input), &mut NullPublisher).unwrap();

        assert_eq!(summary.lines, 4);
        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.closed_intervals, 1);
        assert!(summary.bad_lines.is_empty());

        let aggregate = engine.state().ledger.aggregate("2026-03-02", "Martin");
        assert_eq!(aggregate.call_ms, 63_000);
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let input = "not json\n{\"schemaVersion\":7,\"agents\":[]}\n{\"hostBusy\":true,\"agents\":[]}\n";
        let mut engine = engine();
        let summary = replay_lines(&mut engine, Cursor::new(input), &mut NullPublisher).unwrap();

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.skipped_busy, 1);
        let lines: Vec<usize> = summary.bad_lines.iter().map(|bad| bad.line).collect();
        assert_eq!(lines, vec![1, 2]);
    }
}
