//! Alert delivery for the daemon.
//!
//! There is no desktop notification stack here; alerts go to the log and to
//! an optional JSON-lines feed the renderer tails for toasts and tones.

use fs_err::{File, OpenOptions};
use qmon_core::{AudibleCue, Notification, NotificationSink};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FeedLine<'a> {
    Notification {
        title: &'a str,
        body: &'a str,
    },
    Cue {
        frequency: u32,
        #[serde(rename = "durationMs")]
        duration_ms: u32,
    },
}

#[derive(Default)]
pub struct TracingNotifier {
    feed: Option<File>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also appends every alert to `path`, one JSON object per line.
    pub fn with_feed(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create alert feed dir: {}", err))?;
        }
        let feed = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| format!("Failed to open alert feed: {}", err))?;
        Ok(Self { feed: Some(feed) })
    }

    fn append(&mut self, line: &FeedLine<'_>) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        let result = serde_json::to_string(line)
            .map_err(|err| err.to_string())
            .and_then(|json| writeln!(feed, "{}", json).map_err(|err| err.to_string()));
        if let Err(err) = result {
            tracing::warn!(error = %err, "Failed to append alert feed");
        }
    }
}

impl NotificationSink for TracingNotifier {
    fn notify(&mut self, notification: &Notification) {
        tracing::warn!(title = %notification.title, body = %notification.body, "Alert");
        self.append(&FeedLine::Notification {
            title: &notification.title,
            body: &notification.body,
        });
    }

    fn cue(&mut self, cue: AudibleCue) {
        tracing::debug!(frequency = cue.frequency, duration_ms = cue.duration_ms, "Cue");
        self.append(&FeedLine::Cue {
            frequency: cue.frequency,
            duration_ms: cue.duration_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn feed_gets_one_line_per_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let mut notifier = TracingNotifier::with_feed(&path).unwrap();

        notifier.cue(AudibleCue {
            frequency: 880,
            duration_ms: 200,
        });
        notifier.notify(&Notification {
            title: "Appel long".to_string(),
            body: "Martin 📞 00:10:00".to_string(),
        });
        drop(notifier);

        let content = fs_err::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "cue");
        assert_eq!(lines[0]["frequency"], 880);
        assert_eq!(lines[1]["kind"], "notification");
        assert_eq!(lines[1]["title"], "Appel long");
    }
}
