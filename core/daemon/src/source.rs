//! Roster sources.
//!
//! The scraper that reads the host page writes its latest batch to a JSON
//! file; the daemon re-reads it on every poll. Polls must observe the roster
//! repeatedly even when it has not changed, because debounce counts polls.

use fs_err as fs;
use qmon_protocol::{parse_batch, SnapshotBatch};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub trait SnapshotSource: Send {
    /// Latest batch, `None` when nothing has been captured yet.
    fn poll(&mut self) -> Result<Option<SnapshotBatch>, String>;
}

pub struct FileSnapshotSource {
    path: PathBuf,
    warned_missing: bool,
}

impl FileSnapshotSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            warned_missing: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn poll(&mut self) -> Result<Option<SnapshotBatch>, String> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if !self.warned_missing {
                    tracing::warn!(path = %self.path.display(), "Roster file not found; waiting");
                    self.warned_missing = true;
                }
                return Ok(None);
            }
            Err(err) => return Err(format!("Failed to read roster: {}", err)),
        };
        self.warned_missing = false;

        parse_batch(&bytes)
            .map(Some)
            .map_err(|err| format!("Failed to parse roster: {}", err))
    }
}
