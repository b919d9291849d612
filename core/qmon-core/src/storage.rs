//! Storage path management for qmon.
//!
//! Production code uses `StoragePaths::from_home()` which points to `~/.qmon/`.
//! Tests use `StoragePaths::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(MonitorError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(".qmon"),
        })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to config.toml (runtime configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the SQLite key/value store.
    pub fn store_db(&self) -> PathBuf {
        self.root.join("state.db")
    }

    /// Path to roster.json (latest batch written by the scraper).
    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("roster.json")
    }

    /// Path to view.json (grouped view for the renderer).
    pub fn view_file(&self) -> PathBuf {
        self.root.join("view.json")
    }

    /// Path to timers.json (display tick readouts), next to the view file.
    pub fn timers_file_for(view_file: &Path) -> PathBuf {
        view_file.with_file_name("timers.json")
    }

    /// Path to logs/ directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
