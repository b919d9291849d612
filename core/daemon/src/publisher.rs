//! Hands the computed view to the renderer.
//!
//! The renderer polls two JSON files: the grouped view, rewritten after each
//! cycle or command, and the timer readouts, rewritten on every display tick.
//! Both are replaced atomically so a reader never sees a partial document.

use qmon_core::{MonitorView, TimerReadout};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub trait ViewPublisher: Send {
    fn publish_view(&mut self, view: &MonitorView) -> Result<(), String>;
    fn publish_timers(&mut self, readouts: &[TimerReadout]) -> Result<(), String>;
}

pub struct JsonFilePublisher {
    view_path: PathBuf,
    timers_path: PathBuf,
}

impl JsonFilePublisher {
    pub fn new(view_path: PathBuf, timers_path: PathBuf) -> Self {
        Self {
            view_path,
            timers_path,
        }
    }
}

impl ViewPublisher for JsonFilePublisher {
    fn publish_view(&mut self, view: &MonitorView) -> Result<(), String> {
        write_json_atomic(&self.view_path, view)
    }

    fn publish_timers(&mut self, readouts: &[TimerReadout]) -> Result<(), String> {
        write_json_atomic(&self.timers_path, readouts)
    }
}

/// Discards everything. Used by `replay`, which only reports.
#[derive(Default)]
pub struct NullPublisher;

impl ViewPublisher for NullPublisher {
    fn publish_view(&mut self, _view: &MonitorView) -> Result<(), String> {
        Ok(())
    }

    fn publish_timers(&mut self, _readouts: &[TimerReadout]) -> Result<(), String> {
        Ok(())
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(file_path: &Path, value: &T) -> Result<(), String> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize: {}", e))?;

    let parent_dir = file_path
        .parent()
        .ok_or_else(|| "Output path has no parent directory".to_string())?;
    fs_err::create_dir_all(parent_dir)
        .map_err(|e| format!("Failed to create output directory: {}", e))?;

    let mut temp_file =
        NamedTempFile::new_in(parent_dir).map_err(|e| format!("Temp file error: {}", e))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write temp file: {}", e))?;
    temp_file
        .flush()
        .map_err(|e| format!("Failed to flush temp file: {}", e))?;
    temp_file
        .persist(file_path)
        .map_err(|e| format!("Failed to write {}: {}", file_path.display(), e.error))?;

    Ok(())
}
