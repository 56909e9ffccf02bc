//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing reader never sees a torn line. When the primary file cannot be
//! written the writer degrades: fallback path, then stderr with an
//! `[SNR-JSONL]` prefix, then silent discard. The collector must never stop
//! because its own activity log is broken.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SnrError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types of the collector's activity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    LinkConnect,
    LinkFailure,
    StatusFrame,
    BatchWrite,
    BatchAbort,
    CorruptFrame,
    DayRollover,
    BufferPressure,
    ParserIdle,
    CycleComplete,
    SweepComplete,
    SweepEntry,
    JobRun,
    Error,
}

/// A single JSONL log entry; only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Serial port name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Day stamp (`YYYYMMDD`) the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// Batch index within the day.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<u32>,
    /// Item count (notes, frames, removed entries, attempts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Byte count (buffer length, dropped bytes, payload size).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            port: None,
            day: None,
            batch: None,
            count: None,
            bytes: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Optional fallback path, ideally on another filesystem.
    pub fallback_path: Option<PathBuf>,
    /// Size at which the file is rotated.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 30,
        }
    }
}

/// Append-only JSONL writer with rotation and degradation.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
}

impl JsonlWriter {
    /// Open the log file, degrading immediately if it cannot be opened.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
        };
        let primary = writer.config.path.clone();
        if !writer.attach(&primary, WriterState::Normal) {
            writer.fall_back();
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => eprintln!("[SNR-JSONL] serialize error: {e}"),
        }
    }

    pub fn flush(&mut self) {
        if let Some(out) = self.writer.as_mut() {
            let _ = out.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(out) = self.writer.as_mut() {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
            self.last_fsync = SystemTime::now();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.state != WriterState::Normal
    }

    /// Try to return to the primary path after a degradation.
    pub fn try_recover(&mut self) {
        if !self.is_degraded() {
            return;
        }
        let primary = self.config.path.clone();
        if self.attach(&primary, WriterState::Normal) {
            eprintln!("[SNR-JSONL] recovered to primary path: {}", primary.display());
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.file_backed() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                let ok = self
                    .writer
                    .as_mut()
                    .is_some_and(|out| out.write_all(line.as_bytes()).is_ok());
                if ok {
                    self.bytes_written += len;
                    self.maybe_fsync();
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => eprint!("[SNR-JSONL] {line}"),
            WriterState::Discard => {}
        }
    }

    fn file_backed(&self) -> bool {
        matches!(self.state, WriterState::Normal | WriterState::Fallback)
    }

    fn maybe_fsync(&mut self) {
        let due = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO)
            >= Duration::from_secs(self.config.fsync_interval_secs);
        if due {
            self.fsync();
        }
    }

    /// Point the writer at `path`. Returns `false` (and changes nothing) if
    /// the file cannot be opened.
    fn attach(&mut self, path: &Path, state: WriterState) -> bool {
        match open_append(path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file));
                self.state = state;
                self.bytes_written = size;
                true
            }
            Err(_) => false,
        }
    }

    /// Primary path failed: try the fallback file, else stderr.
    fn fall_back(&mut self) {
        let fallback = self.config.fallback_path.clone();
        match fallback {
            Some(path) if self.attach(&path, WriterState::Fallback) => {
                eprintln!("[SNR-JSONL] primary path failed, using fallback: {}", path.display());
            }
            Some(_) => {
                self.state = WriterState::Stderr;
                eprintln!("[SNR-JSONL] primary and fallback paths failed, using stderr");
            }
            None => {
                self.state = WriterState::Stderr;
                eprintln!("[SNR-JSONL] primary path failed and no fallback configured, using stderr");
            }
        }
    }

    /// Step one level down the degradation ladder.
    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Normal => self.fall_back(),
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                eprintln!("[SNR-JSONL] fallback write failed, using stderr");
            }
            WriterState::Stderr | WriterState::Discard => self.state = WriterState::Discard,
        }
    }

    fn current_path(&self) -> Option<PathBuf> {
        match self.state {
            WriterState::Normal => Some(self.config.path.clone()),
            WriterState::Fallback => self.config.fallback_path.clone(),
            WriterState::Stderr | WriterState::Discard => None,
        }
    }

    fn rotate(&mut self) {
        let Some(base) = self.current_path() else {
            return;
        };
        self.flush();
        self.writer = None;

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        let state = self.state;
        if !self.attach(&base, state) {
            self.degrade();
        }
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SnrError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SnrError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(path: PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn write_entry_produces_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone()));

        let mut entry = LogEntry::new(EventType::BatchWrite, Severity::Info);
        entry.batch = Some(3);
        entry.count = Some(2);
        writer.write_entry(&entry);
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "batch_write");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["batch"], 3);
    }

    #[test]
    fn unset_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone()));

        writer.write_entry(&LogEntry::new(EventType::ParserIdle, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"batch\""));
        assert!(!line.contains("\"bytes\""));
    }

    #[test]
    fn rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut config = config_at(path.clone());
        config.max_size_bytes = 100;
        let mut writer = JsonlWriter::open(config);

        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::CycleComplete, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn fallback_when_primary_dir_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut config = config_at(blocker.join("primary.jsonl"));
        config.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(config);

        assert_eq!(writer.state(), "fallback");
        assert!(writer.is_degraded());
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();

        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn stderr_when_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let writer = JsonlWriter::open(config_at(blocker.join("primary.jsonl")));
        assert_eq!(writer.state(), "stderr");
    }
}
