//! Activity logger: a dedicated thread owns the [`JsonlWriter`]; every other
//! thread sends [`ActivityEvent`]s through a bounded crossbeam channel.
//!
//! `send()` uses `try_send()` so the reader and parser are never blocked by
//! logging back-pressure; overflow is counted and reported as its own entry.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SnrError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// How many events to write between recovery attempts while degraded.
const RECOVER_EVERY: u64 = 256;

/// Events emitted by the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        port: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    LinkConnected {
        port: String,
        attempts: u64,
    },
    LinkOpenFailed {
        port: String,
        attempt: u64,
        error: String,
    },
    LinkReadFailed {
        port: String,
        error: String,
    },
    StatusFrameLogged {
        day: String,
        log_path: PathBuf,
        bytes: usize,
    },
    BatchWritten {
        day: String,
        batch: u32,
        notes: usize,
        ini_path: PathBuf,
        duration_ms: u64,
    },
    BatchAborted {
        day: String,
        batch: u32,
        error_code: String,
        reason: String,
        dropped_bytes: usize,
    },
    CorruptFrame {
        details: String,
        dropped_bytes: usize,
    },
    DayRolledOver {
        from: String,
        to: String,
        previous_batches: u32,
    },
    BufferHighWater {
        component: &'static str,
        len: usize,
        threshold: usize,
    },
    BufferOverflow {
        component: &'static str,
        dropped_bytes: usize,
        cap: usize,
    },
    ParserIdle {
        len: usize,
        capacity: usize,
        high_water: usize,
    },
    CycleCompleted {
        status_frames: usize,
        notes: usize,
    },
    SweepEntryRemoved {
        job: &'static str,
        path: PathBuf,
    },
    SweepEntrySkipped {
        job: &'static str,
        path: PathBuf,
        reason: String,
    },
    SweepCompleted {
        job: &'static str,
        root: PathBuf,
        removed: usize,
        skipped: usize,
        failed: usize,
    },
    JobFinished {
        name: String,
        ok: bool,
        duration_ms: u64,
        error: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable handle for sending log events.
#[derive(Clone, Debug)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle plus the raw receiving end, for callers that consume events
    /// themselves (tests, offline replays).
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded::<ActivityEvent>(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event. Never blocks; a full channel drops the event and bumps
    /// the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle to it.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::channel(config.channel_capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("snr-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl_config, &dropped))
        .map_err(|e| SnrError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);
    let mut written: u64 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.count = Some(d);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
        written += 1;
        if jsonl.is_degraded() && written % RECOVER_EVERY == 0 {
            jsonl.try_recover();
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn path_string(path: &std::path::Path) -> Option<String> {
    Some(path.display().to_string())
}

#[allow(clippy::too_many_lines)]
pub(crate) fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted { version, port } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.port = Some(port.clone());
            e.details = Some(format!("version={version}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::LinkConnected { port, attempts } => {
            let mut e = LogEntry::new(EventType::LinkConnect, Severity::Info);
            e.port = Some(port.clone());
            e.count = Some(*attempts);
            e.ok = Some(true);
            e
        }
        ActivityEvent::LinkOpenFailed {
            port,
            attempt,
            error,
        } => {
            let mut e = LogEntry::new(EventType::LinkFailure, Severity::Warning);
            e.port = Some(port.clone());
            e.count = Some(*attempt);
            e.ok = Some(false);
            e.error_code = Some("SNR-2001".to_string());
            e.error_message = Some(error.clone());
            e.details = Some("open".to_string());
            e
        }
        ActivityEvent::LinkReadFailed { port, error } => {
            let mut e = LogEntry::new(EventType::LinkFailure, Severity::Warning);
            e.port = Some(port.clone());
            e.ok = Some(false);
            e.error_code = Some("SNR-2001".to_string());
            e.error_message = Some(error.clone());
            e.details = Some("read".to_string());
            e
        }
        ActivityEvent::StatusFrameLogged {
            day,
            log_path,
            bytes,
        } => {
            let mut e = LogEntry::new(EventType::StatusFrame, Severity::Info);
            e.day = Some(day.clone());
            e.path = path_string(log_path);
            e.bytes = Some(*bytes as u64);
            e.ok = Some(true);
            e
        }
        ActivityEvent::BatchWritten {
            day,
            batch,
            notes,
            ini_path,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::BatchWrite, Severity::Info);
            e.day = Some(day.clone());
            e.batch = Some(*batch);
            e.count = Some(*notes as u64);
            e.path = path_string(ini_path);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::BatchAborted {
            day,
            batch,
            error_code,
            reason,
            dropped_bytes,
        } => {
            let mut e = LogEntry::new(EventType::BatchAbort, Severity::Critical);
            e.day = Some(day.clone());
            e.batch = Some(*batch);
            e.bytes = Some(*dropped_bytes as u64);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(reason.clone());
            e
        }
        ActivityEvent::CorruptFrame {
            details,
            dropped_bytes,
        } => {
            let mut e = LogEntry::new(EventType::CorruptFrame, Severity::Warning);
            e.bytes = Some(*dropped_bytes as u64);
            e.error_code = Some("SNR-2002".to_string());
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::DayRolledOver {
            from,
            to,
            previous_batches,
        } => {
            let mut e = LogEntry::new(EventType::DayRollover, Severity::Info);
            e.day = Some(to.clone());
            e.count = Some(u64::from(*previous_batches));
            e.details = Some(format!("from={from}"));
            e
        }
        ActivityEvent::BufferHighWater {
            component,
            len,
            threshold,
        } => {
            let mut e = LogEntry::new(EventType::BufferPressure, Severity::Warning);
            e.bytes = Some(*len as u64);
            e.details = Some(format!("component={component} threshold={threshold}"));
            e
        }
        ActivityEvent::BufferOverflow {
            component,
            dropped_bytes,
            cap,
        } => {
            let mut e = LogEntry::new(EventType::BufferPressure, Severity::Critical);
            e.bytes = Some(*dropped_bytes as u64);
            e.ok = Some(false);
            e.error_code = Some("SNR-2003".to_string());
            e.details = Some(format!("component={component} cap={cap}"));
            e
        }
        ActivityEvent::ParserIdle {
            len,
            capacity,
            high_water,
        } => {
            let mut e = LogEntry::new(EventType::ParserIdle, Severity::Info);
            e.bytes = Some(*len as u64);
            e.details = Some(format!("capacity={capacity} high_water={high_water}"));
            e
        }
        ActivityEvent::CycleCompleted {
            status_frames,
            notes,
        } => {
            let mut e = LogEntry::new(EventType::CycleComplete, Severity::Info);
            e.count = Some((*status_frames + *notes) as u64);
            e.details = Some(format!("status_frames={status_frames} notes={notes}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SweepEntryRemoved { job, path } => {
            let mut e = LogEntry::new(EventType::SweepEntry, Severity::Info);
            e.path = path_string(path);
            e.details = Some(format!("job={job}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SweepEntrySkipped { job, path, reason } => {
            let mut e = LogEntry::new(EventType::SweepEntry, Severity::Warning);
            e.path = path_string(path);
            e.ok = Some(false);
            e.details = Some(format!("job={job}"));
            e.error_message = Some(reason.clone());
            e
        }
        ActivityEvent::SweepCompleted {
            job,
            root,
            removed,
            skipped,
            failed,
        } => {
            let mut e = LogEntry::new(EventType::SweepComplete, Severity::Info);
            e.path = path_string(root);
            e.count = Some(*removed as u64);
            e.details = Some(format!(
                "job={job} removed={removed} skipped={skipped} failed={failed}"
            ));
            e.ok = Some(*failed == 0);
            e
        }
        ActivityEvent::JobFinished {
            name,
            ok,
            duration_ms,
            error,
        } => {
            let severity = if *ok {
                Severity::Info
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::JobRun, severity);
            e.details = Some(format!("job={name}"));
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*ok);
            e.error_message.clone_from(error);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}
