//! Frame parser: turns handed-off byte ranges into day log lines, INI files
//! and bitmap images.

#![allow(missing_docs)]

pub mod ini;
pub mod notes;
pub mod state;
pub mod status;

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::core::clock::Clock;
use crate::core::config::{Config, OutputConfig};
use crate::core::errors::{Result, SnrError};
use crate::core::paths;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::parser::notes::{BatchReport, BatchTarget};
use crate::parser::state::DayCounter;
use crate::wire::{self, buffer::StreamBuffer};

/// Result of one parse cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub status_frames: usize,
    pub corrupt_frames: usize,
    pub batches: Vec<BatchReport>,
    /// Bytes discarded as corrupt, residue, or after an aborted batch.
    pub dropped_bytes: usize,
    /// Last failure of the cycle: an unwritable status log or an aborted batch.
    pub aborted: Option<String>,
}

impl CycleReport {
    /// Notes written across all batches of this cycle.
    #[must_use]
    pub fn notes(&self) -> usize {
        self.batches.iter().map(|b| b.note_count).sum()
    }
}

/// Parser state: its own buffer, the day counter, and the output layout.
pub struct FrameParser {
    output: OutputConfig,
    buffer: StreamBuffer,
    buffer_cap: usize,
    counter: DayCounter,
    clock: Arc<dyn Clock>,
    logger: ActivityLoggerHandle,
}

impl FrameParser {
    /// Build a parser whose day counter continues after the batch directories
    /// already on disk for today.
    pub fn new(config: &Config, clock: Arc<dyn Clock>, logger: ActivityLoggerHandle) -> Self {
        let today = paths::day_stamp(&clock.now());
        let counter = DayCounter::seeded(&config.output.image_root, &today);
        Self {
            output: config.output.clone(),
            buffer: StreamBuffer::new(),
            buffer_cap: config.parser.buffer_cap_bytes,
            counter,
            clock,
            logger,
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn counter(&self) -> &DayCounter {
        &self.counter
    }

    /// Append a handed-off chunk. Overflowing the cap drops everything held.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.append(bytes);
        if self.buffer.len() > self.buffer_cap {
            let err = SnrError::BufferOverflow {
                len: self.buffer.len(),
                cap: self.buffer_cap,
            };
            let dropped = self.buffer.clear();
            eprintln!("[SNR-PARSER] {err}; dropped {dropped} bytes");
            self.logger.send(ActivityEvent::BufferOverflow {
                component: "parser",
                dropped_bytes: dropped,
                cap: self.buffer_cap,
            });
        }
    }

    /// Run one cycle: day rollover, status frames, then note batches.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let now = self.clock.now();
        let today = paths::day_stamp(&now);

        if let Some((previous, batches)) = self.counter.roll_to(&today) {
            eprintln!("[SNR-PARSER] day rollover {previous} -> {today} ({batches} batches)");
            self.logger.send(ActivityEvent::DayRolledOver {
                from: previous,
                to: today.clone(),
                previous_batches: batches,
            });
        }

        let log_path = paths::day_log_path(&self.output.log_root, &today);
        let outcome = status::extract_status_frames(&mut self.buffer, &log_path);
        report.status_frames = outcome.logged.len();
        report.corrupt_frames = outcome.corrupt.len();
        report.dropped_bytes += outcome.dropped_bytes();
        for frame in &outcome.logged {
            self.logger.send(ActivityEvent::StatusFrameLogged {
                day: today.clone(),
                log_path: log_path.clone(),
                bytes: frame.len(),
            });
        }
        for frame in &outcome.corrupt {
            eprintln!(
                "[SNR-PARSER] dropped orphan frame: {}",
                String::from_utf8_lossy(frame)
            );
            self.logger.send(ActivityEvent::CorruptFrame {
                details: "message close without status date".to_string(),
                dropped_bytes: frame.len(),
            });
        }
        if let Some(err) = outcome.log_error {
            // The log is skipped for this cycle; batches still run.
            eprintln!(
                "[SNR-PARSER] status log {} failed, {} frame(s) not logged: {err}",
                log_path.display(),
                outcome.unlogged.len()
            );
            self.logger.send(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
            report.aborted = Some(err.to_string());
        }

        self.extract_batches(&now, &mut report);

        eprintln!(
            "[SNR-PARSER] cycle complete: {} status frame(s), {} batch(es), {} buffered",
            report.status_frames,
            report.batches.len(),
            self.buffer.len()
        );
        self.logger.send(ActivityEvent::CycleCompleted {
            status_frames: report.status_frames,
            notes: report.notes(),
        });
        report
    }

    fn extract_batches(&mut self, now: &chrono::DateTime<chrono::Local>, report: &mut CycleReport) {
        let target = BatchTarget {
            ini_path: &self.output.ini_path,
            image_root: &self.output.image_root,
            operation_time: now,
        };

        loop {
            // Records left ahead of every preamble are residue once a batch has run.
            if !report.batches.is_empty() && notes::pending_notes(&self.buffer) == 0 {
                break;
            }
            let started = Instant::now();
            match notes::extract_batch(&mut self.buffer, &mut self.counter, target) {
                Ok(Some(batch)) => {
                    eprintln!(
                        "[SNR-PARSER] batch {}/{} written: {} note(s)",
                        self.counter.day(),
                        batch.batch_index,
                        batch.note_count
                    );
                    self.logger.send(ActivityEvent::BatchWritten {
                        day: self.counter.day().to_string(),
                        batch: batch.batch_index,
                        notes: batch.note_count,
                        ini_path: batch.ini_path.clone(),
                        duration_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                    });
                    report.batches.push(batch);
                }
                Ok(None) => break,
                Err(err) => {
                    let dropped = self.buffer.clear();
                    self.abort_batch(&err, dropped);
                    report.dropped_bytes += dropped;
                    report.aborted = Some(err.to_string());
                    return;
                }
            }
        }

        if !report.batches.is_empty() {
            report.dropped_bytes += self.buffer.clear();
        }
    }

    fn abort_batch(&self, err: &SnrError, dropped: usize) {
        eprintln!("[SNR-PARSER] batch aborted, dropped {dropped} bytes: {err}");
        self.logger.send(ActivityEvent::BatchAborted {
            day: self.counter.day().to_string(),
            batch: self.counter.count(),
            error_code: err.code().to_string(),
            reason: err.to_string(),
            dropped_bytes: dropped,
        });
    }

    fn report_idle(&self) {
        eprintln!(
            "[SNR-PARSER] idle: buffer len={} cap={} high_water={}",
            self.buffer.len(),
            self.buffer.capacity(),
            self.buffer.high_water()
        );
        self.logger.send(ActivityEvent::ParserIdle {
            len: self.buffer.len(),
            capacity: self.buffer.capacity(),
            high_water: self.buffer.high_water(),
        });
    }
}

/// Outcome of replaying a captured stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub bytes_read: u64,
    pub cycles: Vec<CycleReport>,
    /// Bytes after the last message close tag, never handed to the parser.
    pub incomplete_tail: usize,
}

/// Feed a captured byte stream through the same handoff split the reader uses,
/// running one parse cycle per completed range.
pub fn replay<R: Read>(
    parser: &mut FrameParser,
    mut input: R,
    chunk_bytes: usize,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut pending = StreamBuffer::new();
    let mut chunk = vec![0_u8; chunk_bytes.max(1)];

    loop {
        let n = match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(SnrError::Runtime {
                    details: format!("replay input read failed: {source}"),
                });
            }
        };
        summary.bytes_read += n as u64;
        pending.append(&chunk[..n]);
        if let Some(completed) = wire::take_completed(&mut pending) {
            parser.push(&completed);
            summary.cycles.push(parser.run_cycle());
        }
    }

    summary.incomplete_tail = pending.len();
    Ok(summary)
}

/// Totals over a parser worker's lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParserStats {
    pub cycles: u64,
    pub status_frames: u64,
    pub batches: u64,
    pub notes: u64,
    pub aborted_cycles: u64,
    pub idle_ticks: u64,
}

/// Parser worker loop.
///
/// Each received chunk is appended and parsed; an idle timeout only logs a
/// heartbeat. Exits when the handoff channel disconnects, or on the first idle
/// tick after shutdown was requested, so chunks already queued are drained.
pub fn run_parser(
    mut parser: FrameParser,
    handoff: &Receiver<Vec<u8>>,
    idle_timeout: std::time::Duration,
    shutdown: &Arc<AtomicBool>,
) -> ParserStats {
    let mut stats = ParserStats::default();

    loop {
        match handoff.recv_timeout(idle_timeout) {
            Ok(chunk) => {
                parser.push(&chunk);
                let report = parser.run_cycle();
                stats.cycles += 1;
                stats.status_frames += report.status_frames as u64;
                stats.batches += report.batches.len() as u64;
                stats.notes += report.notes() as u64;
                if report.aborted.is_some() {
                    stats.aborted_cycles += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                stats.idle_ticks += 1;
                parser.report_idle();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !parser.buffer.is_empty() {
        eprintln!(
            "[SNR-PARSER] exiting with {} unparsed byte(s)",
            parser.buffer.len()
        );
    }
    stats
}
