//! Collector service: wires the reader, parser, scheduler and logger threads
//! together and sequences startup and shutdown.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Config;
use crate::core::errors::{Result, SnrError};
use crate::daemon::reader::{Reader, ReaderSettings, ReaderStats};
use crate::daemon::signals::{ShutdownCoordinator, ShutdownTask, SignalHandler};
use crate::link::{LinkManager, LinkOpener};
use crate::logger::activity::{ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::parser::{FrameParser, ParserStats, run_parser};
use crate::retention;
use crate::retention::scheduler::CronScheduler;

/// How often the supervisor checks the shutdown flag and worker liveness.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);

/// Options for [`Collector::run`] beyond the config file.
pub struct CollectorOptions {
    pub clock: Arc<dyn Clock>,
    pub signals: SignalHandler,
    /// Register the cron retention jobs.
    pub schedule_retention: bool,
}

impl CollectorOptions {
    /// Production defaults: system clock, OS signal hooks, retention jobs on.
    pub fn production() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            signals: SignalHandler::new(),
            schedule_retention: true,
        }
    }
}

/// What the collector did before it stopped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectorSummary {
    pub reader: ReaderStats,
    pub parser: ParserStats,
    pub uptime_secs: u64,
    pub clean_shutdown: bool,
}

/// The running service.
pub struct Collector {
    config: Arc<Config>,
    options: CollectorOptions,
}

impl Collector {
    pub fn new(config: Config, options: CollectorOptions) -> Self {
        Self {
            config: Arc::new(config),
            options,
        }
    }

    /// Run until shutdown is requested or both workers have exited.
    pub fn run<O>(self, opener: O) -> Result<CollectorSummary>
    where
        O: LinkOpener + 'static,
    {
        let start_time = Instant::now();
        let config = Arc::clone(&self.config);
        let signals = self.options.signals.clone();
        let clock = Arc::clone(&self.options.clock);

        // 1. Logger.
        let (logger, logger_join) = spawn_logger(ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: config.paths.activity_log.clone(),
                ..JsonlConfig::default()
            },
            ..ActivityLoggerConfig::default()
        })?;
        logger.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            port: opener.describe(),
        });

        // 2. Stale INI from a previous run.
        remove_stale_ini(&config, &logger);

        // 3. Retention jobs.
        let mut scheduler = CronScheduler::new(Arc::clone(&clock), logger.clone(), signals.flag());
        if self.options.schedule_retention {
            retention::register_jobs(&mut scheduler, &config, &clock, &logger)?;
            scheduler.start()?;
        }

        // 4. Handoff channel and workers.
        let (handoff_tx, handoff_rx) = bounded::<Vec<u8>>(config.parser.handoff_channel_capacity);

        let parser = FrameParser::new(&config, Arc::clone(&clock), logger.clone());
        let idle_timeout = config.parser.idle_timeout();
        let parser_shutdown = signals.flag();
        let parser_join = thread::Builder::new()
            .name("snr-parser".to_string())
            .spawn(move || run_parser(parser, &handoff_rx, idle_timeout, &parser_shutdown))
            .map_err(|source| SnrError::Runtime {
                details: format!("failed to spawn parser thread: {source}"),
            })?;

        let link = LinkManager::new(
            opener,
            config.serial.reconnect_delay(),
            signals.flag(),
            logger.clone(),
        );
        let reader = Reader::new(
            link,
            handoff_tx,
            ReaderSettings::from_config(&config),
            signals.flag(),
            logger.clone(),
        );
        let reader_join = match thread::Builder::new()
            .name("snr-reader".to_string())
            .spawn(move || reader.run())
        {
            Ok(join) => join,
            Err(source) => {
                // The parser exits once its sender side (owned by the failed
                // reader closure) is dropped.
                signals.request_shutdown();
                let _ = parser_join.join();
                return Err(SnrError::Runtime {
                    details: format!("failed to spawn reader thread: {source}"),
                });
            }
        };

        eprintln!("[SNR-DAEMON] collector running on {}", config.serial.port_name);

        // 5. Supervise.
        while !signals.should_shutdown() {
            if reader_join.is_finished() {
                eprintln!("[SNR-DAEMON] reader exited; shutting down");
                break;
            }
            thread::sleep(SUPERVISE_INTERVAL);
        }
        signals.request_shutdown();

        // 6. Shutdown: reader first so its final handoff reaches the parser,
        // then the parser drains, then the scheduler and logger stop.
        let mut reader_stats = None;
        let mut parser_stats = None;
        let tasks: Vec<ShutdownTask<'_>> = vec![
            (
                "join reader",
                Box::new(|| {
                    reader_stats = reader_join.join().ok();
                    reader_stats.is_some()
                }),
            ),
            (
                "join parser",
                Box::new(|| {
                    parser_stats = parser_join.join().ok();
                    parser_stats.is_some()
                }),
            ),
            (
                "stop scheduler",
                Box::new(|| {
                    scheduler.stop();
                    true
                }),
            ),
        ];
        let clean = ShutdownCoordinator::new().execute(tasks);
        let summary = CollectorSummary {
            reader: reader_stats.unwrap_or_default(),
            parser: parser_stats.unwrap_or_default(),
            uptime_secs: start_time.elapsed().as_secs(),
            clean_shutdown: clean,
        };

        logger.send(ActivityEvent::DaemonStopped {
            reason: if clean { "clean shutdown" } else { "worker failure" }.to_string(),
            uptime_secs: summary.uptime_secs,
        });
        logger.shutdown();
        if logger_join.join().is_err() {
            eprintln!("[SNR-DAEMON] logger thread panicked");
        }

        eprintln!(
            "[SNR-DAEMON] shutdown complete (uptime={}s, batches={}, dropped_log_events={})",
            summary.uptime_secs,
            summary.parser.batches,
            logger.dropped_events()
        );
        Ok(summary)
    }
}

/// Delete the INI left behind by a previous run.
pub fn remove_stale_ini(config: &Config, logger: &ActivityLoggerHandle) {
    let path = &config.output.ini_path;
    match fs::remove_file(path) {
        Ok(()) => eprintln!("[SNR-DAEMON] removed stale {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            let err = SnrError::io(path, err);
            eprintln!("[SNR-DAEMON] {err}");
            logger.send(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }
}
