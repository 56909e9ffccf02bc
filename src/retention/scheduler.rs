//! Cron-driven job scheduler.
//!
//! Jobs are registered with a six-field cron expression (seconds first) and
//! run on a single `snr-scheduler` thread in local time. A failed job is not
//! retried until its next occurrence.

#![allow(missing_docs)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use cron::Schedule;
use parking_lot::Mutex;

use crate::core::clock::Clock;
use crate::core::errors::{Result, SnrError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Work run on each trigger.
pub type JobAction = Box<dyn FnMut() -> Result<()> + Send>;

/// Identifies a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: usize,
    pub name: String,
}

/// Something that runs named actions on cron triggers.
pub trait Scheduler {
    fn register(&mut self, name: &str, cron_expr: &str, action: JobAction) -> Result<JobHandle>;
}

/// Parse a cron expression, mapping failures to [`SnrError::InvalidSchedule`].
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| SnrError::InvalidSchedule {
        expression: expression.to_string(),
        details: e.to_string(),
    })
}

struct Job {
    name: String,
    schedule: Schedule,
    action: JobAction,
    next_run: Option<DateTime<Local>>,
}

impl Job {
    fn advance(&mut self, after: &DateTime<Local>) {
        self.next_run = self.schedule.after(after).next();
    }
}

const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// [`Scheduler`] backed by the `cron` crate and one worker thread.
pub struct CronScheduler {
    jobs: Arc<Mutex<Vec<Job>>>,
    clock: Arc<dyn Clock>,
    logger: ActivityLoggerHandle,
    shutdown: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    tick: Duration,
    worker: Option<thread::JoinHandle<()>>,
}

impl CronScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        logger: ActivityLoggerHandle,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            clock,
            logger,
            shutdown,
            stop: Arc::new(AtomicBool::new(false)),
            tick: DEFAULT_TICK,
            worker: None,
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Next trigger time of a registered job.
    pub fn next_run(&self, handle: &JobHandle) -> Option<DateTime<Local>> {
        self.jobs.lock().get(handle.id).and_then(|job| job.next_run)
    }

    /// Run every job whose trigger time has passed. Returns how many ran.
    pub fn run_due(&self) -> usize {
        run_due_jobs(&self.jobs, self.clock.as_ref(), &self.logger)
    }

    /// Start the worker thread. Calling it twice is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let jobs = Arc::clone(&self.jobs);
        let clock = Arc::clone(&self.clock);
        let logger = self.logger.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let stop = Arc::clone(&self.stop);
        let tick = self.tick;

        let handle = thread::Builder::new()
            .name("snr-scheduler".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
                    run_due_jobs(&jobs, clock.as_ref(), &logger);
                    thread::sleep(tick);
                }
            })
            .map_err(|source| SnrError::Runtime {
                details: format!("failed to spawn scheduler thread: {source}"),
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for it. A job already running finishes first.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            eprintln!("[SNR-SCHED] scheduler thread panicked");
        }
    }
}

impl Scheduler for CronScheduler {
    fn register(&mut self, name: &str, cron_expr: &str, action: JobAction) -> Result<JobHandle> {
        let schedule = parse_schedule(cron_expr)?;
        let mut job = Job {
            name: name.to_string(),
            schedule,
            action,
            next_run: None,
        };
        job.advance(&self.clock.now());

        let mut jobs = self.jobs.lock();
        let id = jobs.len();
        match job.next_run {
            Some(at) => eprintln!("[SNR-SCHED] registered {name} ({cron_expr}), next run {at}"),
            None => eprintln!("[SNR-SCHED] registered {name} ({cron_expr}), no upcoming run"),
        }
        jobs.push(job);
        Ok(JobHandle {
            id,
            name: name.to_string(),
        })
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_due_jobs(jobs: &Mutex<Vec<Job>>, clock: &dyn Clock, logger: &ActivityLoggerHandle) -> usize {
    let now = clock.now();
    let mut ran = 0;
    let mut jobs = jobs.lock();

    for job in jobs.iter_mut() {
        if !job.next_run.is_some_and(|at| at <= now) {
            continue;
        }

        let started = Instant::now();
        let outcome = (job.action)();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(()) => eprintln!("[SNR-SCHED] {} succeeded in {duration_ms}ms", job.name),
            Err(err) => eprintln!("[SNR-SCHED] {} failed: {err}", job.name),
        }
        logger.send(ActivityEvent::JobFinished {
            name: job.name.clone(),
            ok: outcome.is_ok(),
            duration_ms,
            error: outcome.err().map(|e| e.to_string()),
        });

        job.advance(&now);
        ran += 1;
    }
    ran
}
