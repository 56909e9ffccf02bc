//! Retention: date-based sweeps of the image and log roots, driven by cron.

pub mod scheduler;
pub mod sweeper;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::retention::scheduler::{JobHandle, Scheduler};
use crate::retention::sweeper::SweepReport;

pub const IMAGE_JOB: &str = "image_retention";
pub const LOG_JOB: &str = "log_retention";

/// Which tree a sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTarget {
    Images,
    Logs,
}

impl SweepTarget {
    #[must_use]
    pub const fn job_name(self) -> &'static str {
        match self {
            Self::Images => IMAGE_JOB,
            Self::Logs => LOG_JOB,
        }
    }

    fn root(self, config: &Config) -> &Path {
        match self {
            Self::Images => &config.output.image_root,
            Self::Logs => &config.output.log_root,
        }
    }

    fn keep(self, config: &Config) -> chrono::Duration {
        match self {
            Self::Images => config.retention.image_keep(),
            Self::Logs => config.retention.log_keep(),
        }
    }

    fn cron(self, config: &Config) -> &str {
        match self {
            Self::Images => &config.retention.image_sweep_cron,
            Self::Logs => &config.retention.log_sweep_cron,
        }
    }
}

/// Run one sweep now and report every entry to the activity log.
pub fn run_sweep(
    target: SweepTarget,
    config: &Config,
    clock: &dyn Clock,
    logger: &ActivityLoggerHandle,
) -> Result<SweepReport> {
    let root = target.root(config);
    let keep = target.keep(config);
    let now = clock.now();
    let report = match target {
        SweepTarget::Images => sweeper::sweep_images(root, keep, &now),
        SweepTarget::Logs => sweeper::sweep_logs(root, keep, &now),
    }?;

    let job = target.job_name();
    for path in &report.removed {
        logger.send(ActivityEvent::SweepEntryRemoved {
            job,
            path: path.clone(),
        });
    }
    for (path, reason) in report.skipped.iter().chain(report.failed.iter()) {
        logger.send(ActivityEvent::SweepEntrySkipped {
            job,
            path: path.clone(),
            reason: reason.clone(),
        });
    }
    eprintln!(
        "[SNR-SWEEP] {job}: removed {} kept {} skipped {} failed {} under {}",
        report.removed.len(),
        report.kept,
        report.skipped.len(),
        report.failed.len(),
        root.display()
    );
    logger.send(ActivityEvent::SweepCompleted {
        job,
        root: PathBuf::from(root),
        removed: report.removed.len(),
        skipped: report.skipped.len(),
        failed: report.failed.len(),
    });
    Ok(report)
}

/// Register the image and log retention jobs on `scheduler`.
pub fn register_jobs<S: Scheduler>(
    scheduler: &mut S,
    config: &Arc<Config>,
    clock: &Arc<dyn Clock>,
    logger: &ActivityLoggerHandle,
) -> Result<Vec<JobHandle>> {
    [SweepTarget::Images, SweepTarget::Logs]
        .into_iter()
        .map(|target| {
            let cron = target.cron(config).to_string();
            let config = Arc::clone(config);
            let clock = Arc::clone(clock);
            let logger = logger.clone();
            scheduler.register(
                target.job_name(),
                &cron,
                Box::new(move || {
                    run_sweep(target, &config, clock.as_ref(), &logger).map(|_| ())
                }),
            )
        })
        .collect()
}
