//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use snr_collector::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SnrError};

// Wire
pub use crate::wire::buffer::StreamBuffer;
pub use crate::wire::take_completed;

// Link
pub use crate::link::{LinkManager, LinkOpener};

// Parser
pub use crate::parser::notes::BatchReport;
pub use crate::parser::{CycleReport, FrameParser, ReplaySummary, replay, run_parser};

// Reader
pub use crate::daemon::reader::{Reader, ReaderSettings};

// Retention
pub use crate::retention::scheduler::{CronScheduler, Scheduler};
pub use crate::retention::sweeper::{SweepReport, sweep_images, sweep_logs};
pub use crate::retention::{SweepTarget, run_sweep};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
