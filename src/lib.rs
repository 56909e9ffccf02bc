#![forbid(unsafe_code)]

//! Serial-number collector (snrd) for banknote counting devices.
//!
//! The device streams tagged text frames and raw bitmap payloads over a
//! serial link. The collector:
//! 1. **Reads** the link on its own thread, reconnecting forever, and hands
//!    every completed range of frames to the parser.
//! 2. **Parses** status frames into per-day logs and note batches into an INI
//!    metadata file plus one bitmap per note.
//! 3. **Sweeps** expired image directories and logs on cron schedules.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use snr_collector::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use snr_collector::core::config::Config;
//! use snr_collector::parser::FrameParser;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod link;
pub mod logger;
pub mod parser;
pub mod retention;
pub mod wire;
