//! Core types: errors, configuration, clock, output layout.

pub mod clock;
pub mod config;
pub mod errors;
pub mod paths;
