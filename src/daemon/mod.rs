//! Collector runtime: the reader worker, signal handling, and the service
//! that wires the workers together.

pub mod reader;
#[cfg(feature = "daemon")]
pub mod service;
#[cfg(feature = "daemon")]
pub mod signals;
