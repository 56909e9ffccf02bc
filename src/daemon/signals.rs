//! Signal handling: SIGTERM/SIGINT request a graceful shutdown.
//!
//! Uses the `signal-hook` crate for safe signal registration. Workers poll the
//! shared flag rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Shutdown flag shared between the signal hooks and every worker.
///
/// `Ordering::Relaxed` is enough: workers poll the flag every iteration and
/// nothing else is published through it.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM/SIGINT.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// A handler that only reacts to [`SignalHandler::request_shutdown`].
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Programmatically request shutdown (fatal worker error, tests).
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// The raw flag, for workers that only need to observe it.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SNR-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SNR-SIGNAL] failed to register SIGINT: {e}");
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── shutdown coordinator ────────────────────

/// A named shutdown step. Returns `true` when it completed cleanly.
pub type ShutdownTask<'a> = (&'a str, Box<dyn FnOnce() -> bool + 'a>);

/// Runs shutdown steps in order, giving up once the timeout is spent.
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default 30-second timeout.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    /// Execute the steps. Returns `true` if all of them completed within the
    /// timeout.
    pub fn execute(&self, tasks: Vec<ShutdownTask<'_>>) -> bool {
        let start = Instant::now();
        let mut all_ok = true;

        for (name, task) in tasks {
            if start.elapsed() > self.timeout {
                eprintln!("[SNR-SHUTDOWN] timeout reached, abandoning remaining tasks");
                return false;
            }

            if task() {
                eprintln!("[SNR-SHUTDOWN] {name}: ok");
            } else {
                eprintln!("[SNR-SHUTDOWN] {name}: failed");
                all_ok = false;
            }
        }

        all_ok
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── tests ────────────────────
