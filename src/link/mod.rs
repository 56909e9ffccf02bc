//! Link manager: opens the device connection and keeps retrying until it
//! succeeds or a shutdown is requested.
//!
//! The transport itself sits behind [`LinkOpener`] so the reader can be driven
//! by a serial port in production and by scripted connections in tests.

#![allow(missing_docs)]

#[cfg(feature = "serial")]
pub mod serial;

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Granularity of the retry sleep; bounds how long a shutdown can go unnoticed.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Something that can produce a fresh connection to the device.
pub trait LinkOpener: Send {
    type Conn: Read + Send;

    fn open(&mut self) -> io::Result<Self::Conn>;

    /// Human-readable endpoint name for logs (port name, file path, ...).
    fn describe(&self) -> String;
}

/// Retry-forever connection manager.
pub struct LinkManager<O: LinkOpener> {
    opener: O,
    retry_delay: Duration,
    shutdown: Arc<AtomicBool>,
    logger: ActivityLoggerHandle,
    total_attempts: u64,
}

impl<O: LinkOpener> LinkManager<O> {
    pub fn new(
        opener: O,
        retry_delay: Duration,
        shutdown: Arc<AtomicBool>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            opener,
            retry_delay,
            shutdown,
            logger,
            total_attempts: 0,
        }
    }

    /// Endpoint name of the underlying opener.
    pub fn describe(&self) -> String {
        self.opener.describe()
    }

    /// Open attempts made over the lifetime of this manager.
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Block until a connection is open.
    ///
    /// Every failed attempt is logged and followed by the fixed retry delay.
    /// Returns `None` only when shutdown was requested before a connection
    /// could be made.
    pub fn open(&mut self) -> Option<O::Conn> {
        let port = self.opener.describe();
        let mut attempt: u64 = 0;

        loop {
            if self.shutdown_requested() {
                return None;
            }

            attempt += 1;
            self.total_attempts += 1;

            match self.opener.open() {
                Ok(conn) => {
                    eprintln!("[SNR-LINK] connected to {port} after {attempt} attempt(s)");
                    self.logger.send(ActivityEvent::LinkConnected {
                        port,
                        attempts: attempt,
                    });
                    return Some(conn);
                }
                Err(err) => {
                    eprintln!(
                        "[SNR-LINK] open {port} failed (attempt {attempt}): {err}; retrying in {}ms",
                        self.retry_delay.as_millis()
                    );
                    self.logger.send(ActivityEvent::LinkOpenFailed {
                        port: port.clone(),
                        attempt,
                        error: err.to_string(),
                    });
                    if !self.pause() {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the retry delay in short slices. Returns `false` if shutdown
    /// was requested meanwhile.
    fn pause(&self) -> bool {
        let mut remaining = self.retry_delay;
        while !remaining.is_zero() {
            if self.shutdown_requested() {
                return false;
            }
            let step = remaining.min(SLEEP_SLICE);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        !self.shutdown_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::time::Instant;

    struct Scripted {
        outcomes: VecDeque<bool>,
    }

    impl LinkOpener for Scripted {
        type Conn = Cursor<Vec<u8>>;

        fn open(&mut self) -> io::Result<Self::Conn> {
            match self.outcomes.pop_front() {
                Some(true) => Ok(Cursor::new(b"ok".to_vec())),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "no such port")),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn retries_until_open_succeeds() {
        let (logger, rx) = ActivityLoggerHandle::channel(16);
        let opener = Scripted {
            outcomes: VecDeque::from([false, false, true]),
        };
        let mut link = LinkManager::new(
            opener,
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
            logger,
        );

        let mut conn = link.open().unwrap();
        let mut got = String::new();
        conn.read_to_string(&mut got).unwrap();
        assert_eq!(got, "ok");
        assert_eq!(link.total_attempts(), 3);

        let events: Vec<_> = rx.try_iter().collect();
        let failures = events
            .iter()
            .filter(|e| matches!(e, ActivityEvent::LinkOpenFailed { .. }))
            .count();
        assert_eq!(failures, 2);
        assert!(matches!(
            events.last(),
            Some(ActivityEvent::LinkConnected { attempts: 3, .. })
        ));
    }

    #[test]
    fn shutdown_unblocks_retry_sleep() {
        let (logger, _rx) = ActivityLoggerHandle::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let opener = Scripted {
            outcomes: VecDeque::new(),
        };
        let mut link = LinkManager::new(
            opener,
            Duration::from_secs(30),
            Arc::clone(&shutdown),
            logger,
        );

        let flag = Arc::clone(&shutdown);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Relaxed);
        });

        let started = Instant::now();
        assert!(link.open().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn no_attempt_after_shutdown() {
        let (logger, _rx) = ActivityLoggerHandle::channel(4);
        let opener = Scripted {
            outcomes: VecDeque::from([true]),
        };
        let mut link = LinkManager::new(
            opener,
            Duration::from_millis(1),
            Arc::new(AtomicBool::new(true)),
            logger,
        );
        assert!(link.open().is_none());
        assert_eq!(link.total_attempts(), 0);
    }
}
