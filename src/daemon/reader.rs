//! Reader loop: sole owner of the connection and of the reader-side buffer.
//!
//! Each iteration hands off completed frames, performs one blocking read, and
//! applies the buffer high-water/cap policy.

#![allow(missing_docs)]

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Sender, TrySendError};

use crate::core::config::Config;
use crate::core::errors::SnrError;
use crate::link::{LinkManager, LinkOpener};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::wire::{self, buffer::StreamBuffer};

/// Reader tuning taken from `[serial]` and `[parser]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    pub read_chunk_bytes: usize,
    pub high_water_bytes: usize,
    pub cap_bytes: usize,
}

impl ReaderSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_chunk_bytes: config.serial.read_chunk_bytes,
            high_water_bytes: config.parser.buffer_high_water_bytes,
            cap_bytes: config.parser.buffer_cap_bytes,
        }
    }
}

/// Totals over the reader's lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReaderStats {
    pub bytes_read: u64,
    pub handoffs: u64,
    pub handoff_bytes: u64,
    pub deferred_handoffs: u64,
    pub read_failures: u64,
    pub overflow_drops: u64,
    pub high_water: usize,
}

/// What a handoff attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// No complete frame buffered.
    Nothing,
    /// A prefix was sent and removed.
    Sent(usize),
    /// Channel full; the bytes stay and are retried next iteration.
    Deferred,
    /// Parser side is gone.
    Closed,
}

pub struct Reader<O: LinkOpener> {
    link: LinkManager<O>,
    buffer: StreamBuffer,
    handoff: Sender<Vec<u8>>,
    settings: ReaderSettings,
    shutdown: Arc<AtomicBool>,
    logger: ActivityLoggerHandle,
    above_high_water: bool,
    stats: ReaderStats,
}

impl<O: LinkOpener> Reader<O> {
    pub fn new(
        link: LinkManager<O>,
        handoff: Sender<Vec<u8>>,
        settings: ReaderSettings,
        shutdown: Arc<AtomicBool>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            link,
            buffer: StreamBuffer::with_capacity(settings.read_chunk_bytes),
            handoff,
            settings,
            shutdown,
            logger,
            above_high_water: false,
            stats: ReaderStats::default(),
        }
    }

    /// Run until shutdown or until the parser hangs up.
    pub fn run(mut self) -> ReaderStats {
        let port = self.link.describe();
        let Some(mut conn) = self.link.open() else {
            return self.finish();
        };
        let mut chunk = vec![0_u8; self.settings.read_chunk_bytes.max(1)];

        while !self.shutdown.load(Ordering::Relaxed) {
            if self.hand_off() == Handoff::Closed {
                let err = SnrError::ChannelClosed {
                    component: "reader",
                };
                eprintln!("[SNR-READER] {err}; stopping");
                self.logger.send(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return self.finish();
            }

            match conn.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.buffer.append(&chunk[..n]);
                    self.stats.bytes_read += n as u64;
                    self.apply_limits();
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    self.stats.read_failures += 1;
                    let err = SnrError::Link {
                        port: port.clone(),
                        details: source.to_string(),
                    };
                    eprintln!("[SNR-READER] {err}; reconnecting");
                    self.logger.send(ActivityEvent::LinkReadFailed {
                        port: port.clone(),
                        error: source.to_string(),
                    });
                    match self.link.open() {
                        Some(fresh) => conn = fresh,
                        None => break,
                    }
                }
            }
        }

        // Frames completed before shutdown still reach the parser.
        self.hand_off();
        self.finish()
    }

    /// Send everything through the last message close tag to the parser.
    pub fn hand_off(&mut self) -> Handoff {
        let Some(end) = wire::completed_len(&self.buffer) else {
            return Handoff::Nothing;
        };
        let Some(prefix) = self.buffer.slice(0..end) else {
            return Handoff::Nothing;
        };

        match self.handoff.try_send(prefix.to_vec()) {
            Ok(()) => {
                self.buffer.split_to(end);
                self.stats.handoffs += 1;
                self.stats.handoff_bytes += end as u64;
                Handoff::Sent(end)
            }
            Err(TrySendError::Full(_)) => {
                self.stats.deferred_handoffs += 1;
                Handoff::Deferred
            }
            Err(TrySendError::Disconnected(_)) => Handoff::Closed,
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    /// Append bytes as if they had been read from the link.
    pub fn ingest(&mut self, bytes: &[u8]) {
        self.buffer.append(bytes);
        self.stats.bytes_read += bytes.len() as u64;
        self.apply_limits();
    }

    fn apply_limits(&mut self) {
        let len = self.buffer.len();
        if len > self.settings.cap_bytes {
            let err = SnrError::BufferOverflow {
                len,
                cap: self.settings.cap_bytes,
            };
            let dropped = self.buffer.clear();
            self.stats.overflow_drops += 1;
            self.above_high_water = false;
            eprintln!("[SNR-READER] {err}; dropped {dropped} bytes");
            self.logger.send(ActivityEvent::BufferOverflow {
                component: "reader",
                dropped_bytes: dropped,
                cap: self.settings.cap_bytes,
            });
        } else if len > self.settings.high_water_bytes {
            if !self.above_high_water {
                self.above_high_water = true;
                eprintln!(
                    "[SNR-READER] buffer at {len} bytes, above high-water mark {}",
                    self.settings.high_water_bytes
                );
                self.logger.send(ActivityEvent::BufferHighWater {
                    component: "reader",
                    len,
                    threshold: self.settings.high_water_bytes,
                });
            }
        } else {
            self.above_high_water = false;
        }
    }

    fn finish(mut self) -> ReaderStats {
        self.stats.high_water = self.buffer.high_water();
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::Cursor;
    use std::time::Duration;

    struct Never;

    impl LinkOpener for Never {
        type Conn = Cursor<Vec<u8>>;

        fn open(&mut self) -> io::Result<Self::Conn> {
            Err(io::Error::other("unused"))
        }

        fn describe(&self) -> String {
            "never".to_string()
        }
    }

    /// Opens a cursor over fixed bytes; reads past the end return `Ok(0)`.
    struct Canned(Vec<u8>);

    impl LinkOpener for Canned {
        type Conn = Cursor<Vec<u8>>;

        fn open(&mut self) -> io::Result<Self::Conn> {
            Ok(Cursor::new(self.0.clone()))
        }

        fn describe(&self) -> String {
            "canned".to_string()
        }
    }

    fn reader(
        capacity: usize,
        settings: ReaderSettings,
    ) -> (
        Reader<Never>,
        crossbeam_channel::Receiver<Vec<u8>>,
        crossbeam_channel::Receiver<ActivityEvent>,
    ) {
        let (tx, rx) = bounded(capacity);
        let (logger, events) = ActivityLoggerHandle::channel(32);
        let shutdown = Arc::new(AtomicBool::new(false));
        let link = LinkManager::new(
            Never,
            Duration::from_millis(1),
            Arc::clone(&shutdown),
            logger.clone(),
        );
        (Reader::new(link, tx, settings, shutdown, logger), rx, events)
    }

    fn settings() -> ReaderSettings {
        ReaderSettings {
            read_chunk_bytes: 64,
            high_water_bytes: 1024,
            cap_bytes: 4096,
        }
    }

    #[test]
    fn hands_off_through_last_close_only() {
        let (mut r, rx, _events) = reader(4, settings());
        r.ingest(b"*d[1]d**t[2]t**s[start]s*\x01\x02*d[1]d**t[3]t**s[out");
        assert_eq!(r.hand_off(), Handoff::Sent(25));
        assert_eq!(rx.try_recv().unwrap(), b"*d[1]d**t[2]t**s[start]s*".to_vec());
        assert_eq!(r.buffer().as_slice(), b"\x01\x02*d[1]d**t[3]t**s[out");
        assert_eq!(r.hand_off(), Handoff::Nothing);
    }

    #[test]
    fn full_channel_defers_without_losing_bytes() {
        let (mut r, rx, _events) = reader(1, settings());
        r.ingest(b"*s[a]s*");
        assert_eq!(r.hand_off(), Handoff::Sent(7));
        r.ingest(b"*s[b]s*");
        assert_eq!(r.hand_off(), Handoff::Deferred);
        assert_eq!(r.buffer().len(), 7);

        rx.try_recv().unwrap();
        assert_eq!(r.hand_off(), Handoff::Sent(7));
        assert_eq!(rx.try_recv().unwrap(), b"*s[b]s*".to_vec());
    }

    #[test]
    fn disconnected_parser_closes_handoff() {
        let (mut r, rx, _events) = reader(1, settings());
        drop(rx);
        r.ingest(b"*s[a]s*");
        assert_eq!(r.hand_off(), Handoff::Closed);
    }

    #[test]
    fn high_water_warns_once_per_excursion() {
        let (mut r, _rx, events) = reader(
            1,
            ReaderSettings {
                read_chunk_bytes: 8,
                high_water_bytes: 4,
                cap_bytes: 100,
            },
        );
        r.ingest(b"12345");
        r.ingest(b"6");
        let warnings = events
            .try_iter()
            .filter(|e| matches!(e, ActivityEvent::BufferHighWater { .. }))
            .count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn cap_drops_buffer_and_alerts() {
        let (mut r, _rx, events) = reader(
            1,
            ReaderSettings {
                read_chunk_bytes: 8,
                high_water_bytes: 4,
                cap_bytes: 8,
            },
        );
        r.ingest(b"123456789");
        assert!(r.buffer().is_empty());
        assert_eq!(r.buffer().high_water(), 9);
        assert!(events.try_iter().any(|e| matches!(
            e,
            ActivityEvent::BufferOverflow {
                component: "reader",
                dropped_bytes: 9,
                ..
            }
        )));
    }

    #[test]
    fn run_stops_with_channel_closed_when_parser_is_gone() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let (logger, events) = ActivityLoggerHandle::channel(32);
        let shutdown = Arc::new(AtomicBool::new(false));
        let link = LinkManager::new(
            Canned(b"*s[a]s*".to_vec()),
            Duration::from_millis(1),
            Arc::clone(&shutdown),
            logger.clone(),
        );

        let stats = Reader::new(link, tx, settings(), shutdown, logger).run();
        assert_eq!(stats.bytes_read, 7);
        assert!(events.try_iter().any(|e| matches!(
            e,
            ActivityEvent::Error { ref code, ref message }
                if code == "SNR-3003" && message.contains("reader")
        )));
    }
}
