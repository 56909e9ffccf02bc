//! Status frame extraction: `*d[..]d**t[..]t**s[..]s*` spans are appended to
//! the day log and spliced out of the buffer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, SnrError};
use crate::core::paths::open_with_parents;
use crate::parser::ini::LINE_BREAK;
use crate::wire::buffer::StreamBuffer;
use crate::wire::tags::{self, MESSAGE_CLOSE, MESSAGE_OPEN, STATUS_DATE_OPEN};

/// What one extraction pass did.
#[derive(Debug, Default)]
pub struct StatusOutcome {
    /// Frames appended to the day log.
    pub logged: Vec<Vec<u8>>,
    /// Orphan frames (close tag without a status date before it) removed.
    pub corrupt: Vec<Vec<u8>>,
    /// Complete frames removed without reaching the day log.
    pub unlogged: Vec<Vec<u8>>,
    /// Why the day log could not be opened or written this pass.
    pub log_error: Option<SnrError>,
}

impl StatusOutcome {
    #[must_use]
    pub fn dropped_bytes(&self) -> usize {
        self.corrupt
            .iter()
            .chain(&self.unlogged)
            .map(Vec::len)
            .sum()
    }
}

/// Extract every status frame in `buffer` into `log_path`.
///
/// The log file is only opened when at least one close tag is present, so a
/// buffer without frames causes no filesystem access. When the log cannot be
/// opened or written, the remaining frames are still spliced out (into
/// [`StatusOutcome::unlogged`]) so note data behind them stays parseable.
pub fn extract_status_frames(buffer: &mut StreamBuffer, log_path: &Path) -> StatusOutcome {
    let mut outcome = StatusOutcome::default();
    let frames = buffer.count(MESSAGE_CLOSE);
    if frames == 0 {
        return outcome;
    }

    let mut log = match DayLog::open(log_path) {
        Ok(log) => Some(log),
        Err(err) => {
            outcome.log_error = Some(err);
            None
        }
    };
    for _ in 0..frames {
        let Some(close) = buffer.find(MESSAGE_CLOSE) else {
            break;
        };
        let end = close + MESSAGE_CLOSE.len();

        let Some(start) = buffer.find(STATUS_DATE_OPEN).filter(|&start| start < close) else {
            let head = buffer.slice(0..close).unwrap_or_default();
            let start = tags::rfind(head, MESSAGE_OPEN).unwrap_or(close);
            outcome.corrupt.push(buffer.remove(start..end));
            continue;
        };
        let frame = buffer.remove(start..end);
        match log.as_mut().map(|log| log.append(&frame)) {
            Some(Ok(())) => outcome.logged.push(frame),
            Some(Err(err)) => {
                outcome.log_error = Some(err);
                outcome.unlogged.push(frame);
                log = None;
            }
            None => outcome.unlogged.push(frame),
        }
    }
    if let Some(log) = log
        && let Err(err) = log.close()
    {
        // Buffered lines never reached the file.
        outcome.unlogged.append(&mut outcome.logged);
        outcome.log_error = Some(err);
    }
    outcome
}

struct DayLog {
    out: BufWriter<File>,
    path: PathBuf,
}

impl DayLog {
    fn open(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        let file = open_with_parents(path, &options)?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    fn append(&mut self, frame: &[u8]) -> Result<()> {
        self.out
            .write_all(frame)
            .and_then(|()| self.out.write_all(LINE_BREAK.as_bytes()))
            .map_err(|source| SnrError::io(&self.path, source))
    }

    fn close(mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|source| SnrError::io(&self.path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &[u8] = b"*d[20240309]d**t[10:00:00]t**s[start]s*";
    const END: &[u8] = b"*d[20240309]d**t[10:00:05]t**s[output_end]s*";

    #[test]
    fn single_frame_becomes_one_log_line() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("logs").join("20240309.log");
        let mut buf = StreamBuffer::new();
        buf.append(START);

        let outcome = extract_status_frames(&mut buf, &log_path);
        assert_eq!(outcome.logged.len(), 1);
        assert!(buf.is_empty());

        let text = std::fs::read(&log_path).unwrap();
        let mut expected = START.to_vec();
        expected.extend_from_slice(b"\r\n");
        assert_eq!(text, expected);
    }

    #[test]
    fn frames_around_note_data_leave_notes_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("20240309.log");
        let mut buf = StreamBuffer::new();
        buf.append(START);
        buf.append(b"*d{20240309}d**t{10:00:01}t**no{01}no**bn{A1}bn*\x01");
        buf.append(END);

        let outcome = extract_status_frames(&mut buf, &log_path);
        assert_eq!(outcome.logged, vec![START.to_vec(), END.to_vec()]);
        assert_eq!(
            buf.as_slice(),
            b"*d{20240309}d**t{10:00:01}t**no{01}no**bn{A1}bn*\x01"
        );

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn orphan_close_tag_is_dropped_as_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("20240309.log");
        let mut buf = StreamBuffer::new();
        buf.append(b"garbage*s[lost]s*");
        buf.append(START);

        let outcome = extract_status_frames(&mut buf, &log_path);
        assert_eq!(outcome.corrupt, vec![b"*s[lost]s*".to_vec()]);
        assert_eq!(outcome.logged, vec![START.to_vec()]);
        assert_eq!(buf.as_slice(), b"garbage");
    }

    #[test]
    fn no_close_tag_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("20240309.log");
        let mut buf = StreamBuffer::new();
        buf.append(b"*d[20240309]d**t[10:00");

        let outcome = extract_status_frames(&mut buf, &log_path);
        assert!(outcome.logged.is_empty() && outcome.corrupt.is_empty());
        assert!(outcome.log_error.is_none());
        assert_eq!(buf.as_slice(), b"*d[20240309]d**t[10:00");
        assert!(!log_path.exists());
    }

    #[test]
    fn unopenable_log_still_splices_frames_out() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the log directory should be.
        let blocker = tmp.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let log_path = blocker.join("20240309.log");
        let mut buf = StreamBuffer::new();
        buf.append(START);
        buf.append(b"*d{20240309}d**t{10:00:01}t**no{01}no**bn{A1}bn*\x01");
        buf.append(END);

        let outcome = extract_status_frames(&mut buf, &log_path);
        assert!(matches!(outcome.log_error, Some(SnrError::Io { .. })));
        assert!(outcome.logged.is_empty());
        assert_eq!(outcome.unlogged, vec![START.to_vec(), END.to_vec()]);
        assert_eq!(outcome.dropped_bytes(), START.len() + END.len());
        assert_eq!(
            buf.as_slice(),
            b"*d{20240309}d**t{10:00:01}t**no{01}no**bn{A1}bn*\x01"
        );
    }
}
