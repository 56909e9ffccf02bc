//! Wire format: tag grammar, stream buffer, and the reader-to-parser handoff split.

pub mod buffer;
pub mod tags;

use crate::wire::buffer::StreamBuffer;
use crate::wire::tags::MESSAGE_CLOSE;

/// Detach everything up to and including the last message close tag.
///
/// Bytes after the last close tag (a frame still arriving) stay in `buffer`.
/// Returns `None` when no complete frame is present.
pub fn take_completed(buffer: &mut StreamBuffer) -> Option<Vec<u8>> {
    let end = completed_len(buffer)?;
    Some(buffer.split_to(end))
}

/// Length of the prefix that [`take_completed`] would detach.
#[must_use]
pub fn completed_len(buffer: &StreamBuffer) -> Option<usize> {
    buffer.rfind(MESSAGE_CLOSE).map(|pos| pos + MESSAGE_CLOSE.len())
}
