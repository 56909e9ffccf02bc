//! Tag grammar of the counting device's wire format.
//!
//! Status frames: `*d[<date>]d**t[<time>]t**s[<text>]s*`
//! Note batches: `*d{<date>}d**t{<time>}t*` then, per note,
//! `*no{<seq>}no**bn{<serial>}bn*<bitmap bytes>`.
//! A transaction ends with the status frame whose text is `output_end`.

use std::ops::Range;

use memchr::memmem;

/// End-of-transaction marker.
pub const MESSAGE_END: &[u8] = b"*s[output_end]s*";
/// Start-of-transaction marker.
pub const MESSAGE_BEGIN: &[u8] = b"*s[start]s*";
pub const MESSAGE_OPEN: &[u8] = b"*s[";
/// Closes every status frame, including [`MESSAGE_END`].
pub const MESSAGE_CLOSE: &[u8] = b"]s*";

pub const STATUS_DATE_OPEN: &[u8] = b"*d[";
pub const STATUS_DATE_CLOSE: &[u8] = b"]d*";
pub const STATUS_TIME_OPEN: &[u8] = b"*t[";
pub const STATUS_TIME_CLOSE: &[u8] = b"]t*";

pub const INFO_DATE_OPEN: &[u8] = b"*d{";
pub const INFO_DATE_CLOSE: &[u8] = b"}d*";
pub const INFO_TIME_OPEN: &[u8] = b"*t{";
pub const INFO_TIME_CLOSE: &[u8] = b"}t*";
pub const INFO_SEQ_OPEN: &[u8] = b"*no{";
pub const INFO_SEQ_CLOSE: &[u8] = b"}no*";
pub const INFO_SERIAL_OPEN: &[u8] = b"*bn{";
pub const INFO_SERIAL_CLOSE: &[u8] = b"}bn*";

/// Leftmost occurrence of `tag` in `haystack`.
pub fn find(haystack: &[u8], tag: &[u8]) -> Option<usize> {
    memmem::find(haystack, tag)
}

/// Leftmost occurrence of `tag` at or after `from`.
pub fn find_from(haystack: &[u8], tag: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)
        .and_then(|tail| memmem::find(tail, tag))
        .map(|pos| pos + from)
}

/// Rightmost occurrence of `tag` in `haystack`.
pub fn rfind(haystack: &[u8], tag: &[u8]) -> Option<usize> {
    memmem::rfind(haystack, tag)
}

/// Non-overlapping occurrences of `tag`.
pub fn count(haystack: &[u8], tag: &[u8]) -> usize {
    if tag.is_empty() {
        return 0;
    }
    memmem::find_iter(haystack, tag).count()
}

/// Location of one `open … close` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpan {
    /// Whole span, both tags included.
    pub outer: Range<usize>,
    /// Content between the tags.
    pub inner: Range<usize>,
}

/// Leftmost `open` at or after `from`, and the first `close` after it.
pub fn find_pair(haystack: &[u8], open: &[u8], close: &[u8], from: usize) -> Option<TagSpan> {
    let start = find_from(haystack, open, from)?;
    let inner_start = start + open.len();
    let inner_end = find_from(haystack, close, inner_start)?;
    Some(TagSpan {
        outer: start..inner_end + close.len(),
        inner: inner_start..inner_end,
    })
}

/// Build `open + content + close`.
pub fn wrap(open: &[u8], content: &[u8], close: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(open.len() + content.len() + close.len());
    out.extend_from_slice(open);
    out.extend_from_slice(content);
    out.extend_from_slice(close);
    out
}

/// The sequence tag of the note after `current`, keeping the zero-padding
/// width of `current` (`"09"` → `*no{10}no*`, `"007"` → `*no{008}no*`).
pub fn next_sequence_tag(current: &str) -> Option<Vec<u8>> {
    let value: u64 = current.trim().parse().ok()?;
    let width = current.trim().len().max(2);
    let next = format!("{:0width$}", value.checked_add(1)?);
    Some(wrap(INFO_SEQ_OPEN, next.as_bytes(), INFO_SEQ_CLOSE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_non_overlapping() {
        assert_eq!(count(b"]s*]s*xx]s*", MESSAGE_CLOSE), 3);
        assert_eq!(count(b"", MESSAGE_CLOSE), 0);
        assert_eq!(count(b"aaaa", b"aa"), 2);
    }

    #[test]
    fn end_marker_counts_as_message_close() {
        assert_eq!(count(MESSAGE_END, MESSAGE_CLOSE), 1);
        assert_eq!(count(MESSAGE_BEGIN, MESSAGE_CLOSE), 1);
    }

    #[test]
    fn find_from_respects_offset() {
        let hay = b"*no{01}no*....*no{02}no*";
        assert_eq!(find_from(hay, INFO_SEQ_OPEN, 0), Some(0));
        assert_eq!(find_from(hay, INFO_SEQ_OPEN, 1), Some(14));
        assert_eq!(find_from(hay, INFO_SEQ_OPEN, 100), None);
    }

    #[test]
    fn find_pair_reports_inner_and_outer() {
        let hay = b"xx*bn{ABC123}bn*yy";
        let span = find_pair(hay, INFO_SERIAL_OPEN, INFO_SERIAL_CLOSE, 0).unwrap();
        assert_eq!(&hay[span.inner.clone()], b"ABC123");
        assert_eq!(&hay[span.outer.clone()], b"*bn{ABC123}bn*");
    }

    #[test]
    fn find_pair_requires_close_after_open() {
        assert!(find_pair(b"}bn*ABC*bn{", INFO_SERIAL_OPEN, INFO_SERIAL_CLOSE, 0).is_none());
    }

    #[test]
    fn next_sequence_tag_keeps_width() {
        assert_eq!(next_sequence_tag("01").unwrap(), b"*no{02}no*".to_vec());
        assert_eq!(next_sequence_tag("09").unwrap(), b"*no{10}no*".to_vec());
        assert_eq!(next_sequence_tag("99").unwrap(), b"*no{100}no*".to_vec());
        assert_eq!(next_sequence_tag("007").unwrap(), b"*no{008}no*".to_vec());
        assert_eq!(next_sequence_tag("3").unwrap(), b"*no{04}no*".to_vec());
        assert!(next_sequence_tag("x1").is_none());
    }
}
