//! Append-only, front-truncatable byte buffer holding unparsed wire data.
//!
//! Bytes enter only at the tail ([`StreamBuffer::append`]) and leave by
//! splicing out a matched span ([`StreamBuffer::remove`]) or detaching a prefix
//! ([`StreamBuffer::split_to`]). Offsets returned by the scanning methods are
//! only valid until the next removal.

use std::ops::Range;

use crate::wire::tags;

/// Owned stream buffer with a high-water mark.
#[derive(Debug, Default, Clone)]
pub struct StreamBuffer {
    data: Vec<u8>,
    high_water: usize,
}

impl StreamBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            high_water: 0,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.high_water = self.high_water.max(self.data.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Largest length this buffer has reached.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn contains(&self, tag: &[u8]) -> bool {
        tags::find(&self.data, tag).is_some()
    }

    #[must_use]
    pub fn find(&self, tag: &[u8]) -> Option<usize> {
        tags::find(&self.data, tag)
    }

    #[must_use]
    pub fn find_from(&self, tag: &[u8], from: usize) -> Option<usize> {
        tags::find_from(&self.data, tag, from)
    }

    #[must_use]
    pub fn rfind(&self, tag: &[u8]) -> Option<usize> {
        tags::rfind(&self.data, tag)
    }

    #[must_use]
    pub fn count(&self, tag: &[u8]) -> usize {
        tags::count(&self.data, tag)
    }

    #[must_use]
    pub fn find_pair(&self, open: &[u8], close: &[u8]) -> Option<tags::TagSpan> {
        tags::find_pair(&self.data, open, close, 0)
    }

    /// Borrow a span; out-of-range spans yield `None`.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
        self.data.get(range)
    }

    /// Splice out `range`, returning the removed bytes.
    ///
    /// The range is clamped to the buffer; an empty or inverted range removes
    /// nothing.
    pub fn remove(&mut self, range: Range<usize>) -> Vec<u8> {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        self.data.drain(start..end).collect()
    }

    /// Detach and return the first `end` bytes.
    pub fn split_to(&mut self, end: usize) -> Vec<u8> {
        let end = end.min(self.data.len());
        let tail = self.data.split_off(end);
        std::mem::replace(&mut self.data, tail)
    }

    /// Drop everything, returning how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.data.len();
        self.data.clear();
        dropped
    }
}
