//! Note batch extraction.
//!
//! A batch starts with the `*d{..}d**t{..}t*` preamble and holds one record per
//! note: `*no{seq}no**bn{serial}bn*<bitmap>`. A bitmap ends where the next
//! note's sequence tag starts, or at the end of the batch for the last note.
//! The batch ends at the next preamble or at the end of the buffer.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::core::errors::{Result, SnrError};
use crate::core::paths::{self, open_with_parents, resolve_absolute_path};
use crate::parser::ini::IniWriter;
use crate::parser::state::DayCounter;
use crate::wire::buffer::StreamBuffer;
use crate::wire::tags::{
    self, INFO_DATE_OPEN, INFO_SEQ_CLOSE, INFO_SEQ_OPEN, INFO_SERIAL_CLOSE, INFO_SERIAL_OPEN,
    INFO_TIME_CLOSE, TagSpan,
};

/// One extracted note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    pub index: usize,
    pub sequence_id: String,
    pub serial: String,
    pub payload: Vec<u8>,
}

/// Artifacts of one written batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_index: u32,
    pub note_count: usize,
    pub ini_path: PathBuf,
    pub images: Vec<PathBuf>,
}

/// Where a batch's output goes.
#[derive(Debug, Clone, Copy)]
pub struct BatchTarget<'a> {
    pub ini_path: &'a Path,
    pub image_root: &'a Path,
    pub operation_time: &'a DateTime<Local>,
}

/// Extent of the first batch in the buffer.
struct BatchLayout {
    preamble: TagSpan,
    note_count: usize,
}

/// Number of note records from the first batch preamble on. Records ahead of
/// every preamble cannot form a batch and are not counted.
#[must_use]
pub fn pending_notes(buffer: &StreamBuffer) -> usize {
    buffer
        .find(INFO_DATE_OPEN)
        .and_then(|start| buffer.slice(start..buffer.len()))
        .map_or(0, |tail| tags::count(tail, INFO_SEQ_CLOSE))
}

/// Extract and persist the first batch in `buffer`.
///
/// Returns `Ok(None)` when the buffer holds no note records at all. Records
/// with no preamble ahead of them are corrupt. On error the
/// caller is expected to drop the buffer; files written before the failure are
/// left in place.
pub fn extract_batch(
    buffer: &mut StreamBuffer,
    counter: &mut DayCounter,
    target: BatchTarget<'_>,
) -> Result<Option<BatchReport>> {
    if buffer.count(INFO_SEQ_CLOSE) == 0 {
        return Ok(None);
    }
    let layout = locate_batch(buffer)?;

    let batch_index = counter.next_batch();
    let dir = paths::batch_dir(target.image_root, counter.day(), batch_index);
    fs::create_dir_all(&dir).map_err(|source| SnrError::io(&dir, source))?;

    let mut ini = IniWriter::create(target.ini_path, layout.note_count, target.operation_time)?;
    buffer.remove(layout.preamble.outer.clone());

    let mut images = Vec::with_capacity(layout.note_count);
    let mut taken = HashSet::with_capacity(layout.note_count);
    for index in 0..layout.note_count {
        ini.begin_note(index)?;
        let is_last = index + 1 == layout.note_count;
        let note = take_note(buffer, index, is_last, layout.preamble.outer.start)?;
        ini.serial_number(&note.serial)?;

        let image = paths::image_path(&dir, &image_stem(&note, &mut taken));
        write_image(&image, &note.payload)?;
        let absolute = resolve_absolute_path(&image);
        ini.image_file(&absolute)?;
        images.push(absolute);
    }
    let ini_path = ini.finish()?;

    Ok(Some(BatchReport {
        batch_index,
        note_count: layout.note_count,
        ini_path,
        images,
    }))
}

fn locate_batch(buffer: &StreamBuffer) -> Result<BatchLayout> {
    let preamble = buffer
        .find_pair(INFO_DATE_OPEN, INFO_TIME_CLOSE)
        .ok_or_else(|| SnrError::corrupt("note records without a batch preamble"))?;
    let end = buffer
        .find_from(INFO_DATE_OPEN, preamble.outer.end)
        .unwrap_or(buffer.len());
    let note_count = buffer
        .slice(preamble.outer.end..end)
        .map_or(0, |body| tags::count(body, INFO_SEQ_CLOSE));
    if note_count == 0 {
        return Err(SnrError::corrupt("batch preamble without note records"));
    }
    Ok(BatchLayout {
        preamble,
        note_count,
    })
}

/// Remove the next note record from the buffer. `batch_start` is where the
/// preamble was, so the search stays inside the current batch.
fn take_note(
    buffer: &mut StreamBuffer,
    index: usize,
    is_last: bool,
    batch_start: usize,
) -> Result<NoteRecord> {
    let seq = tags::find_pair(buffer.as_slice(), INFO_SEQ_OPEN, INFO_SEQ_CLOSE, batch_start)
        .ok_or_else(|| SnrError::corrupt(format!("note {index}: sequence tag missing")))?;
    let sequence_id = text_of(buffer, &seq);
    buffer.remove(seq.outer);

    let serial_span =
        tags::find_pair(buffer.as_slice(), INFO_SERIAL_OPEN, INFO_SERIAL_CLOSE, batch_start)
            .ok_or_else(|| SnrError::corrupt(format!("note {index}: serial tag missing")))?;
    let serial = text_of(buffer, &serial_span);
    buffer.remove(serial_span.outer.clone());
    let payload_start = serial_span.outer.start;

    let payload_end = if is_last {
        buffer
            .find_from(INFO_DATE_OPEN, payload_start)
            .unwrap_or(buffer.len())
    } else {
        let next = tags::next_sequence_tag(&sequence_id).ok_or_else(|| {
            SnrError::corrupt(format!("note {index}: non-numeric sequence id {sequence_id:?}"))
        })?;
        buffer.find_from(&next, payload_start).ok_or_else(|| {
            SnrError::corrupt(format!(
                "note {index}: next sequence tag {} missing",
                String::from_utf8_lossy(&next)
            ))
        })?
    };
    let payload = buffer.remove(payload_start..payload_end);

    Ok(NoteRecord {
        index,
        sequence_id,
        serial,
        payload,
    })
}

/// Bitmap file stem for a note: the serial number, unless it is blank or
/// already used in this batch, in which case the sequence id is appended.
fn image_stem(note: &NoteRecord, taken: &mut HashSet<String>) -> String {
    let serial = paths::sanitize_file_stem(&note.serial);
    let seq = paths::sanitize_file_stem(&note.sequence_id);
    let mut stem = if note.serial.is_empty() {
        seq.clone()
    } else {
        serial.clone()
    };
    if taken.contains(&stem) {
        stem = format!("{serial}_{seq}");
    }
    while taken.contains(&stem) {
        stem = format!("{stem}_{}", note.index);
    }
    taken.insert(stem.clone());
    stem
}

fn text_of(buffer: &StreamBuffer, span: &TagSpan) -> String {
    buffer
        .slice(span.inner.clone())
        .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
        .unwrap_or_default()
}

fn write_image(path: &Path, payload: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    let mut file = open_with_parents(path, &options)?;
    file.write_all(payload)
        .and_then(|()| file.flush())
        .map_err(|source| SnrError::io(path, source))
}
