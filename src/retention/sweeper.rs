//! Date-named retention sweeps over the image and log roots.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};

use crate::core::errors::{Result, SnrError};
use crate::core::paths::parse_day;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub root: PathBuf,
    pub removed: Vec<PathBuf>,
    /// Entries left alone because their name is not a date or their type
    /// does not match the sweep.
    pub skipped: Vec<(PathBuf, String)>,
    /// Entries that qualified but could not be deleted.
    pub failed: Vec<(PathBuf, String)>,
    /// Entries inside the retention window.
    pub kept: usize,
}

/// Whether something dated `day` has outlived `keep` at `now`.
#[must_use]
pub fn is_expired(day: NaiveDate, keep: chrono::Duration, now: &DateTime<Local>) -> bool {
    day.and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.checked_add_signed(keep))
        .is_some_and(|expiry| now.naive_local() > expiry)
}

/// Remove `YYYYMMDD` subdirectories of `root` older than `keep`.
pub fn sweep_images(root: &Path, keep: chrono::Duration, now: &DateTime<Local>) -> Result<SweepReport> {
    sweep(root, keep, now, EntryKind::DayDirectory)
}

/// Remove files in `root` whose name starts with an expired `YYYYMMDD`.
pub fn sweep_logs(root: &Path, keep: chrono::Duration, now: &DateTime<Local>) -> Result<SweepReport> {
    sweep(root, keep, now, EntryKind::DayFile)
}

#[derive(Debug, Clone, Copy)]
enum EntryKind {
    DayDirectory,
    DayFile,
}

fn sweep(
    root: &Path,
    keep: chrono::Duration,
    now: &DateTime<Local>,
    kind: EntryKind,
) -> Result<SweepReport> {
    let entries = fs::read_dir(root).map_err(|source| SnrError::Sweep {
        root: root.to_path_buf(),
        details: format!("cannot list directory: {source}"),
    })?;

    let mut report = SweepReport {
        root: root.to_path_buf(),
        ..SweepReport::default()
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                eprintln!("[SNR-SWEEP] unreadable entry in {}: {err}", root.display());
                report.skipped.push((root.to_path_buf(), err.to_string()));
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());

        let day = match kind {
            EntryKind::DayDirectory if !is_dir => {
                report.skipped.push((path, "not a directory".to_string()));
                continue;
            }
            EntryKind::DayFile if is_dir => {
                report.skipped.push((path, "not a file".to_string()));
                continue;
            }
            EntryKind::DayDirectory => parse_day(&name),
            EntryKind::DayFile => name.get(..8).and_then(parse_day),
        };

        let Some(day) = day else {
            eprintln!("[SNR-SWEEP] skipping {}: name is not a date", path.display());
            report.skipped.push((path, "name is not a date".to_string()));
            continue;
        };

        if !is_expired(day, keep, now) {
            report.kept += 1;
            continue;
        }

        let removal = match kind {
            EntryKind::DayDirectory => fs::remove_dir_all(&path),
            EntryKind::DayFile => fs::remove_file(&path),
        };
        match removal {
            Ok(()) => report.removed.push(path),
            Err(err) => {
                eprintln!("[SNR-SWEEP] failed to remove {}: {err}", path.display());
                report.failed.push((path, err.to_string()));
            }
        }
    }

    report.removed.sort();
    Ok(report)
}
