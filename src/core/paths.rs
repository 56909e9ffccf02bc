//! Output layout and path helpers.
//!
//! Layout on disk:
//! - `image_root/<YYYYMMDD>/<batch>/<serial>.bmp`
//! - `log_root/<YYYYMMDD>.log`

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::core::errors::{Result, SnrError};

/// Format used for day directories and day log names.
pub const DAY_FORMAT: &str = "%Y%m%d";

/// Day stamp (`YYYYMMDD`) for a timestamp.
pub fn day_stamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(DAY_FORMAT).to_string()
}

/// Parse a `YYYYMMDD` name.
pub fn parse_day(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, DAY_FORMAT).ok()
}

/// Directory holding the images of one batch.
pub fn batch_dir(image_root: &Path, day: &str, batch_index: u32) -> PathBuf {
    image_root.join(day).join(batch_index.to_string())
}

/// Image file for a note inside its batch directory.
pub fn image_path(batch_dir: &Path, stem: &str) -> PathBuf {
    batch_dir.join(format!("{}.bmp", sanitize_file_stem(stem)))
}

/// Status log for a day.
pub fn day_log_path(log_root: &Path, day: &str) -> PathBuf {
    log_root.join(format!("{day}.log"))
}

/// Replace characters that would escape or break a file name.
pub fn sanitize_file_stem(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Open `path` with `options`; when the parent directory is missing, create it
/// once and retry exactly once.
pub fn open_with_parents(path: &Path, options: &OpenOptions) -> Result<File> {
    match options.open(path) {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| SnrError::io(parent, source))?;
            }
            options.open(path).map_err(|source| SnrError::io(path, source))
        }
        Err(source) => Err(SnrError::io(path, source)),
    }
}

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components. Otherwise the path is made absolute relative to
/// CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
