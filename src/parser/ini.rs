//! Per-batch INI writer (`[Cash_Info]` header plus one `[LEVEL4_nnn]` section
//! per note). Lines end with `\r\n`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::core::errors::{Result, SnrError};
use crate::core::paths::open_with_parents;

pub const LINE_BREAK: &str = "\r\n";

/// Placeholder face value recorded for every note.
const NOTE_VALUE: u32 = 100;

pub struct IniWriter {
    out: BufWriter<File>,
    path: PathBuf,
}

impl IniWriter {
    /// Create (or truncate) the INI file and write the batch header.
    pub fn create<Tz: TimeZone>(
        path: &Path,
        note_count: usize,
        operation_time: &DateTime<Tz>,
    ) -> Result<Self>
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        let file = open_with_parents(path, &options)?;

        let mut writer = Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        };
        writer.line("[Cash_Info]")?;
        writer.line(&format!("LEVEL4_COUNT={note_count}"))?;
        writer.line("LEVEL3_COUNT=0")?;
        writer.line("LEVEL2_COUNT=0")?;
        writer.line(&format!(
            "OperationTime={}",
            operation_time.format("%Y-%m-%d %H:%M:%S")
        ))?;
        writer.line("")?;
        Ok(writer)
    }

    /// Open the section of note `index` (0-based).
    pub fn begin_note(&mut self, index: usize) -> Result<()> {
        self.line("")?;
        self.line(&format!("[LEVEL4_{:03}]", index + 1))?;
        self.line(&format!("Index={index}"))?;
        self.line(&format!("Value={NOTE_VALUE}"))
    }

    pub fn serial_number(&mut self, serial: &str) -> Result<()> {
        self.line(&format!("SerialNumber={serial}"))
    }

    pub fn image_file(&mut self, image: &Path) -> Result<()> {
        self.line(&format!("ImageFile={}", image.display()))
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.out
            .flush()
            .map_err(|source| SnrError::io(&self.path, source))?;
        Ok(self.path)
    }

    fn line(&mut self, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.write_all(LINE_BREAK.as_bytes()))
            .map_err(|source| SnrError::io(&self.path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn writes_header_and_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out").join("SNRinfo.ini");
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let mut ini = IniWriter::create(&path, 1, &at).unwrap();
        ini.begin_note(0).unwrap();
        ini.serial_number("ABC123").unwrap();
        ini.image_file(Path::new("/srv/snr/20240309/1/ABC123.bmp"))
            .unwrap();
        assert_eq!(ini.finish().unwrap(), path);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[Cash_Info]\r\nLEVEL4_COUNT=1\r\nLEVEL3_COUNT=0\r\nLEVEL2_COUNT=0\r\n\
             OperationTime=2024-03-09 14:05:07\r\n\r\n\
             \r\n[LEVEL4_001]\r\nIndex=0\r\nValue=100\r\n\
             SerialNumber=ABC123\r\nImageFile=/srv/snr/20240309/1/ABC123.bmp\r\n"
        );
    }

    #[test]
    fn create_truncates_previous_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("SNRinfo.ini");
        std::fs::write(&path, "x".repeat(4096)).unwrap();

        let at = Local.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        IniWriter::create(&path, 0, &at).unwrap().finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[Cash_Info]"));
        assert!(!text.contains('x'));
    }
}
