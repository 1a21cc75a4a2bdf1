// src/ingest/writer.rs
//
// Record writer: CRLF-terminated payload lines into rotating output files.
//
// Files are named `<HH-MM-SS>_file<index>.<ext>` from the session start time.
// Rotation happens once `3 * records_per_file` lines have been written to the
// current file (a record is three lines: header, data, separator). The line
// that completes the quota is written before the file is closed.
//
// Each line is written straight to the file in a single call so that a
// failure is reported for the line that caused it.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use crate::error::DriverError;

/// Payload lines per device record.
pub const LINES_PER_RECORD: u64 = 3;

const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Totals reported when a writer closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSummary {
    pub total_lines: u64,
    pub rotations: u32,
    pub dropped_lines: u64,
    pub last_path: PathBuf,
}

/// Owns the active output file for one session.
pub struct RecordWriter {
    directory: PathBuf,
    stamp: String,
    extension: String,
    records_per_file: NonZeroU32,
    rotation_index: u32,
    /// Lines written to the current file; reset on rotation
    lines_in_file: u64,
    total_lines: u64,
    dropped_lines: u64,
    file: Option<File>,
    closed: bool,
}

impl RecordWriter {
    /// Open rotation 0 for a session that started at `started_at`.
    pub fn create(
        directory: &Path,
        started_at: DateTime<Local>,
        extension: &str,
        records_per_file: NonZeroU32,
    ) -> Result<Self, DriverError> {
        let mut writer = Self {
            directory: directory.to_path_buf(),
            stamp: file_stamp(started_at),
            extension: extension.to_string(),
            records_per_file,
            rotation_index: 0,
            lines_in_file: 0,
            total_lines: 0,
            dropped_lines: 0,
            file: None,
            closed: false,
        };
        writer.open_current()?;
        Ok(writer)
    }

    /// Append `line` followed by CRLF.
    ///
    /// Returns `Ok(true)` when this line completed the file's quota and the
    /// writer rotated. On error the line is not counted; the caller decides
    /// whether to drop it.
    pub fn write(&mut self, line: &str) -> Result<bool, DriverError> {
        if self.closed {
            self.dropped_lines += 1;
            return Err(DriverError::NoOpenFile {
                rotation_index: self.rotation_index,
            });
        }

        if self.file.is_none() {
            // Previous rotation could not open its file; retry now
            if let Err(e) = self.open_current() {
                self.dropped_lines += 1;
                return Err(e);
            }
        }

        let path = self.current_path();
        let mut record = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        record.extend_from_slice(line.as_bytes());
        record.extend_from_slice(LINE_TERMINATOR);

        let result = match self.file.as_mut() {
            Some(file) => file.write_all(&record),
            None => {
                self.dropped_lines += 1;
                return Err(DriverError::NoOpenFile {
                    rotation_index: self.rotation_index,
                });
            }
        };
        if let Err(e) = result {
            self.dropped_lines += 1;
            return Err(DriverError::io("writing record line", path, e));
        }

        self.lines_in_file += 1;
        self.total_lines += 1;

        if self.rotation_due() {
            self.rotate();
            return Ok(true);
        }
        Ok(false)
    }

    /// Close the active file. Further writes fail with `NoOpenFile`.
    pub fn close(&mut self) -> WriterSummary {
        self.file = None;
        self.closed = true;
        self.summary()
    }

    pub fn summary(&self) -> WriterSummary {
        WriterSummary {
            total_lines: self.total_lines,
            rotations: self.rotation_index,
            dropped_lines: self.dropped_lines,
            last_path: self.current_path(),
        }
    }

    pub fn rotation_index(&self) -> u32 {
        self.rotation_index
    }

    pub fn current_path(&self) -> PathBuf {
        output_path(&self.directory, &self.stamp, self.rotation_index, &self.extension)
    }

    fn rotation_due(&self) -> bool {
        self.lines_in_file % LINES_PER_RECORD == 0
            && self.lines_in_file / LINES_PER_RECORD == u64::from(self.records_per_file.get())
    }

    fn rotate(&mut self) {
        let finished = self.current_path();
        self.file = None;
        self.rotation_index += 1;
        self.lines_in_file = 0;

        match self.open_current() {
            Ok(()) => crate::tlog!(
                "[writer] Rotated {} -> {}",
                finished.display(),
                self.current_path().display()
            ),
            Err(e) => crate::tlog!("[writer] Rotation open failed, will retry on next line: {}", e),
        }
    }

    fn open_current(&mut self) -> Result<(), DriverError> {
        let path = self.current_path();
        if path.exists() {
            crate::tlog!(
                "[writer] WARNING: {} already exists, appending to it",
                path.display()
            );
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DriverError::io("opening output file", &path, e))?;
        self.file = Some(file);
        Ok(())
    }
}

/// `HH-MM-SS` session stamp used in output file names.
pub fn file_stamp(started_at: DateTime<Local>) -> String {
    started_at.format("%H-%M-%S").to_string()
}

pub fn output_path(directory: &Path, stamp: &str, rotation_index: u32, extension: &str) -> PathBuf {
    directory.join(format!("{}_file{}.{}", stamp, rotation_index, extension))
}
