// src/sender.rs
//
// Transfer mode: push a stored `.fn` record file to the device.
//
// Waits for the device's `connect` line, answers `transfer`, streams the file
// line by line and finishes with `done`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::DriverError;
use crate::ingest::{classify, LineKind, LineReassembler};
use crate::io::{ByteChannel, ChunkReader};
use crate::status::{StatusEvent, StatusSink, TransferState};

pub const TRANSFER_TOKEN: &str = "transfer";
pub const SEND_FILE_EXTENSION: &str = "fn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSummary {
    pub lines_sent: u64,
    pub bytes_sent: u64,
    /// Stop was raised before the whole file went out; `done` was not sent
    pub stopped: bool,
}

/// Check that `path` is an existing `.fn` file.
pub fn validate_send_file(path: &Path) -> Result<PathBuf, DriverError> {
    if path.as_os_str().is_empty() {
        return Err(DriverError::InvalidConfig("Path cannot be empty".to_string()));
    }
    if !path.is_file() {
        return Err(DriverError::InvalidConfig(format!(
            "{} is not a valid file",
            path.display()
        )));
    }
    if path.extension().and_then(|e| e.to_str()) != Some(SEND_FILE_EXTENSION) {
        return Err(DriverError::InvalidConfig(format!(
            "{} is not a valid file type",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

pub struct FileSender<C: ByteChannel, S: StatusSink> {
    reader: ChunkReader<C>,
    reassembler: LineReassembler,
    sink: S,
}

impl<C: ByteChannel, S: StatusSink> FileSender<C, S> {
    pub fn new(channel: C, read_timeout: Duration, sink: S) -> Self {
        Self {
            reader: ChunkReader::new(channel, read_timeout),
            reassembler: LineReassembler::new(),
            sink,
        }
    }

    pub fn channel(&self) -> &C {
        self.reader.channel()
    }

    /// Wait for `connect`, then send `file`. Returns `None` if stopped before
    /// the device connected. A stop during streaming leaves out the final
    /// `done` so the device never takes a truncated file as complete.
    pub fn run(&mut self, file: &Path, stop: &AtomicBool) -> Result<Option<SendSummary>, DriverError> {
        // Open before waiting so a bad path fails fast
        let source = File::open(file).map_err(|e| DriverError::io("opening send file", file, e))?;

        self.sink
            .notify(StatusEvent::transition(TransferState::AwaitingConnection));
        if !self.wait_for_connect(stop)? {
            return Ok(None);
        }

        self.send_line(TRANSFER_TOKEN)?;
        crate::tlog!("[sender] Device Connected");
        self.sink
            .notify(StatusEvent::transition(TransferState::Connected));
        self.sink
            .notify(StatusEvent::transition(TransferState::Transferring));

        let summary = self.stream_file(BufReader::new(source), file, stop)?;
        if summary.stopped {
            crate::tlog!(
                "[sender] Transfer stopped after {} lines of {}",
                summary.lines_sent,
                file.display()
            );
            self.sink
                .notify(StatusEvent::transition(TransferState::Aborted));
            return Ok(Some(summary));
        }

        self.send_line(crate::ingest::classifier::DONE_TOKEN)?;
        crate::tlog!(
            "[sender] Transfer Complete: {} lines, {} bytes from {}",
            summary.lines_sent,
            summary.bytes_sent,
            file.display()
        );
        self.sink
            .notify(StatusEvent::transition(TransferState::Complete));
        Ok(Some(summary))
    }

    fn wait_for_connect(&mut self, stop: &AtomicBool) -> Result<bool, DriverError> {
        while !stop.load(Ordering::Relaxed) {
            let chunk = self.reader.read_chunk()?;
            let lines = self.reassembler.feed(&chunk.text);
            if lines.iter().any(|l| classify(l) == LineKind::Connect) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn stream_file<R: BufRead>(
        &mut self,
        mut source: R,
        path: &Path,
        stop: &AtomicBool,
    ) -> Result<SendSummary, DriverError> {
        let mut summary = SendSummary {
            lines_sent: 0,
            bytes_sent: 0,
            stopped: false,
        };
        let mut line = Vec::new();

        loop {
            if stop.load(Ordering::Relaxed) {
                summary.stopped = true;
                break;
            }
            line.clear();
            let n = source
                .read_until(b'\n', &mut line)
                .map_err(|e| DriverError::io("reading send file", path, e))?;
            if n == 0 {
                break;
            }
            self.reader
                .channel_mut()
                .write_all(&line)
                .map_err(|e| DriverError::transport("sending file line", e))?;
            summary.lines_sent += 1;
            summary.bytes_sent += n as u64;
        }

        Ok(summary)
    }

    fn send_line(&mut self, token: &str) -> Result<(), DriverError> {
        self.reader
            .channel_mut()
            .write_all(format!("{}\n", token).as_bytes())
            .map_err(|e| DriverError::transport("sending control line", e))
    }
}
