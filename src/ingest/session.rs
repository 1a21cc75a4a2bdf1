// src/ingest/session.rs
//
// Session state machine.
//
// AwaitingConnection --connect--> Connected --> Transferring
// Transferring --pause--> Paused --(next non-empty chunk)--> Transferring
// Transferring --done--> Complete
// Transferring/Paused --kill--> Aborted
//
// Complete and Aborted end the session; the machine is then back to waiting
// for the next `connect`.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::classifier::{classify, LineKind};
use super::writer::{RecordWriter, WriterSummary};
use crate::error::DriverError;
use crate::io::ByteChannel;
use crate::settings::EngineConfig;
use crate::status::{StatusEvent, StatusSink, TransferState, FOLDER_NOT_SET};

// ============================================================================
// Destination handle
// ============================================================================

/// Output directory shared with the presentation layer.
///
/// The presentation side may set or clear it at any time; the engine reads it
/// once per `connect`, so a change never affects a running session.
#[derive(Clone, Debug, Default)]
pub struct DestinationHandle(Arc<RwLock<Option<PathBuf>>>);

impl DestinationHandle {
    pub fn new(initial: Option<PathBuf>) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn set(&self, path: impl Into<PathBuf>) {
        if let Ok(mut guard) = self.0.write() {
            *guard = Some(path.into());
        }
    }

    pub fn get(&self) -> Option<PathBuf> {
        self.0.read().ok().and_then(|guard| guard.clone())
    }
}

// ============================================================================
// Session
// ============================================================================

/// One `connect`-to-terminal transfer.
struct Session {
    started_at: DateTime<Local>,
    destination: PathBuf,
    state: TransferState,
    writer: RecordWriter,
    /// Set while consecutive writes are failing; cleared by the next success
    write_failing: bool,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub started_at: DateTime<Local>,
    pub destination: PathBuf,
    pub outcome: TransferState,
    pub summary: WriterSummary,
}

pub struct SessionStateMachine<S: StatusSink> {
    config: EngineConfig,
    destination: DestinationHandle,
    sink: S,
    session: Option<Session>,
    last_report: Option<SessionReport>,
}

impl<S: StatusSink> SessionStateMachine<S> {
    pub fn new(config: EngineConfig, destination: DestinationHandle, sink: S) -> Self {
        Self {
            config,
            destination,
            sink,
            session: None,
            last_report: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(TransferState::AwaitingConnection)
    }

    /// Report of the most recently finished session.
    pub fn last_report(&self) -> Option<&SessionReport> {
        self.last_report.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Path of the file currently receiving payload, if a session is active.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.session.as_ref().map(|s| s.writer.current_path())
    }

    /// Emit the idle status. Called once when the engine starts.
    pub fn announce(&self) {
        self.notify(TransferState::AwaitingConnection);
    }

    /// Process the complete lines produced by one chunk, in order.
    ///
    /// `had_bytes` is false for reads that returned nothing; those never
    /// count as resumption activity. Only a failed handshake write is
    /// returned as an error; write failures are reported and dropped.
    pub fn process_chunk<C: ByteChannel + ?Sized>(
        &mut self,
        had_bytes: bool,
        lines: &[String],
        channel: &mut C,
    ) -> Result<(), DriverError> {
        if !had_bytes {
            return Ok(());
        }

        let mut start = 0;
        if self.state() == TransferState::Paused {
            match lines.iter().position(|l| classify(l) == LineKind::Kill) {
                Some(kill_at) => {
                    // Abort before anything in this chunk is written
                    self.finish(TransferState::Aborted);
                    start = kill_at + 1;
                }
                None => self.resume(),
            }
        }

        for line in &lines[start..] {
            self.handle_line(line, channel)?;
        }
        Ok(())
    }

    /// Apply one complete line. Without a session only `connect` acts.
    fn handle_line<C: ByteChannel + ?Sized>(
        &mut self,
        line: &str,
        channel: &mut C,
    ) -> Result<(), DriverError> {
        let kind = classify(line);
        if self.session.is_none() {
            if kind == LineKind::Connect {
                self.connect(channel)?;
            }
            return Ok(());
        }

        match kind {
            LineKind::Done => self.finish(TransferState::Complete),
            LineKind::Kill => self.finish(TransferState::Aborted),
            LineKind::Pause => self.pause(),
            // A repeated `connect` inside a session is ordinary data
            LineKind::Connect | LineKind::Payload => self.write_payload(line),
        }
        Ok(())
    }

    /// Close any open file because the process is stopping.
    pub fn shutdown(&mut self) {
        if let Some(report) = self.close_session(TransferState::Aborted) {
            crate::tlog!(
                "[session] Shutdown closed {} ({} lines written)",
                report.summary.last_path.display(),
                report.summary.total_lines
            );
        }
    }

    /// End the session after a fatal transport error.
    pub fn fail(&mut self, error: &DriverError) {
        let state = self.state();
        self.close_session(TransferState::Aborted);
        crate::tlog!("[session] Transfer failed: {}", error);
        self.sink
            .notify(StatusEvent::error(state, format!("Error, transfer failed: {}", error)));
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn connect<C: ByteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<(), DriverError> {
        let Some(destination) = self.destination.get() else {
            crate::tlog!("[session] connect received but no destination folder is set");
            self.sink.notify(StatusEvent::error(
                TransferState::AwaitingConnection,
                FOLDER_NOT_SET,
            ));
            return Ok(());
        };

        let started_at = Local::now();
        let mut writer = match RecordWriter::create(
            &destination,
            started_at,
            &self.config.file_extension,
            self.config.records_per_file,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                // No handshake: the device keeps waiting and may retry
                crate::tlog!("[session] {}", e);
                self.sink.notify(StatusEvent::error(
                    TransferState::AwaitingConnection,
                    format!("Error, could not open output file: {}", e),
                ));
                return Ok(());
            }
        };

        let handshake = format!("{}\n", self.config.handshake);
        if let Err(e) = channel.write_all(handshake.as_bytes()) {
            writer.close();
            return Err(DriverError::transport("sending handshake", e));
        }

        crate::tlog!(
            "[session] Handshake sent, writing to {}",
            writer.current_path().display()
        );

        self.session = Some(Session {
            started_at,
            destination,
            state: TransferState::Transferring,
            writer,
            write_failing: false,
        });
        self.notify(TransferState::Connected);
        self.notify(TransferState::Transferring);
        Ok(())
    }

    fn pause(&mut self) {
        if self.state() == TransferState::Transferring {
            self.set_state(TransferState::Paused);
        }
    }

    fn resume(&mut self) {
        self.set_state(TransferState::Transferring);
    }

    fn finish(&mut self, outcome: TransferState) {
        if self.close_session(outcome).is_some() {
            self.notify(outcome);
        }
    }

    fn write_payload(&mut self, line: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.writer.write(line) {
            Ok(rotated) => {
                if rotated {
                    crate::tlog!(
                        "[session] Rotated to file {}",
                        session.writer.rotation_index()
                    );
                }
                if session.write_failing {
                    session.write_failing = false;
                    let state = session.state;
                    self.notify(state);
                }
            }
            Err(e) => {
                crate::tlog!("[session] Dropped line: {}", e);
                if !session.write_failing {
                    session.write_failing = true;
                    let state = session.state;
                    self.sink.notify(StatusEvent::error(
                        state,
                        format!("Error, failed to write record line: {}", e),
                    ));
                }
            }
        }
    }

    fn set_state(&mut self, state: TransferState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        self.notify(state);
    }

    fn close_session(&mut self, outcome: TransferState) -> Option<&SessionReport> {
        let mut session = self.session.take()?;
        let summary = session.writer.close();

        crate::tlog!(
            "[session] Session from {} ended ({:?}): {} lines, {} rotations, {} dropped",
            session.started_at.format("%H:%M:%S"),
            outcome,
            summary.total_lines,
            summary.rotations,
            summary.dropped_lines
        );

        self.last_report = Some(SessionReport {
            started_at: session.started_at,
            destination: session.destination,
            outcome,
            summary,
        });
        self.last_report.as_ref()
    }

    fn notify(&self, state: TransferState) {
        crate::tlog!("[session] {}", state.message());
        self.sink.notify(StatusEvent::transition(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::ScriptedChannel;
    use crate::status::RecordingSink;
    use std::num::NonZeroU32;
    use std::path::Path;

    fn config(records: u32) -> EngineConfig {
        EngineConfig {
            records_per_file: NonZeroU32::new(records).unwrap(),
            ..EngineConfig::default()
        }
    }

    fn machine(dir: Option<&Path>, records: u32) -> SessionStateMachine<RecordingSink> {
        SessionStateMachine::new(
            config(records),
            DestinationHandle::new(dir.map(Path::to_path_buf)),
            RecordingSink::new(),
        )
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn output_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_connect_without_destination_is_rejected() {
        let mut m = machine(None, 1);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect"]), &mut ch).unwrap();

        assert_eq!(m.state(), TransferState::AwaitingConnection);
        assert!(ch.written.is_empty());
        assert!(m.current_file().is_none());
        let last = m.sink().last().unwrap();
        assert!(last.is_error());
        assert_eq!(last.message, FOLDER_NOT_SET);
    }

    #[test]
    fn test_connect_sends_handshake_and_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 1);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect"]), &mut ch).unwrap();

        assert_eq!(m.state(), TransferState::Transferring);
        assert_eq!(ch.written_text(), "handshake\n");
        assert_eq!(output_files(dir.path()).len(), 1);
        assert_eq!(
            m.sink().messages(),
            vec!["Device Connected", "Data transfer in progress...."]
        );
    }

    #[test]
    fn test_input_before_connect_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 1);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&[">hdr", "done", "kill", "connect x"]), &mut ch)
            .unwrap();
        assert_eq!(m.state(), TransferState::AwaitingConnection);
        assert!(output_files(dir.path()).is_empty());
        assert!(m.sink().events().is_empty());
    }

    #[test]
    fn test_done_completes_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", ">h", "seq", "", "done"]), &mut ch)
            .unwrap();

        assert_eq!(m.state(), TransferState::AwaitingConnection);
        let report = m.last_report().unwrap();
        assert_eq!(report.outcome, TransferState::Complete);
        assert_eq!(report.summary.total_lines, 3);
        assert_eq!(
            m.sink().last().unwrap().message,
            "Data transfer complete! Awaiting new action..."
        );
        let content = std::fs::read_to_string(&output_files(dir.path())[0]).unwrap();
        assert_eq!(content, ">h\r\nseq\r\n\r\n");
    }

    #[test]
    fn test_kill_closes_file_and_stops_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "a", "kill", "b"]), &mut ch)
            .unwrap();
        m.process_chunk(true, &lines(&["c"]), &mut ch).unwrap();

        assert_eq!(m.state(), TransferState::AwaitingConnection);
        assert_eq!(m.last_report().unwrap().outcome, TransferState::Aborted);
        assert_eq!(
            m.sink().last().unwrap().message,
            "Transfer was stopped early. Awaiting new command..."
        );
        let content = std::fs::read_to_string(&output_files(dir.path())[0]).unwrap();
        assert_eq!(content, "a\r\n");
    }

    #[test]
    fn test_pause_line_is_not_written_and_next_chunk_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "a", "pause"]), &mut ch)
            .unwrap();
        assert_eq!(m.state(), TransferState::Paused);
        assert_eq!(m.sink().last().unwrap().message, "Paused.");

        // Empty reads do not resume
        m.process_chunk(false, &[], &mut ch).unwrap();
        assert_eq!(m.state(), TransferState::Paused);

        m.process_chunk(true, &lines(&["b", "c"]), &mut ch).unwrap();
        assert_eq!(m.state(), TransferState::Transferring);
        assert_eq!(
            m.sink().last().unwrap().message,
            "Data transfer in progress...."
        );

        m.process_chunk(true, &lines(&["done"]), &mut ch).unwrap();
        let content = std::fs::read_to_string(&output_files(dir.path())[0]).unwrap();
        assert_eq!(content, "a\r\nb\r\nc\r\n");
    }

    #[test]
    fn test_partial_line_counts_as_resume_activity() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "pause"]), &mut ch)
            .unwrap();
        m.process_chunk(true, &[], &mut ch).unwrap();
        assert_eq!(m.state(), TransferState::Transferring);
    }

    #[test]
    fn test_kill_in_chunk_after_pause_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "a", "pause"]), &mut ch)
            .unwrap();
        m.process_chunk(true, &lines(&["b", "kill"]), &mut ch).unwrap();

        assert_eq!(m.last_report().unwrap().outcome, TransferState::Aborted);
        let content = std::fs::read_to_string(&output_files(dir.path())[0]).unwrap();
        assert_eq!(content, "a\r\n");
        // No resume status between Paused and the abort
        let messages = m.sink().messages();
        let tail = &messages[messages.len() - 2..];
        assert_eq!(
            tail,
            ["Paused.", "Transfer was stopped early. Awaiting new command..."]
        );
    }

    #[test]
    fn test_new_connect_after_complete_starts_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "a", "done", "connect", "b"]), &mut ch)
            .unwrap();
        assert_eq!(m.state(), TransferState::Transferring);
        assert_eq!(ch.written_text(), "handshake\nhandshake\n");
        m.shutdown();
        assert!(m.current_file().is_none());
    }

    #[test]
    fn test_connect_inside_session_is_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "connect", "done"]), &mut ch)
            .unwrap();
        let content = std::fs::read_to_string(&output_files(dir.path())[0]).unwrap();
        assert_eq!(content, "connect\r\n");
        assert_eq!(ch.written_text(), "handshake\n");
    }

    #[test]
    fn test_handshake_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default().with_failing_writes();
        let err = m
            .process_chunk(true, &lines(&["connect"]), &mut ch)
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(m.state(), TransferState::AwaitingConnection);
    }

    #[test]
    fn test_unwritable_destination_reports_error_without_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let mut m = machine(Some(&missing), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect"]), &mut ch).unwrap();
        assert_eq!(m.state(), TransferState::AwaitingConnection);
        assert!(ch.written.is_empty());
        assert!(m.sink().last().unwrap().is_error());
    }

    #[test]
    fn test_destination_change_applies_to_next_session() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let handle = DestinationHandle::new(Some(first.path().to_path_buf()));
        let mut m = SessionStateMachine::new(config(10), handle.clone(), RecordingSink::new());
        let mut ch = ScriptedChannel::default();

        m.process_chunk(true, &lines(&["connect", "a"]), &mut ch).unwrap();
        handle.set(second.path());
        m.process_chunk(true, &lines(&["b", "done"]), &mut ch).unwrap();
        assert_eq!(output_files(first.path()).len(), 1);
        assert!(output_files(second.path()).is_empty());

        m.process_chunk(true, &lines(&["connect", "c", "done"]), &mut ch)
            .unwrap();
        assert_eq!(output_files(second.path()).len(), 1);
    }

    #[test]
    fn test_fail_closes_session_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 10);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect", "a"]), &mut ch).unwrap();

        let err = DriverError::transport(
            "reading from device",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"),
        );
        m.fail(&err);
        assert_eq!(m.state(), TransferState::AwaitingConnection);
        assert_eq!(m.last_report().unwrap().summary.total_lines, 1);
        let last = m.sink().last().unwrap();
        assert!(last.is_error());
        assert_eq!(last.state, TransferState::Transferring);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_writes_report_once_and_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = machine(Some(dir.path()), 1);
        let mut ch = ScriptedChannel::default();
        m.process_chunk(true, &lines(&["connect"]), &mut ch).unwrap();

        // The file after the first rotation cannot take any data
        let first = m.current_file().unwrap();
        let name = first.file_name().unwrap().to_string_lossy().replace("_file0", "_file1");
        std::os::unix::fs::symlink("/dev/full", dir.path().join(name)).unwrap();

        m.process_chunk(true, &lines(&[">h", "seq", ""]), &mut ch).unwrap();
        m.process_chunk(true, &lines(&[">h2", "seq2"]), &mut ch).unwrap();
        assert_eq!(m.state(), TransferState::Transferring);

        let errors: Vec<_> = m.sink().events().into_iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].state, TransferState::Transferring);
        assert!(errors[0].message.starts_with("Error, failed to write record line"));

        m.process_chunk(true, &lines(&["done"]), &mut ch).unwrap();
        let report = m.last_report().unwrap();
        assert_eq!(report.outcome, TransferState::Complete);
        assert_eq!(report.summary.total_lines, 3);
        assert_eq!(report.summary.dropped_lines, 2);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), ">h\r\nseq\r\n\r\n");
    }
}
