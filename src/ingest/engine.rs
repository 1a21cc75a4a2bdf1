// src/ingest/engine.rs
//
// Ingestion loop: ChunkReader -> LineReassembler -> SessionStateMachine.
// Runs on one dedicated blocking thread; the only wait is the bounded read.

use std::sync::atomic::{AtomicBool, Ordering};

use super::reassembler::LineReassembler;
use super::session::{DestinationHandle, SessionStateMachine};
use crate::error::DriverError;
use crate::io::{ByteChannel, ChunkReader};
use crate::settings::EngineConfig;
use crate::status::{StatusSink, TransferState};

pub struct Engine<C: ByteChannel, S: StatusSink> {
    reader: ChunkReader<C>,
    reassembler: LineReassembler,
    machine: SessionStateMachine<S>,
}

impl<C: ByteChannel, S: StatusSink> Engine<C, S> {
    pub fn new(channel: C, config: EngineConfig, destination: DestinationHandle, sink: S) -> Self {
        let reader = ChunkReader::new(channel, config.read_timeout);
        Self {
            reader,
            reassembler: LineReassembler::new(),
            machine: SessionStateMachine::new(config, destination, sink),
        }
    }

    pub fn state(&self) -> TransferState {
        self.machine.state()
    }

    pub fn machine(&self) -> &SessionStateMachine<S> {
        &self.machine
    }

    pub fn channel(&self) -> &C {
        self.reader.channel()
    }

    /// One read plus processing of every line it completes.
    pub fn step(&mut self) -> Result<(), DriverError> {
        let chunk = self.reader.read_chunk()?;
        let lines = self.reassembler.feed(&chunk.text);
        self.machine
            .process_chunk(!chunk.is_empty(), &lines, self.reader.channel_mut())
    }

    /// Run until `stop` is raised or the transport fails.
    ///
    /// `stop` is checked between reads. Any open output file is closed before
    /// returning, on both paths.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), DriverError> {
        crate::tlog!("[engine] Ingestion started");
        self.machine.announce();

        loop {
            if stop.load(Ordering::Relaxed) {
                self.machine.shutdown();
                crate::tlog!("[engine] Stop requested, ingestion finished");
                return Ok(());
            }

            if let Err(e) = self.step() {
                if e.is_transport() {
                    self.machine.fail(&e);
                    return Err(e);
                }
                crate::tlog!("[engine] {}", e);
            }
        }
    }
}
