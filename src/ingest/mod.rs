// src/ingest/mod.rs
//
// Ingestion engine for the mGRUE record stream.
//
// Pipeline, leaves first:
// - reassembler: text chunks -> complete lines
// - classifier: line -> control token or payload
// - session: transfer state machine, handshake, pause/resume
// - writer: CRLF payload lines into rotating output files
// - engine: the read loop driving all of the above

pub mod classifier;
pub mod engine;
pub mod reassembler;
pub mod session;
pub mod writer;

pub use classifier::{classify, LineKind};
pub use engine::Engine;
pub use reassembler::LineReassembler;
pub use session::{DestinationHandle, SessionReport, SessionStateMachine};
pub use writer::{RecordWriter, WriterSummary, LINES_PER_RECORD};
