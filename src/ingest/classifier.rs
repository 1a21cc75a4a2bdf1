// src/ingest/classifier.rs
//
// Control-token classification for reassembled lines.
//
// `connect` must match the whole line. `done`, `pause` and `kill` match
// anywhere in the line, checked in that order. Substring matching means a
// payload line that happens to contain one of them is treated as control;
// the device vocabulary relies on this, so it must not be tightened.

use serde::Serialize;

pub const CONNECT_TOKEN: &str = "connect";
pub const DONE_TOKEN: &str = "done";
pub const PAUSE_TOKEN: &str = "pause";
pub const KILL_TOKEN: &str = "kill";

/// What a complete line means to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Connect,
    Pause,
    Kill,
    Done,
    Payload,
}

pub fn classify(line: &str) -> LineKind {
    if line == CONNECT_TOKEN {
        LineKind::Connect
    } else if line.contains(DONE_TOKEN) {
        LineKind::Done
    } else if line.contains(PAUSE_TOKEN) {
        LineKind::Pause
    } else if line.contains(KILL_TOKEN) {
        LineKind::Kill
    } else {
        LineKind::Payload
    }
}
