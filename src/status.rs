// src/status.rs
//
// Transfer state and its rendering for the presentation layer.
//
// The state machine drives control flow off `TransferState`; the strings here
// are only ever rendered, never compared.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    AwaitingConnection,
    Connected,
    Transferring,
    Paused,
    Complete,
    Aborted,
}

impl TransferState {
    /// Human-readable status shown to the user on entering this state.
    pub fn message(self) -> &'static str {
        match self {
            TransferState::AwaitingConnection => "Awaiting Connection",
            TransferState::Connected => "Device Connected",
            TransferState::Transferring => "Data transfer in progress....",
            TransferState::Paused => "Paused.",
            TransferState::Complete => "Data transfer complete! Awaiting new action...",
            TransferState::Aborted => "Transfer was stopped early. Awaiting new command...",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

pub const FOLDER_NOT_SET: &str = "Error, must set folder before sending data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Error,
}

/// One notification for the status sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Engine state when the event was raised
    pub state: TransferState,
    pub level: StatusLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl StatusEvent {
    pub fn transition(state: TransferState) -> Self {
        Self {
            state,
            level: StatusLevel::Info,
            message: state.message().to_string(),
            timestamp: Local::now(),
        }
    }

    pub fn error(state: TransferState, message: impl Into<String>) -> Self {
        Self {
            state,
            level: StatusLevel::Error,
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

/// Receives status notifications. Fire-and-forget; a sink may keep only the
/// most recent event.
pub trait StatusSink: Send {
    fn notify(&self, event: StatusEvent);
}

impl<T: StatusSink + Sync + ?Sized> StatusSink for std::sync::Arc<T> {
    fn notify(&self, event: StatusEvent) {
        (**self).notify(event)
    }
}

/// Latest-value-wins sink over a tokio watch channel.
pub struct WatchStatusSink {
    tx: watch::Sender<StatusEvent>,
}

impl WatchStatusSink {
    /// Create the sink and a receiver primed with `AwaitingConnection`.
    pub fn channel() -> (Self, watch::Receiver<StatusEvent>) {
        let (tx, rx) = watch::channel(StatusEvent::transition(TransferState::AwaitingConnection));
        (Self { tx }, rx)
    }
}

impl StatusSink for WatchStatusSink {
    fn notify(&self, event: StatusEvent) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(event);
    }
}

/// Keeps every event in order. Used where the full history matters, such as
/// tests and post-run summaries.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    pub fn last(&self) -> Option<StatusEvent> {
        self.events.lock().ok().and_then(|e| e.last().cloned())
    }
}

impl StatusSink for RecordingSink {
    fn notify(&self, event: StatusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_messages() {
        assert_eq!(TransferState::Connected.message(), "Device Connected");
        assert_eq!(TransferState::Paused.to_string(), "Paused.");
        assert_eq!(
            TransferState::Aborted.message(),
            "Transfer was stopped early. Awaiting new command..."
        );
    }

    #[test]
    fn test_watch_sink_keeps_latest() {
        let (sink, rx) = WatchStatusSink::channel();
        assert_eq!(rx.borrow().state, TransferState::AwaitingConnection);

        sink.notify(StatusEvent::transition(TransferState::Connected));
        sink.notify(StatusEvent::transition(TransferState::Transferring));
        assert_eq!(rx.borrow().state, TransferState::Transferring);
        assert_eq!(rx.borrow().message, "Data transfer in progress....");
    }

    #[test]
    fn test_watch_sink_without_receivers_does_not_panic() {
        let (sink, rx) = WatchStatusSink::channel();
        drop(rx);
        sink.notify(StatusEvent::error(TransferState::AwaitingConnection, FOLDER_NOT_SET));
    }

    #[test]
    fn test_event_serializes_to_json() {
        let event = StatusEvent::error(TransferState::AwaitingConnection, FOLDER_NOT_SET);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "awaiting_connection");
        assert_eq!(json["level"], "error");
        assert_eq!(json["message"], FOLDER_NOT_SET);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.notify(StatusEvent::transition(TransferState::Connected));
        sink.notify(StatusEvent::transition(TransferState::Transferring));
        assert_eq!(
            sink.messages(),
            vec!["Device Connected", "Data transfer in progress...."]
        );
        assert_eq!(sink.last().map(|e| e.state), Some(TransferState::Transferring));
    }
}
