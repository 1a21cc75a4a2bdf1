// src/error.rs
//
// Error type shared by the engine, transport and process shell.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure on the byte channel. Fatal to the current session.
    #[error("transport error while {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("failed to parse config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("no output file is open (rotation index {rotation_index})")]
    NoOpenFile { rotation_index: u32 },
}

impl DriverError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn transport(operation: &'static str, source: std::io::Error) -> Self {
        Self::Transport { operation, source }
    }

    /// Transport failures end the session; everything else is recoverable
    /// at the engine level.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Serial(_))
    }
}
