// src/lib.rs
//
// mGRUE host driver: ingests the device's serial record stream into rotated
// output files, and can push a stored record file back to the device.

#[macro_use]
pub mod logging;

pub mod error;
pub mod ingest;
pub mod io;
pub mod sender;
pub mod settings;
pub mod status;

pub use error::DriverError;
pub use ingest::{DestinationHandle, Engine};
pub use settings::{DriverSettings, EngineConfig};
pub use status::{StatusEvent, StatusSink, TransferState, WatchStatusSink};
