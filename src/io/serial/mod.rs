// src/io/serial/mod.rs
//
// Serial transport for the mGRUE device.
//
// Features:
// - `SerialChannel`: `ByteChannel` over a serialport handle
// - Port enumeration and device discovery polling

pub mod discovery;
pub mod port;
pub(crate) mod utils;

pub use discovery::{list_serial_ports, wait_for_device, DiscoveryPolicy, SerialPortInfo};
pub use port::{SerialChannel, SerialConfig};
pub use utils::Parity;
