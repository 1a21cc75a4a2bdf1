// src/io/serial/discovery.rs
//
// Serial port enumeration and the "wait for the device to appear" poll loop.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::DriverError;

/// A candidate port for the device.
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: &'static str,
    pub product: Option<String>,
    /// USB vendor and product id
    pub usb_id: Option<(u16, u16)>,
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, product, usb_id) = match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                ("USB", usb.product, Some((usb.vid, usb.pid)))
            }
            serialport::SerialPortType::BluetoothPort => ("Bluetooth", None, None),
            serialport::SerialPortType::PciPort => ("PCI", None, None),
            serialport::SerialPortType::Unknown => ("Unknown", None, None),
        };
        Self {
            port_name: p.port_name,
            port_type,
            product,
            usb_id,
        }
    }
}

/// Ports the device could be on, in enumeration order.
///
/// macOS lists each device twice; the `/dev/tty.*` twin blocks on open
/// waiting for carrier detect, so only `/dev/cu.*` is kept.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, DriverError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .filter(|p| !cfg!(target_os = "macos") || !p.port_name.starts_with("/dev/tty."))
        .map(SerialPortInfo::from)
        .collect())
}

/// Poll cadence while waiting for the device.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveryPolicy {
    pub poll_interval: Duration,
    /// Failed polls before warning and backing off
    pub attempts_before_backoff: u32,
    pub backoff: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            attempts_before_backoff: 50,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Block until `probe` reports a port, or `stop` is raised.
///
/// `probe` is `list_serial_ports` in production. Enumeration failures count
/// as an empty poll. Returns `None` only when stopped.
pub fn wait_for_device<F>(
    policy: &DiscoveryPolicy,
    stop: &AtomicBool,
    mut probe: F,
) -> Option<SerialPortInfo>
where
    F: FnMut() -> Result<Vec<SerialPortInfo>, DriverError>,
{
    crate::tlog!("[discovery] Looking for mGRUE device...");
    let mut attempts = 0u32;

    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        match probe() {
            Ok(ports) => {
                if let Some(port) = ports.into_iter().next() {
                    crate::tlog!(
                        "[discovery] Port opened, found mGRUE device on {} ({})",
                        port.port_name,
                        port.port_type
                    );
                    return Some(port);
                }
            }
            Err(e) => crate::tlog!("[discovery] Port enumeration failed: {}", e),
        }

        sleep_unless_stopped(policy.poll_interval, stop);
        attempts += 1;
        if attempts == policy.attempts_before_backoff {
            crate::tlog!("[discovery] WARNING: no mGRUE device found");
            sleep_unless_stopped(policy.backoff, stop);
            attempts = 0;
            crate::tlog!("[discovery] Looking for mGRUE device...");
        }
    }
}

/// Sleep in short slices so a stop request is noticed promptly.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
}
