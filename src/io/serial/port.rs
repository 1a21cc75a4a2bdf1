// src/io/serial/port.rs
//
// `ByteChannel` implementation backed by the serialport crate.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, Parity};
use crate::error::DriverError;
use crate::io::ByteChannel;
use crate::settings::SerialSettings;

/// Upper bound on a single read, whatever the driver reports as waiting.
const MAX_CHUNK: usize = 64 * 1024;

/// Fully resolved serial port configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SerialConfig {
    pub fn from_settings(port: String, settings: &SerialSettings) -> Self {
        Self {
            port,
            baud_rate: settings.baud_rate,
            data_bits: settings.data_bits,
            stop_bits: settings.stop_bits,
            parity: settings.parity,
        }
    }

    /// `921600 8-N-1` style summary for logs
    pub fn line_settings(&self) -> String {
        format!(
            "{} {}-{}-{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// Serial port wrapped as a `ByteChannel`.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialChannel {
    pub fn open(config: &SerialConfig, timeout: Duration) -> Result<Self, DriverError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(to_serialport_parity(config.parity))
            .timeout(timeout)
            .open()?;

        crate::tlog!(
            "[serial] Opened {} at {}",
            config.port,
            config.line_settings()
        );

        Ok(Self {
            port,
            name: config.port.clone(),
            timeout,
        })
    }
}

impl ByteChannel for SerialChannel {
    fn read_available(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }

        let waiting = self.port.bytes_to_read()? as usize;
        // Nothing queued: block up to the timeout for the first byte(s)
        let mut buf = vec![0u8; waiting.clamp(256, MAX_CHUNK)];

        match self.port.read(&mut buf) {
            Ok(0) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} disconnected", self.name),
            )),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_from_settings() {
        let settings = SerialSettings {
            parity: Parity::Odd,
            stop_bits: 2,
            ..SerialSettings::default()
        };
        let config = SerialConfig::from_settings("/dev/ttyACM0".to_string(), &settings);
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.line_settings(), "921600 8-O-2");
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::from_settings(
            "/dev/mgrue-does-not-exist".to_string(),
            &SerialSettings::default(),
        );
        let result = SerialChannel::open(&config, Duration::from_millis(10));
        assert!(matches!(result, Err(DriverError::Serial(_))));
    }
}
