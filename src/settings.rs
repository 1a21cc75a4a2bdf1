// src/settings.rs
//
// Driver settings: TOML file with per-field defaults, overridden by CLI flags,
// then resolved into the runtime `EngineConfig`.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DriverError;
use crate::io::serial::Parity;

pub const DEFAULT_OUTPUT_DIR: &str = "./output";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialSettings {
    /// Explicit port path. `None` means auto-discover.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverSettings {
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    #[serde(default = "default_records_per_file")]
    pub records_per_file: u32,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    #[serde(default = "default_handshake")]
    pub handshake: String,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub serial: SerialSettings,
}

fn default_destination() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}
fn default_records_per_file() -> u32 {
    4000
}
fn default_file_extension() -> String {
    "fn".to_string()
}
fn default_handshake() -> String {
    "handshake".to_string()
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_baud_rate() -> u32 {
    921_600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            records_per_file: default_records_per_file(),
            file_extension: default_file_extension(),
            handshake: default_handshake(),
            read_timeout_ms: default_read_timeout_ms(),
            serial: SerialSettings::default(),
        }
    }
}

/// `<config_dir>/mgrue/driver.toml`, when the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mgrue").join("driver.toml"))
}

impl DriverSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::io("reading settings", path, e))?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, DriverError> {
        toml::from_str(content).map_err(|source| DriverError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve into the runtime engine configuration, rejecting invalid values.
    pub fn engine_config(&self) -> Result<EngineConfig, DriverError> {
        let records_per_file = NonZeroU32::new(self.records_per_file).ok_or_else(|| {
            DriverError::InvalidConfig("records_per_file must be a positive integer".to_string())
        })?;

        let file_extension = self.file_extension.trim_start_matches('.').to_string();
        if file_extension.is_empty() || file_extension.contains(&['/', '\\'][..]) {
            return Err(DriverError::InvalidConfig(format!(
                "file_extension {:?} is not a usable extension",
                self.file_extension
            )));
        }

        let handshake = self.handshake.trim_end_matches(&['\r', '\n'][..]).to_string();
        if handshake.is_empty() || handshake.contains('\n') {
            return Err(DriverError::InvalidConfig(
                "handshake must be a single non-empty line".to_string(),
            ));
        }

        if self.read_timeout_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(EngineConfig {
            records_per_file,
            file_extension,
            handshake,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        })
    }
}

/// Runtime configuration consumed by the ingestion engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub records_per_file: NonZeroU32,
    /// Output file extension without the leading dot.
    pub file_extension: String,
    /// Acknowledgment line sent on `connect`, without terminator.
    pub handshake: String,
    pub read_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            records_per_file: NonZeroU32::new(default_records_per_file()).unwrap_or(NonZeroU32::MIN),
            file_extension: default_file_extension(),
            handshake: default_handshake(),
            read_timeout: Duration::from_millis(default_read_timeout_ms()),
        }
    }
}

// ============================================================================
// Directory validation
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DirectoryValidation {
    pub exists: bool,
    pub writable: bool,
    pub error: Option<String>,
}

pub fn validate_directory(dir_path: &Path) -> DirectoryValidation {
    let exists = dir_path.is_dir();

    let writable = if exists {
        // Probe with a throwaway file
        let test_file = dir_path.join(".mgrue_write_test");
        match std::fs::write(&test_file, b"test") {
            Ok(_) => {
                std::fs::remove_file(&test_file).ok();
                true
            }
            Err(_) => false,
        }
    } else {
        false
    };

    let error = if !exists {
        Some("Directory does not exist".to_string())
    } else if !writable {
        Some("Directory is not writable".to_string())
    } else {
        None
    };

    DirectoryValidation {
        exists,
        writable,
        error,
    }
}

/// Validate the destination directory. The default `./output` directory is
/// created on demand; any other path must already exist and be writable.
pub fn prepare_destination(path: &Path) -> Result<PathBuf, DriverError> {
    if path == Path::new(DEFAULT_OUTPUT_DIR) && !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|e| DriverError::io("creating output directory", path, e))?;
    }

    let validation = validate_directory(path);
    match validation.error {
        None => Ok(path.to_path_buf()),
        Some(reason) => Err(DriverError::InvalidConfig(format!(
            "{} is not a valid directory: {}",
            path.display(),
            reason
        ))),
    }
}
