// src/logging.rs
//
// Timestamped stderr logging with an optional mirror file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::DriverError;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Name of the symlink that always points at the newest log file (Unix only).
pub const LATEST_LOG_NAME: &str = "driver.log";

/// `HH:MM:SS.mmm` local time, the prefix of every log line.
#[doc(hidden)]
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Stderr only. Used where `tlog!` would take the `LOG_FILE` lock while it
/// is already held or being replaced.
fn note(message: std::fmt::Arguments<'_>) {
    eprintln!("{} [logging] {}", timestamp(), message);
}

/// Initialise file logging into `log_dir`.
/// Creates a timestamped log file and refreshes the `driver.log` symlink.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, DriverError> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| DriverError::io("creating log directory", log_dir, e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-mgrue-driver.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| DriverError::io("creating log file", &log_path, e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            note(format_args!("Failed to create {} symlink: {}", LATEST_LOG_NAME, e));
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    note(format_args!("File logging started: {}", log_path.display()));

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() {
            note(format_args!("File logging stopped"));
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", $crate::logging::timestamp(), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}
