//! Error types for espflasher.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for espflasher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espflasher operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No serial port selected before starting an upload.
    #[error("No serial port selected")]
    NoPortSelected,

    /// No firmware file selected before starting an upload.
    #[error("No firmware file selected")]
    NoFirmwareSelected,

    /// esptool is not installed or not on PATH.
    #[error("esptool not found on PATH (install with: pip install esptool)")]
    ToolNotFound,

    /// Chip auto-detection or MAC read failed.
    #[error("ESP chip detection failed: {0}")]
    ChipDetection(String),

    /// Serial port could not be opened or dropped mid-operation.
    #[error("Serial port error: {0}")]
    SerialPort(String),

    /// The esptool invocation itself failed. The message is the tool's
    /// output verbatim, never parsed or classified further.
    #[error("esptool failed: {0}")]
    FlashTool(String),

    /// A config or logbook file could not be read or written.
    #[error("Cannot access {path}: {source}")]
    FileAccess {
        /// The file that could not be opened or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A persisted settings file is present but missing a required field
    /// or otherwise malformed. A hard load failure, by contract: no
    /// silent fallback to defaults.
    #[error("Malformed settings file: {0}")]
    MissingField(String),

    /// An upload is already in flight; only one runs at a time.
    #[error("An upload is already in progress")]
    UploadInProgress,

    /// Other I/O error (child process pipes, thread hand-off).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a `FileAccess` error for `path`.
    pub fn file_access(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}
