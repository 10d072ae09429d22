//! # espflasher
//!
//! Flash ESP-series chips through the external `esptool` program and
//! keep a logbook of every flashed device.
//!
//! The crate provides the orchestration around esptool, not the
//! flashing protocol itself:
//!
//! - persisted flash settings and logbook row counter
//! - serial port discovery with USB bridge classification
//! - the esptool invocation (argument derivation, read-MAC, flashing)
//! - progress extraction from esptool's live console output
//! - the background upload workflow with an event channel
//! - the CSV flash logbook
//!
//! ## Example
//!
//! ```rust,no_run
//! use espflasher::{FlashSettings, UploadEvent, Uploader};
//! use std::path::PathBuf;
//!
//! fn main() -> espflasher::Result<()> {
//!     let mut settings = FlashSettings::load()?;
//!     settings.port = Some("/dev/ttyUSB0".to_string());
//!     settings.firmware = Some(PathBuf::from("firmware.bin"));
//!
//!     let uploader = Uploader::new();
//!     let handle = uploader.start(&settings)?;
//!     for event in handle.events().iter() {
//!         if let UploadEvent::Progress(percent) = event {
//!             println!("{percent}%");
//!         }
//!     }
//!     let outcome = handle.wait()?;
//!     println!("Flashed device {}", outcome.mac);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod esptool;
pub mod logbook;
pub mod ports;
pub mod progress;
pub mod settings;
pub mod upload;

pub use {
    error::{Error, Result},
    esptool::{Esptool, FLASH_BASE_ADDR, build_flash_args, normalize_mac},
    logbook::{FlashEvent, LOG_FILE_NAME, Logbook},
    ports::{BridgeKind, DetectedPort, detect_ports, list_port_names},
    progress::{ProgressExtractor, ProgressSink, parse_write_percent},
    settings::{BaudRate, FlashMode, FlashSettings, LogCounter, config_dir},
    upload::{FlashOutcome, UploadEvent, UploadHandle, UploadState, Uploader},
};
