//! The flash logbook: one appended row per completed flash.
//!
//! The log is a plain tabular file with a single sheet of data: a
//! header row `Sl-No, MAC-ID, Date, File Name` followed by one row per
//! flash event. The persisted row counter survives application runs so
//! sequence numbers keep increasing across sessions; it only resets
//! when the log file itself is gone.

use crate::error::{Error, Result};
use crate::settings::{FIRST_DATA_ROW, LogCounter};
use crate::upload::FlashOutcome;
use chrono::NaiveDate;
use log::info;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// File name of the log inside the chosen destination directory.
pub const LOG_FILE_NAME: &str = "flash-log.csv";

/// Column headers of row 1.
pub const LOG_HEADER: [&str; 4] = ["Sl-No", "MAC-ID", "Date", "File Name"];

/// One flash event to be recorded.
#[derive(Debug, Clone)]
pub struct FlashEvent {
    /// Device MAC, colon-separated uppercase hex.
    pub mac: String,
    /// File name of the flashed image.
    pub firmware_file_name: String,
    /// Date of the flash.
    pub date: NaiveDate,
}

impl FlashEvent {
    /// Build an event for `outcome`, dated today.
    pub fn from_outcome(outcome: &FlashOutcome) -> Self {
        Self {
            mac: outcome.mac.clone(),
            firmware_file_name: outcome.firmware_file_name.clone(),
            date: chrono::Local::now().date_naive(),
        }
    }
}

/// Appends flash events to the log file, keeping the row counter in the
/// given config directory.
#[derive(Debug)]
pub struct Logbook {
    counter_dir: PathBuf,
}

impl Logbook {
    /// A logbook persisting its counter under `counter_dir`.
    pub fn new(counter_dir: impl Into<PathBuf>) -> Self {
        Self {
            counter_dir: counter_dir.into(),
        }
    }

    /// A logbook using the per-user config directory for its counter.
    pub fn per_user() -> Result<Self> {
        Ok(Self::new(crate::settings::config_dir()?))
    }

    /// Path of the log file inside `dest_dir`.
    pub fn log_path(dest_dir: &Path) -> PathBuf {
        dest_dir.join(LOG_FILE_NAME)
    }

    /// Append one row for `event` to the log in `dest_dir`.
    ///
    /// Creates the file with its header row when absent (resetting the
    /// counter to the first data row). Returns the sequence number
    /// written. Failures surface as [`Error::FileAccess`] for the
    /// operator to resolve (e.g. close the file in another program);
    /// nothing is retried and the counter is only advanced after a
    /// successful write.
    pub fn append(&self, event: &FlashEvent, dest_dir: &Path) -> Result<u32> {
        let path = Self::log_path(dest_dir);
        let mut counter = LogCounter::load_from(&self.counter_dir)?;

        let is_new = !path.exists();
        if is_new {
            counter = LogCounter {
                next_row: FIRST_DATA_ROW,
            };
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::file_access(&path, e))?;
        let mut writer = csv::Writer::from_writer(file);

        if is_new {
            writer
                .write_record(LOG_HEADER)
                .map_err(|e| csv_error(&path, e))?;
        }

        let sequence = counter.next_row - 1;
        writer
            .write_record([
                sequence.to_string(),
                event.mac.clone(),
                event.date.format("%Y-%m-%d").to_string(),
                event.firmware_file_name.clone(),
            ])
            .map_err(|e| csv_error(&path, e))?;
        writer.flush().map_err(|e| Error::file_access(&path, e))?;

        counter.next_row += 1;
        counter.save_to(&self.counter_dir)?;

        info!(
            "Logged flash #{sequence}: {} / {} to {}",
            event.mac,
            event.firmware_file_name,
            path.display()
        );
        Ok(sequence)
    }
}

fn csv_error(path: &Path, err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::file_access(path, io),
        other => Error::file_access(path, std::io::Error::other(format!("{other:?}"))),
    }
}
