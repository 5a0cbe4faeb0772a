//! Log capture - JSON-array framed activity log on disk
//!
//! The backing file holds one recording epoch at a time:
//! ```text
//! [
//!   { ...first entry... }
//!   ,{ ...next entry... }
//! ]
//! ```
//! The closing bracket is only written by [`LogCapture::finalize`], so a
//! finalized file always parses as a JSON array.

use chrono::{SecondsFormat, Utc};
use simiot_shared::{LogEntry, LogLevel};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const EPOCH_OPEN: &str = "[\n";
const EPOCH_CLOSE: &str = "]\n";

#[derive(Debug)]
struct EpochState {
    open: bool,
    first_entry: bool,
    entries: usize,
}

/// Sole writer of the log backing file
#[derive(Debug)]
pub struct LogCapture {
    path: PathBuf,
    state: Mutex<EpochState>,
}

impl LogCapture {
    /// Truncate the backing file and open the first epoch
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let capture = Self {
            path: path.into(),
            state: Mutex::new(EpochState {
                open: false,
                first_entry: true,
                entries: 0,
            }),
        };
        capture.begin_epoch()?;
        Ok(capture)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discard prior entries and start a new epoch with an empty array frame
    pub fn begin_epoch(&self) -> io::Result<()> {
        let mut state = self.lock();
        fs::write(&self.path, EPOCH_OPEN)?;
        state.open = true;
        state.first_entry = true;
        state.entries = 0;
        Ok(())
    }

    /// Append an entry stamped with the current time
    pub fn record(&self, level: LogLevel, message: &str) -> io::Result<()> {
        self.record_entry(&LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.to_string(),
        })
    }

    /// Append an entry with comma framing; dropped once the epoch is closed
    pub fn record_entry(&self, entry: &LogEntry) -> io::Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Ok(());
        }

        let body = serde_json::to_string_pretty(entry)?;
        let prefix = if state.first_entry { "  " } else { "  ," };

        let mut file = self.append_handle()?;
        file.write_all(format!("{prefix}{body}\n").as_bytes())?;

        state.first_entry = false;
        state.entries += 1;
        Ok(())
    }

    /// Close the open epoch; later calls are no-ops
    pub fn finalize(&self) -> io::Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Ok(());
        }
        self.append_handle()?.write_all(EPOCH_CLOSE.as_bytes())?;
        state.open = false;
        Ok(())
    }

    /// Copy the backing file to `dest`, closing the copy's frame if the epoch is open
    ///
    /// Taken under the writer lock so no entry is half-written in the copy.
    pub fn snapshot_to(&self, dest: &Path) -> io::Result<u64> {
        let state = self.lock();
        let mut copied = fs::copy(&self.path, dest)?;
        if state.open {
            let mut file = OpenOptions::new().append(true).open(dest)?;
            file.write_all(EPOCH_CLOSE.as_bytes())?;
            copied += EPOCH_CLOSE.len() as u64;
        }
        Ok(copied)
    }

    /// Entries recorded in the current epoch
    pub fn entry_count(&self) -> usize {
        self.lock().entries
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn append_handle(&self) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    fn lock(&self) -> MutexGuard<'_, EpochState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
