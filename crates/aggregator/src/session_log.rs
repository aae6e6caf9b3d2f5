//! Human-readable session log.
//!
//! Part of the on-disk format: `log.txt` records the current session,
//! `log_prev.txt` the one before it. Rotation happens on open. Lines are
//! best-effort — a failed write never fails the operation that produced
//! it.

use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LOG_FILENAME: &str = "log.txt";
pub const LOG_PREV_FILENAME: &str = "log_prev.txt";

pub(crate) struct SessionLog {
    file: Mutex<File>,
}

impl SessionLog {
    /// Rotates `log.txt` to `log_prev.txt` and starts a fresh session log.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        let prev = dir.join(LOG_PREV_FILENAME);
        if prev.exists() {
            fs::remove_file(&prev)?;
        }
        let current = dir.join(LOG_FILENAME);
        if current.exists() {
            fs::rename(&current, &prev)?;
        }
        Ok(Self {
            file: Mutex::new(File::create(current)?),
        })
    }

    /// Appends one timestamped line, best-effort.
    pub fn line(&self, msg: impl AsRef<str>) {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut file = self.file.lock();
        let _ = writeln!(file, "[{millis}] {}", msg.as_ref());
    }
}
