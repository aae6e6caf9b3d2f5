//! # Keeper — tiny durable metadata records
//!
//! The aggregator and every shard persist a small metadata record (the
//! "keeper"): format/version counters for the aggregator, the covered-range
//! lower bound for a shard. These records must survive crashes at any
//! point, so they are written with the same discipline throughout: write
//! the full record to `<path>.tmp`, fsync, rename over the target. A
//! keeper file is never partially visible.
//!
//! ## File Format
//!
//! ```text
//! [magic: u32 LE][crc32: u32 LE][payload_len: u32 LE][payload][trailing]
//! ```
//!
//! The CRC covers `payload_len`, `payload`, and `trailing`. The payload is
//! the owner's fixed-size record; the trailing bytes are free-form (a shard
//! stores its lower-bound key there, so the covered range can be recovered
//! without replaying the shard's log).

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;

const KEEPER_MAGIC: u32 = 0x4C41_4F48; // "HOAL"

/// Errors that can occur reading or writing a keeper file.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Bad magic, short file, or CRC mismatch.
    #[error("corrupt keeper file")]
    Corrupt,
}

/// Writes a keeper record atomically (tmp + fsync + rename).
///
/// On platforms where rename-over-existing can fail (Windows antivirus
/// holding the target), falls back to a direct truncate-and-write, which is
/// still safe because the record is tiny and fsynced.
pub fn write_keeper<P: AsRef<Path>>(
    path: P,
    payload: &[u8],
    trailing: &[u8],
) -> Result<(), KeeperError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    let mut buf = Vec::with_capacity(12 + payload.len() + trailing.len());
    buf.extend_from_slice(&KEEPER_MAGIC.to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]); // crc, filled below
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(trailing);

    let mut hasher = Crc32::new();
    hasher.update(&buf[8..]);
    let crc = hasher.finalize();
    buf[4..8].copy_from_slice(&crc.to_le_bytes());

    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(&buf)?;
        f.flush()?;
        f.sync_all()?;
    }

    if fs::rename(&tmp_path, path).is_err() {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        f.write_all(&buf)?;
        f.flush()?;
        f.sync_all()?;
        let _ = fs::remove_file(&tmp_path);
    }

    // Make the rename itself durable.
    if let Some(parent) = path.parent() {
        if let Ok(d) = File::open(parent) {
            let _ = d.sync_all();
        }
    }

    Ok(())
}

/// Reads and validates a keeper record, returning `(payload, trailing)`.
pub fn read_keeper<P: AsRef<Path>>(path: P) -> Result<(Vec<u8>, Vec<u8>), KeeperError> {
    let data = fs::read(path)?;
    if data.len() < 12 {
        return Err(KeeperError::Corrupt);
    }

    let magic = LittleEndian::read_u32(&data[0..4]);
    if magic != KEEPER_MAGIC {
        return Err(KeeperError::Corrupt);
    }

    let crc = LittleEndian::read_u32(&data[4..8]);
    let mut hasher = Crc32::new();
    hasher.update(&data[8..]);
    if hasher.finalize() != crc {
        return Err(KeeperError::Corrupt);
    }

    let payload_len = LittleEndian::read_u32(&data[8..12]) as usize;
    if 12 + payload_len > data.len() {
        return Err(KeeperError::Corrupt);
    }

    let payload = data[12..12 + payload_len].to_vec();
    let trailing = data[12 + payload_len..].to_vec();
    Ok((payload, trailing))
}

/// Whether a keeper file exists at `path`.
pub fn keeper_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_file()
}
