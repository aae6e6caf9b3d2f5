//! # Shard — one self-contained single-directory store
//!
//! A shard owns a contiguous key range of a ShoalKV store. On disk it is a
//! directory holding a bounded record log (the data) and a `keeper` file
//! (the covered-range lower bound). In memory it is an ordered index
//! rebuilt from the log on open.
//!
//! ```text
//! <name>/
//! ├── log       record log, capacity-bounded (wal crate)
//! └── keeper    lower-bound key, CRC-protected (keeper crate)
//! ```
//!
//! ## Saturation
//!
//! Every write returns [`WriteOutcome`]. `Saturated` means the log refused
//! the record for capacity — nothing was written, and the aggregator reacts
//! by wrapping the shard in a [`Split1To2`] worker. Saturation is the *only*
//! split trigger; it is never an error.
//!
//! ## Compaction workers
//!
//! [`Split1To2`] and [`Merge2To1`] implement the same write/read surface as
//! a plain shard, so the aggregator can leave one in a routing slot while
//! the compaction runs. See each type for its crash-recovery story.

mod merge;
mod seq;
mod split;

pub use merge::Merge2To1;
pub use seq::{SeqGenerator, Snapshot};
pub use split::Split1To2;

use byteorder::{ByteOrder, LittleEndian};
use memtable::{Memtable, ValueEntry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use wal::{LogError, LogReader, LogRecord, LogWriter};

/// Name of the record log inside a shard directory.
pub const LOG_FILENAME: &str = "log";
/// Name of the metadata record inside a shard directory.
pub const KEEPER_FILENAME: &str = "keeper";
/// Directory-name suffix marking scratch directories, always erased on
/// recovery.
pub const TMP_SUFFIX: &str = "tmp";

/// Errors from shard operations.
#[derive(Debug, Error)]
pub enum ShardError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A log or keeper file failed validation.
    #[error("corrupt shard: {0}")]
    Corrupt(String),
}

impl From<LogError> for ShardError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(io) => ShardError::Io(io),
            LogError::Corrupt => ShardError::Corrupt("log record".to_string()),
        }
    }
}

impl From<keeper::KeeperError> for ShardError {
    fn from(e: keeper::KeeperError) -> Self {
        match e {
            keeper::KeeperError::Io(io) => ShardError::Io(io),
            keeper::KeeperError::Corrupt => ShardError::Corrupt("keeper record".to_string()),
        }
    }
}

/// Outcome of a shard write: the record was applied, or the shard is full
/// and the aggregator must split it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    Saturated,
}

impl WriteOutcome {
    pub fn is_saturated(self) -> bool {
        matches!(self, WriteOutcome::Saturated)
    }
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fsync the record before acknowledging.
    pub sync: bool,
}

/// Per-read options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Read as-of a snapshot. Reads are monotonic read-your-writes; the
    /// store keeps the latest version per key.
    pub snapshot: Option<Snapshot>,
}

/// One open shard.
pub struct Shard {
    dir: PathBuf,
    log: LogWriter,
    mem: Memtable,
    from_key: Vec<u8>,
    seq_gen: Arc<SeqGenerator>,
    capacity: u64,
}

impl Shard {
    /// Creates a fresh shard directory covering keys `>= from_key`.
    pub fn create(
        dir: PathBuf,
        from_key: Vec<u8>,
        seq_gen: Arc<SeqGenerator>,
        capacity: u64,
    ) -> Result<Self, ShardError> {
        fs::create_dir_all(&dir)?;
        write_range_keeper(&dir, &from_key)?;
        let log = LogWriter::open(dir.join(LOG_FILENAME), capacity)?;
        Ok(Self {
            dir,
            log,
            mem: Memtable::new(),
            from_key,
            seq_gen,
            capacity,
        })
    }

    /// Opens an existing shard directory, replaying its log.
    ///
    /// Opens are always read-write: a routed write may land immediately.
    /// The sequence generator is raised past every replayed seq so new
    /// writes always win resolution against recovered entries.
    pub fn open(
        dir: PathBuf,
        seq_gen: Arc<SeqGenerator>,
        capacity: u64,
    ) -> Result<Self, ShardError> {
        let from_key = read_range_keeper(&dir)?;

        let mut mem = Memtable::new();
        let mut max_seq = 0u64;
        let log_path = dir.join(LOG_FILENAME);
        if log_path.is_file() {
            let mut reader = LogReader::open(&log_path)?;
            reader.replay(|rec| {
                max_seq = max_seq.max(rec.seq());
                match rec {
                    LogRecord::Put { seq, key, value } => mem.put(key, value, seq),
                    LogRecord::Del { seq, key } => mem.delete(key, seq),
                }
            })?;
        }
        seq_gen.raise_to(max_seq);

        let log = LogWriter::open(&log_path, capacity)?;
        Ok(Self {
            dir,
            log,
            mem,
            from_key,
            seq_gen,
            capacity,
        })
    }

    /// Inserts a key-value pair.
    pub fn put(
        &mut self,
        opts: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<WriteOutcome, ShardError> {
        let rec = LogRecord::Put {
            seq: self.seq_gen.next(),
            key: key.to_vec(),
            value: value.to_vec(),
        };
        if !self.log.append(&rec, opts.sync)? {
            return Ok(WriteOutcome::Saturated);
        }
        apply_record(&mut self.mem, rec);
        Ok(WriteOutcome::Accepted)
    }

    /// Deletes a key by writing a tombstone.
    pub fn remove(&mut self, opts: &WriteOptions, key: &[u8]) -> Result<WriteOutcome, ShardError> {
        let rec = LogRecord::Del {
            seq: self.seq_gen.next(),
            key: key.to_vec(),
        };
        if !self.log.append(&rec, opts.sync)? {
            return Ok(WriteOutcome::Saturated);
        }
        apply_record(&mut self.mem, rec);
        Ok(WriteOutcome::Accepted)
    }

    /// Applies a sorted batch. All-or-nothing at the saturation check: if
    /// the whole batch does not fit, nothing is written and `Saturated` is
    /// returned.
    pub fn write(
        &mut self,
        opts: &WriteOptions,
        kvs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<WriteOutcome, ShardError> {
        let records: Vec<LogRecord> = kvs
            .iter()
            .map(|(k, v)| LogRecord::Put {
                seq: self.seq_gen.next(),
                key: k.clone(),
                value: v.clone(),
            })
            .collect();

        let total: u64 = records.iter().map(|r| r.frame_len()).sum();
        if !self.log.fits(total) {
            return Ok(WriteOutcome::Saturated);
        }

        for rec in records {
            self.log.journal(&rec, false)?;
            apply_record(&mut self.mem, rec);
        }
        if opts.sync {
            self.log.sync_to_disk()?;
        }
        Ok(WriteOutcome::Accepted)
    }

    /// Looks up a key. `Ok(None)` covers both "never written" and
    /// "tombstoned".
    pub fn get(&self, _opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>, ShardError> {
        Ok(self
            .mem
            .get_entry(key)
            .and_then(|e| e.value.as_ref().cloned()))
    }

    /// The covered range's lower bound (not the smallest present key).
    pub fn smallest_key(&self) -> &[u8] {
        &self.from_key
    }

    /// Bytes of log consumed.
    pub fn space_usage(&self) -> u64 {
        self.log.len_bytes()
    }

    /// A plain shard never pins in-flight work.
    pub fn can_release(&self) -> bool {
        true
    }

    /// No pending work on a plain shard.
    pub fn try_apply_pending(&mut self) -> Result<(), ShardError> {
        Ok(())
    }

    /// The shard's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fsyncs the log.
    pub fn sync_files(&mut self) -> Result<(), ShardError> {
        self.log.sync_to_disk()?;
        Ok(())
    }

    /// Renames the shard directory in place. Open file handles survive the
    /// rename on POSIX systems.
    pub fn rename_dir(&mut self, new_dir: PathBuf) -> Result<(), ShardError> {
        fs::rename(&self.dir, &new_dir)?;
        self.dir = new_dir;
        Ok(())
    }

    /// Deletes the shard from disk.
    ///
    /// The directory is first renamed with the scratch suffix (atomic),
    /// then removed. A crash in between leaves only a `…tmp` directory,
    /// which recovery always erases — the shard is gone either way.
    pub fn destroy(self) -> Result<(), ShardError> {
        let dir = self.dir.clone();
        drop(self);
        let mut tmp_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tmp_name.push_str(TMP_SUFFIX);
        let tmp_dir = dir.with_file_name(tmp_name);
        fs::rename(&dir, &tmp_dir)?;
        fs::remove_dir_all(&tmp_dir)?;
        Ok(())
    }

    pub(crate) fn mem(&self) -> &Memtable {
        &self.mem
    }

    pub(crate) fn mem_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.mem.get_entry(key)
    }

    pub(crate) fn seq_gen(&self) -> &Arc<SeqGenerator> {
        &self.seq_gen
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Unconditional append, bypassing the capacity. Compaction-only.
    pub(crate) fn journal(&mut self, rec: &LogRecord, sync: bool) -> Result<(), ShardError> {
        self.log.journal(rec, sync)?;
        Ok(())
    }

    /// Journals an entry under its *original* seq and applies it to the
    /// index. Used to load compaction products; seq resolution in the
    /// memtable keeps late-arriving old copies from clobbering fresh
    /// writes.
    pub(crate) fn absorb(
        &mut self,
        key: Vec<u8>,
        entry: ValueEntry,
        sync: bool,
    ) -> Result<(), ShardError> {
        let rec = match &entry.value {
            Some(v) => LogRecord::Put {
                seq: entry.seq,
                key: key.clone(),
                value: v.clone(),
            },
            None => LogRecord::Del {
                seq: entry.seq,
                key: key.clone(),
            },
        };
        self.log.journal(&rec, sync)?;
        self.mem.apply(key, entry);
        Ok(())
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("dir", &self.dir)
            .field("from_key", &self.from_key)
            .field("entries", &self.mem.len())
            .field("space_usage", &self.space_usage())
            .finish()
    }
}

fn apply_record(mem: &mut Memtable, rec: LogRecord) {
    match rec {
        LogRecord::Put { seq, key, value } => mem.put(key, value, seq),
        LogRecord::Del { seq, key } => mem.delete(key, seq),
    }
}

/// Writes a shard's range keeper: payload is the lower-bound length, the
/// trailing bytes carry the lower bound itself.
pub fn write_range_keeper(dir: &Path, from_key: &[u8]) -> Result<(), ShardError> {
    let mut payload = [0u8; 4];
    LittleEndian::write_u32(&mut payload, from_key.len() as u32);
    keeper::write_keeper(dir.join(KEEPER_FILENAME), &payload, from_key)?;
    Ok(())
}

/// Reads a shard's range keeper, returning the lower-bound key. This is
/// how the aggregator learns a closed shard's covered range without
/// replaying its log.
pub fn read_range_keeper(dir: &Path) -> Result<Vec<u8>, ShardError> {
    let (payload, trailing) = keeper::read_keeper(dir.join(KEEPER_FILENAME))?;
    if payload.len() != 4 {
        return Err(ShardError::Corrupt("range keeper payload".to_string()));
    }
    let from_k_len = LittleEndian::read_u32(&payload) as usize;
    if from_k_len > trailing.len() {
        return Err(ShardError::Corrupt("range keeper length".to_string()));
    }
    Ok(trailing[..from_k_len].to_vec())
}

/// Rebuilds a shard's keeper from its log.
///
/// Used by recovery when a keeper is missing or unreadable. The lower
/// bound cannot be recovered exactly, so the smallest replayed key is used
/// (empty for an empty log, which is also correct for the first shard).
pub fn repair_shard(dir: &Path) -> Result<(), ShardError> {
    let mut mem = Memtable::new();
    let log_path = dir.join(LOG_FILENAME);
    if log_path.is_file() {
        let mut reader = LogReader::open(&log_path)?;
        reader.replay(|rec| match rec {
            LogRecord::Put { seq, key, value } => mem.put(key, value, seq),
            LogRecord::Del { seq, key } => mem.delete(key, seq),
        })?;
    }
    let from_key = mem.first_key().map(|k| k.to_vec()).unwrap_or_default();
    tracing::info!(dir = %dir.display(), "rebuilt shard keeper");
    write_range_keeper(dir, &from_key)
}

#[cfg(test)]
mod tests;
