//! # WAL — shard record log
//!
//! The single durable file behind every shard of a ShoalKV store. Each
//! mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended here **before** the corresponding in-memory update. On shard
//! open the log is replayed to reconstruct the index, guaranteeing that no
//! acknowledged write is lost.
//!
//! Unlike a classic write-ahead log, this log is never truncated: it *is*
//! the shard's storage. It therefore carries a **capacity**. An append that
//! would push the file past its capacity is refused with `Ok(false)` — the
//! saturation signal that makes the aggregator split the shard in two.
//! Saturation is a protocol outcome, never an error.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body (Put): `[seq: u64][op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Body (Del): `[seq: u64][op=1: u8][key_len: u32][key]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{LogWriter, LogReader, LogRecord};
//!
//! let mut w = LogWriter::open("shard/log", 4 << 20).unwrap();
//! let accepted = w.append(&LogRecord::Put {
//!     seq: 1,
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }, true).unwrap();
//! assert!(accepted);
//! drop(w);
//!
//! let mut r = LogReader::open("shard/log").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Preferred I/O granularity; the writer's scratch buffer starts at one page.
pub const PAGE_SIZE: usize = 4096;

/// Frames past this size are rejected as corruption during replay.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// A single log record representing either a key-value insertion or a
/// deletion.
///
/// Each record carries the **sequence number** assigned by the aggregator's
/// sequence generator. Replay hands records back in file order; the index
/// resolves overwrites by comparing sequence numbers, which is what lets a
/// split compaction re-copy old records underneath newer ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A key-value insertion.
    Put {
        seq: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// A key deletion (tombstone).
    Del { seq: u64, key: Vec<u8> },
}

impl LogRecord {
    /// Size of the full on-disk frame (header + body) for this record.
    pub fn frame_len(&self) -> u64 {
        let body = match self {
            LogRecord::Put { key, value, .. } => 8 + 1 + 4 + key.len() + 4 + value.len(),
            LogRecord::Del { key, .. } => 8 + 1 + 4 + key.len(),
        };
        (8 + body) as u64
    }

    pub fn seq(&self) -> u64 {
        match self {
            LogRecord::Put { seq, .. } | LogRecord::Del { seq, .. } => *seq,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            LogRecord::Put { key, .. } | LogRecord::Del { key, .. } => key,
        }
    }

    /// Serializes the frame body (everything the CRC covers) onto `out`.
    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            LogRecord::Put { seq, key, value } => {
                out.extend_from_slice(&seq.to_le_bytes());
                out.push(OP_PUT);
                out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                out.extend_from_slice(key);
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(value);
            }
            LogRecord::Del { seq, key } => {
                out.extend_from_slice(&seq.to_le_bytes());
                out.push(OP_DEL);
                out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                out.extend_from_slice(key);
            }
        }
    }

    /// Parses one CRC-validated frame body.
    fn decode(body: &[u8]) -> Result<Self, LogError> {
        let (seq, rest) = take_u64(body)?;
        let (op, rest) = take_u8(rest)?;
        let (key, rest) = take_sized(rest)?;
        match op {
            OP_PUT => {
                let (value, _) = take_sized(rest)?;
                Ok(LogRecord::Put {
                    seq,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })
            }
            OP_DEL => Ok(LogRecord::Del {
                seq,
                key: key.to_vec(),
            }),
            _ => Err(LogError::Corrupt),
        }
    }
}

fn take_u8(b: &[u8]) -> Result<(u8, &[u8]), LogError> {
    match b.split_first() {
        Some((v, rest)) => Ok((*v, rest)),
        None => Err(LogError::Corrupt),
    }
}

fn take_u64(b: &[u8]) -> Result<(u64, &[u8]), LogError> {
    if b.len() < 8 {
        return Err(LogError::Corrupt);
    }
    Ok((LittleEndian::read_u64(&b[..8]), &b[8..]))
}

/// A length-prefixed byte run: `[len: u32 LE][bytes]`.
fn take_sized(b: &[u8]) -> Result<(&[u8], &[u8]), LogError> {
    if b.len() < 4 {
        return Err(LogError::Corrupt);
    }
    let len = LittleEndian::read_u32(&b[..4]) as usize;
    let rest = &b[4..];
    if rest.len() < len {
        return Err(LogError::Corrupt);
    }
    Ok(rest.split_at(len))
}

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation or contained an unknown op code.
    #[error("corrupt record")]
    Corrupt,
}

/// Append-only log writer with a byte capacity.
///
/// Each record is framed in a reusable scratch buffer and handed to the
/// file in one `write_all` call. When a call passes `sync = true`, the
/// append is followed by `sync_all()` (fsync) so the record is durable
/// before the call returns.
///
/// Two append entry points exist:
///
/// - [`append`](LogWriter::append) honours the capacity and reports
///   saturation with `Ok(false)`.
/// - [`journal`](LogWriter::journal) writes unconditionally. Compaction
///   workers use it to keep an origin log authoritative while its contents
///   migrate, and to bulk-load product shards.
pub struct LogWriter {
    file: File,
    len: u64,
    capacity: u64,
    /// Reusable scratch buffer holding the frame being assembled.
    buf: Vec<u8>,
}

impl LogWriter {
    /// Opens (or creates) a log file in append mode.
    ///
    /// The current file length counts against `capacity`, so reopening a
    /// saturated log yields a writer that is still saturated.
    pub fn open<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            capacity,
            buf: Vec::with_capacity(PAGE_SIZE),
        })
    }

    /// Bytes currently in the file.
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Whether `extra` more bytes still fit under the capacity.
    pub fn fits(&self, extra: u64) -> bool {
        self.len + extra <= self.capacity
    }

    /// Serializes `record` and appends it, honouring the capacity.
    ///
    /// Returns `Ok(false)` — writing nothing — when the frame would push the
    /// file past its capacity. That is the saturation signal, not an error.
    pub fn append(&mut self, record: &LogRecord, sync: bool) -> Result<bool, LogError> {
        if !self.fits(record.frame_len()) {
            return Ok(false);
        }
        self.journal(record, sync)?;
        Ok(true)
    }

    /// Serializes `record` and appends it unconditionally.
    pub fn journal(&mut self, record: &LogRecord, sync: bool) -> Result<(), LogError> {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; 8]); // header slot, sealed below
        record.encode_body(&mut self.buf);
        self.seal_header()?;

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        self.len += self.buf.len() as u64;

        if sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Backfills the scratch buffer's 8-byte header: the frame length
    /// (body + CRC, excluding the length word itself) and the CRC over
    /// the body.
    fn seal_header(&mut self) -> Result<(), LogError> {
        let frame_len = (self.buf.len() - 8) as u64 + 4;
        if frame_len > u32::MAX as u64 {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "log record too large (exceeds u32::MAX bytes)",
            )));
        }
        let crc = crc32fast::hash(&self.buf[8..]);
        self.buf[..4].copy_from_slice(&(frame_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Forces all buffered data to disk via `sync_all()`.
    ///
    /// Used when individual appends ran with `sync = false` and the caller
    /// wants a durability point (e.g. a batch acknowledgement, or a
    /// compaction product about to be published).
    pub fn sync_to_disk(&mut self) -> Result<(), LogError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Sequential log reader that yields valid records.
///
/// The reader is generic over any `Read` implementor, allowing it to be
/// used with real files (`LogReader<File>`) or in-memory buffers for
/// testing.
///
/// During replay, each record's CRC32 is verified. A truncated tail record
/// (e.g. from a crash mid-write) is treated as a clean EOF — all
/// fully-written records before it are still returned.
pub struct LogReader<R: Read> {
    rdr: BufReader<R>,
}

impl LogReader<File> {
    /// Opens an existing log file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LogReader<File>, LogError> {
        let f = File::open(path)?;
        Ok(LogReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> LogReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        LogReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every valid record, calling `apply` for each one.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** (no more bytes) -> returns `Ok(())`.
    /// - **Truncated tail** (partial record at end) -> returns `Ok(())`
    ///   after yielding all complete records before it.
    /// - **CRC mismatch** -> returns `Err(LogError::Corrupt)`.
    /// - **Unknown op code** -> returns `Err(LogError::Corrupt)`.
    /// - **I/O error** -> returns `Err(LogError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), LogError>
    where
        F: FnMut(LogRecord),
    {
        let mut body = Vec::with_capacity(PAGE_SIZE);
        while self.next_body(&mut body)? {
            apply(LogRecord::decode(&body)?);
        }
        Ok(())
    }

    /// Reads the next frame's body into `scratch` and validates its CRC.
    /// Returns `Ok(false)` at clean EOF or a truncated tail.
    fn next_body(&mut self, scratch: &mut Vec<u8>) -> Result<bool, LogError> {
        let Some(frame_len) = self.read_word()? else {
            return Ok(false);
        };
        // frame_len counts the CRC word but not itself.
        if frame_len <= 4 || frame_len > MAX_FRAME_LEN {
            return Err(LogError::Corrupt);
        }
        let Some(want_crc) = self.read_word()? else {
            return Ok(false);
        };

        scratch.resize((frame_len - 4) as usize, 0);
        match self.rdr.read_exact(scratch) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(LogError::Io(e)),
        }

        if crc32fast::hash(scratch) != want_crc {
            return Err(LogError::Corrupt);
        }
        Ok(true)
    }

    /// One little-endian u32, or `None` at EOF / mid-word truncation.
    fn read_word(&mut self) -> Result<Option<u32>, LogError> {
        let mut word = [0u8; 4];
        match self.rdr.read_exact(&mut word) {
            Ok(()) => Ok(Some(u32::from_le_bytes(word))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(LogError::Io(e)),
        }
    }
}
