//! Aggregator strong metadata.
//!
//! A 24-byte record persisted through the keeper crate: format version,
//! database version, and the monotonic counter that names new shard
//! directories. The counter is persisted *before* any directory is created
//! under the allocated name, keeping it strictly greater than every
//! integer-named shard on disk at all times.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Highest on-disk layout version this build understands.
pub const FORMAT_VERSION: u64 = 1;
/// Highest record-semantics version this build understands.
pub const DB_VERSION: u64 = 1;

/// Name of the aggregator's metadata record in its root directory.
pub const KEEPER_FILENAME: &str = "keeper";

#[derive(Debug, Clone, Copy)]
pub(crate) struct StrongMeta {
    pub format_version: u64,
    pub db_version: u64,
    pub counter: u64,
}

impl StrongMeta {
    pub fn fresh(counter: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            db_version: DB_VERSION,
            counter,
        }
    }

    fn encode(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        LittleEndian::write_u64(&mut buf[0..8], self.format_version);
        LittleEndian::write_u64(&mut buf[8..16], self.db_version);
        LittleEndian::write_u64(&mut buf[16..24], self.counter);
        buf
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != 24 {
            return Err(Error::Corruption("strong meta payload size".to_string()));
        }
        Ok(Self {
            format_version: LittleEndian::read_u64(&payload[0..8]),
            db_version: LittleEndian::read_u64(&payload[8..16]),
            counter: LittleEndian::read_u64(&payload[16..24]),
        })
    }
}

/// Durable holder of the aggregator's [`StrongMeta`], internally
/// synchronised so name allocation can run from any thread.
pub(crate) struct MetaKeeper {
    path: PathBuf,
    state: Mutex<StrongMeta>,
}

impl MetaKeeper {
    pub fn create(path: PathBuf, meta: StrongMeta) -> Result<Self> {
        keeper::write_keeper(&path, &meta.encode(), &[])?;
        Ok(Self {
            path,
            state: Mutex::new(meta),
        })
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let (payload, _trailing) = keeper::read_keeper(&path)?;
        let meta = StrongMeta::decode(&payload)?;
        Ok(Self {
            path,
            state: Mutex::new(meta),
        })
    }

    pub fn get(&self) -> StrongMeta {
        *self.state.lock()
    }

    /// Replaces the record wholesale (recovery rewrites it fresh).
    pub fn rewrite(&self, meta: StrongMeta) -> Result<()> {
        let mut state = self.state.lock();
        keeper::write_keeper(&self.path, &meta.encode(), &[])?;
        *state = meta;
        Ok(())
    }

    /// Allocates one counter value for a new shard directory name. The
    /// incremented counter hits disk before the value is handed out.
    pub fn alloc_name(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let allocated = state.counter;
        let next = StrongMeta {
            counter: allocated + 1,
            ..*state
        };
        keeper::write_keeper(&self.path, &next.encode(), &[])?;
        *state = next;
        Ok(allocated)
    }
}
