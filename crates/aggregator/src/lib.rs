//! # Aggregator — ShoalKV's routing and lifecycle core
//!
//! An embedded, persistent, ordered key→value store built as a set of
//! range-owned shards behind one router. Every read and write goes to
//! exactly one shard; shards split in two when they saturate and merge
//! back when they shrink and cool down, all online.
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                   AGGREGATOR                      │
//! │                                                   │
//! │ router.rs   lower-bound map: "" ─ "g" ─ "p" ...   │
//! │               |  best match, per-slot RwLock      │
//! │               v                                   │
//! │ write.rs    put/remove/write ──► shard            │
//! │               |  saturated?                       │
//! │               v         yes                       │
//! │ split.rs    Split1To2 worker, publish 2 products  │
//! │                                                   │
//! │ gc.rs       merge adjacent small shards (2→1),    │
//! │             evict coldest past the open cap       │
//! │                                                   │
//! │ recovery.rs reconcile `_` / `+` / tmp dirs at     │
//! │             open, rebuild the routing table       │
//! └───────────────────────────────────────────────────┘
//!        |                |                 |
//!        v                v                 v
//!     <int>/          <int>_<int>/     <int>+<int>-/
//!     shard dirs      split in flight  merge product
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <name>/
//! ├── lock          single-writer exclusive file lock
//! ├── keeper        format/db version + shard-name counter
//! ├── log.txt       session log (log_prev.txt: previous session)
//! └── <shards...>   one directory per shard
//! ```
//!
//! ## Concurrency
//!
//! Parallel OS threads, no cooperative suspension. One RwLock per shard
//! handle; one RwLock over the routing table held only for a single
//! `upper_bound` step; atomics for the open-shard count and the GC
//! trigger. A split or merge appears atomically at the routing level: the
//! old handle is marked dirty and the slot republished under the table
//! write lock — a racing router either sees the pre-state consistently or
//! re-routes.

mod error;
mod gc;
mod meta;
mod node;
mod options;
mod read;
mod recovery;
mod router;
mod session_log;
mod split;
mod write;

pub use error::{Error, Result};
pub use options::{Options, DEFAULT_MAX_DBS, DEFAULT_SHARD_CAPACITY};
pub use shard::{ReadOptions, Snapshot, WriteOptions};

use fs2::FileExt;
use meta::{MetaKeeper, StrongMeta, DB_VERSION, FORMAT_VERSION};
use node::{NodeBody, NodeRef, Store};
use parking_lot::RwLock;
use session_log::SessionLog;
use shard::{SeqGenerator, Shard};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Name of the exclusive lock file in the aggregator's root directory.
pub const LOCK_FILENAME: &str = "lock";

/// The sharded store. Cheap operations (`get`, `put`) take `&self`; the
/// whole struct is `Send + Sync` and meant to be shared across threads.
pub struct Aggregator {
    dir: PathBuf,
    options: Options,

    /// Routing table: lower-bound key → shard handle. The smallest bound
    /// is always the empty string, so every key has exactly one
    /// responsible handle.
    table: RwLock<BTreeMap<Vec<u8>, NodeRef>>,

    meta: MetaKeeper,
    seq_gen: Arc<SeqGenerator>,

    /// Number of handles whose shard is currently open.
    operating_dbs: AtomicUsize,

    /// Armed when an open pushes the count past the cap; claimed (CAS)
    /// by exactly one router, which then runs the GC pass.
    gc_flag: AtomicBool,

    session_log: SessionLog,

    /// Held for the process lifetime; guards against a second writer.
    _lock_file: File,
}

impl Aggregator {
    /// Opens or creates the store at `path` per `options`.
    ///
    /// Opening an existing store validates versions, reconciles
    /// interrupted compactions (see `recovery.rs`), rewrites the metadata
    /// with a fresh counter, and rebuilds the routing table from each
    /// surviving shard's keeper — without opening any shard.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        if dir.is_dir() {
            Self::open_existing(dir, options)
        } else {
            Self::create_new(dir, options)
        }
    }

    fn open_existing(dir: PathBuf, options: Options) -> Result<Self> {
        if options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "database already exists: {}",
                dir.display()
            )));
        }
        let lock_file = acquire_lock(&dir)?;

        let meta = MetaKeeper::open(dir.join(meta::KEEPER_FILENAME))?;
        let current = meta.get();
        if current.format_version > FORMAT_VERSION || current.db_version > DB_VERSION {
            return Err(Error::InvalidArgument(format!(
                "on-disk format v{}.{} is newer than supported v{FORMAT_VERSION}.{DB_VERSION}",
                current.format_version, current.db_version
            )));
        }

        let (survivors, counter) = recovery::recover(&dir)?;
        meta.rewrite(StrongMeta::fresh(counter))?;

        let seq_gen = Arc::new(SeqGenerator::new());
        let mut table: BTreeMap<Vec<u8>, NodeRef> = BTreeMap::new();
        for shard_dir in survivors {
            let from_key = shard::read_range_keeper(&shard_dir)?;
            table.insert(from_key, NodeBody::closed(shard_dir));
        }

        let mut operating = 0usize;
        if table.is_empty() {
            // Every shard was lost; re-seed so routing has its sentinel.
            let name = meta.alloc_name()?;
            let shard_dir = dir.join(name.to_string());
            let first = Shard::create(
                shard_dir.clone(),
                Vec::new(),
                Arc::clone(&seq_gen),
                options.shard_capacity,
            )?;
            table.insert(
                Vec::new(),
                NodeBody::with_store(Store::Single(first), shard_dir, 0),
            );
            operating = 1;
            tracing::warn!(dir = %dir.display(), "no shards survived recovery, re-seeded");
        } else if let Some(first_bound) = table.keys().next().cloned() {
            if !first_bound.is_empty() {
                // The begin sentinel must exist; relabel the lowest shard.
                if let Some(node) = table.remove(&first_bound) {
                    table.insert(Vec::new(), node);
                }
                tracing::warn!(
                    bound = ?first_bound,
                    "lowest shard bound was not the begin sentinel, relabelled"
                );
            }
        }

        let session_log = SessionLog::open(&dir)?;
        session_log.line("start OK");
        tracing::info!(dir = %dir.display(), shards = table.len(), "aggregator opened");

        Ok(Self {
            dir,
            options,
            table: RwLock::new(table),
            meta,
            seq_gen,
            operating_dbs: AtomicUsize::new(operating),
            gc_flag: AtomicBool::new(false),
            session_log,
            _lock_file: lock_file,
        })
    }

    fn create_new(dir: PathBuf, options: Options) -> Result<Self> {
        if !options.create_if_missing {
            return Err(Error::NotFound(format!(
                "database not found: {}",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;
        let lock_file = acquire_lock(&dir)?;

        // Counter starts at 1: shard "0" exists from birth.
        let meta = MetaKeeper::create(dir.join(meta::KEEPER_FILENAME), StrongMeta::fresh(1))?;
        let seq_gen = Arc::new(SeqGenerator::new());

        let shard_dir = dir.join("0");
        let first = Shard::create(
            shard_dir.clone(),
            Vec::new(),
            Arc::clone(&seq_gen),
            options.shard_capacity,
        )?;
        let mut table = BTreeMap::new();
        table.insert(
            Vec::new(),
            NodeBody::with_store(Store::Single(first), shard_dir, 0),
        );

        let session_log = SessionLog::open(&dir)?;
        session_log.line("start OK");
        tracing::info!(dir = %dir.display(), "aggregator created");

        Ok(Self {
            dir,
            options,
            table: RwLock::new(table),
            meta,
            seq_gen,
            operating_dbs: AtomicUsize::new(1),
            gc_flag: AtomicBool::new(false),
            session_log,
            _lock_file: lock_file,
        })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of shards in the routing table (open or closed).
    pub fn shard_count(&self) -> usize {
        self.table.read().len()
    }

    /// Number of currently open shards.
    pub fn operating_dbs(&self) -> usize {
        self.operating_dbs.load(Ordering::Acquire)
    }
}

/// Shutdown: drain pending compaction work, close every shard, and give
/// compaction artefacts their final integer names. Rename failures are
/// logged and swallowed — the artefact names are still recoverable on the
/// next open.
impl Drop for Aggregator {
    fn drop(&mut self) {
        let table = std::mem::take(self.table.get_mut());
        for (_, node) in table {
            let mut guard = node.write();
            let body = &mut *guard;

            if let Some(store) = body.store.as_mut() {
                while !store.can_release() {
                    if let Err(e) = store.try_apply_pending() {
                        self.session_log
                            .line(format!("drain {} failed: {e}", body.name.display()));
                        break;
                    }
                }
                if let Err(e) = store.sync_files() {
                    self.session_log
                        .line(format!("sync {} failed: {e}", body.name.display()));
                }
            }
            body.store = None;

            let name = body.name.clone();
            if !name.as_os_str().is_empty() && !node::is_regular_name(&name) {
                match self.meta.alloc_name() {
                    Ok(fresh) => {
                        let target = self.dir.join(fresh.to_string());
                        match fs::rename(&name, &target) {
                            Ok(()) => self.session_log.line(format!(
                                "rename {} to {fresh}",
                                name.display()
                            )),
                            Err(e) => self.session_log.line(format!(
                                "rename {} to {fresh} failed, because {e}",
                                name.display()
                            )),
                        }
                    }
                    Err(e) => self
                        .session_log
                        .line(format!("rename {} failed, because {e}", name.display())),
                }
            }
        }
        self.session_log.line("end OK");
    }
}

fn acquire_lock(dir: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(dir.join(LOCK_FILENAME))?;
    file.try_lock_exclusive().map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("database is locked by another process: {}", dir.display()),
        ))
    })?;
    Ok(file)
}

#[cfg(test)]
mod tests;
