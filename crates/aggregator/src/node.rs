//! Shard handles.
//!
//! Each routing slot holds a reference-counted node: the shard (or the
//! split worker currently standing in for it), the cached directory, a
//! dirty flag, and a hit counter. The node's RwLock is taken *after* the
//! routing-table lock is released, and handed to the caller as an owned
//! guard — the guard alone keeps the node alive even if a concurrent
//! compaction republishes the slot underneath it.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use shard::{ReadOptions, Shard, ShardError, Split1To2, WriteOptions, WriteOutcome};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub(crate) type NodeRef = Arc<RwLock<NodeBody>>;
pub(crate) type NodeReadGuard = ArcRwLockReadGuard<RawRwLock, NodeBody>;
pub(crate) type NodeWriteGuard = ArcRwLockWriteGuard<RawRwLock, NodeBody>;

/// What currently occupies a routing slot: a plain shard, or the split
/// worker draining one. Closed sets dispatch by variant, not by trait
/// object — both faces expose the same contract.
pub(crate) enum Store {
    Single(Shard),
    Splitting(Box<Split1To2>),
}

impl Store {
    pub fn put(
        &mut self,
        opts: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<WriteOutcome, ShardError> {
        match self {
            Store::Single(s) => s.put(opts, key, value),
            Store::Splitting(w) => w.put(opts, key, value),
        }
    }

    pub fn remove(&mut self, opts: &WriteOptions, key: &[u8]) -> Result<WriteOutcome, ShardError> {
        match self {
            Store::Single(s) => s.remove(opts, key),
            Store::Splitting(w) => w.remove(opts, key),
        }
    }

    pub fn write(
        &mut self,
        opts: &WriteOptions,
        kvs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<WriteOutcome, ShardError> {
        match self {
            Store::Single(s) => s.write(opts, kvs),
            Store::Splitting(w) => w.write(opts, kvs),
        }
    }

    pub fn get(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>, ShardError> {
        match self {
            Store::Single(s) => s.get(opts, key),
            Store::Splitting(w) => w.get(opts, key),
        }
    }

    pub fn space_usage(&self) -> u64 {
        match self {
            Store::Single(s) => s.space_usage(),
            Store::Splitting(w) => w.space_usage(),
        }
    }

    pub fn can_release(&self) -> bool {
        match self {
            Store::Single(s) => s.can_release(),
            Store::Splitting(w) => w.can_release(),
        }
    }

    pub fn try_apply_pending(&mut self) -> Result<(), ShardError> {
        match self {
            Store::Single(s) => s.try_apply_pending(),
            Store::Splitting(w) => w.try_apply_pending(),
        }
    }

    pub fn sync_files(&mut self) -> Result<(), ShardError> {
        match self {
            Store::Single(s) => s.sync_files(),
            Store::Splitting(w) => w.sync_files(),
        }
    }
}

/// The lock-guarded body of one shard handle.
pub(crate) struct NodeBody {
    /// `None` while the shard is closed (directory on disk only).
    pub store: Option<Store>,

    /// Cached shard directory. Blanked while a split worker occupies the
    /// slot — the worker's products will carry their own names.
    pub name: PathBuf,

    /// Set when this handle has been replaced by a compaction outcome. A
    /// router that observes it must re-fetch from the routing table.
    pub dirty: bool,

    /// Routing successes since the last GC pass; drives cold-shard
    /// eviction. Atomic so read-locked routers can bump it.
    pub hit: AtomicU64,
}

impl NodeBody {
    /// A handle for a shard that is on disk but not open.
    pub fn closed(name: PathBuf) -> NodeRef {
        Arc::new(RwLock::new(Self {
            store: None,
            name,
            dirty: false,
            hit: AtomicU64::new(0),
        }))
    }

    /// A handle born open (fresh creation or compaction product).
    pub fn with_store(store: Store, name: PathBuf, hit: u64) -> NodeRef {
        Arc::new(RwLock::new(Self {
            store: Some(store),
            name,
            dirty: false,
            hit: AtomicU64::new(hit),
        }))
    }
}

/// A *regular* name is a plain decimal integer. Compound names (`_`, `+`)
/// belong to compaction artefacts and are renamed at shutdown.
pub(crate) fn is_regular_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| {
            !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())
        })
}
