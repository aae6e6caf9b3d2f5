//! Routing lookups.
//!
//! Six operations: best-match / previous-of-best / next-of-best, each in a
//! read-locking and a write-locking flavour. All share the same shape:
//!
//! 1. Take the routing-table read lock only long enough for one
//!    `upper_bound` step; clone the `Arc` out and release it.
//! 2. Acquire the node's own lock in the requested mode.
//! 3. If the node is dirty, a compaction republished the slot between the
//!    two steps — drop everything, yield, and retry.
//! 4. Bump the hit counter (best-match flavours only).
//!
//! The table lock is never held while a node lock is acquired, and node
//! locks are only ever chained left-to-right (batch spill, GC walk), which
//! is what makes the whole scheme deadlock-free.

use std::ops::Bound;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{NodeReadGuard, NodeRef, NodeWriteGuard, Store};
use crate::Aggregator;
use shard::Shard;

#[derive(Clone, Copy)]
enum Step {
    Best,
    Prev,
    Next,
}

impl Aggregator {
    /// Best match for a write. Runs the GC pass first when this thread
    /// wins the trigger flag.
    pub(crate) fn best_for_write(&self, key: &[u8]) -> Result<(NodeWriteGuard, Vec<u8>)> {
        if self
            .gc_flag
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.gc()?;
        }
        self.best_for_write_no_gc(key)
    }

    /// Best match for a write without consulting the GC trigger. The GC
    /// walk itself routes through this — re-entering the GC from inside
    /// its own walk would self-deadlock on a held node lock.
    pub(crate) fn best_for_write_no_gc(&self, key: &[u8]) -> Result<(NodeWriteGuard, Vec<u8>)> {
        self.lookup_write(key, Step::Best, true)
            .ok_or_else(empty_table)
    }

    #[allow(dead_code)]
    pub(crate) fn prev_for_write(&self, key: &[u8]) -> Option<(NodeWriteGuard, Vec<u8>)> {
        self.lookup_write(key, Step::Prev, false)
    }

    pub(crate) fn next_for_write(&self, key: &[u8]) -> Option<(NodeWriteGuard, Vec<u8>)> {
        self.lookup_write(key, Step::Next, false)
    }

    pub(crate) fn best_for_read(&self, key: &[u8]) -> Result<(NodeReadGuard, Vec<u8>)> {
        self.lookup_read(key, Step::Best, true).ok_or_else(empty_table)
    }

    #[allow(dead_code)]
    pub(crate) fn prev_for_read(&self, key: &[u8]) -> Option<(NodeReadGuard, Vec<u8>)> {
        self.lookup_read(key, Step::Prev, false)
    }

    pub(crate) fn next_for_read(&self, key: &[u8]) -> Option<(NodeReadGuard, Vec<u8>)> {
        self.lookup_read(key, Step::Next, false)
    }

    /// One `upper_bound` step under the routing-table read lock.
    fn lookup(&self, key: &[u8], step: Step) -> Option<(NodeRef, Vec<u8>)> {
        let table = self.table.read();
        let found = match step {
            Step::Best => table
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
                .next_back(),
            Step::Prev => {
                let mut iter = table.range::<[u8], _>((Bound::Unbounded, Bound::Included(key)));
                iter.next_back()?;
                iter.next_back()
            }
            Step::Next => table
                .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next(),
        }?;
        Some((Arc::clone(found.1), found.0.clone()))
    }

    fn lookup_write(
        &self,
        key: &[u8],
        step: Step,
        bump_hit: bool,
    ) -> Option<(NodeWriteGuard, Vec<u8>)> {
        loop {
            let (node, bound) = self.lookup(key, step)?;
            let guard = node.write_arc();
            if guard.dirty {
                drop(guard);
                std::thread::yield_now();
                continue;
            }
            if bump_hit {
                guard.hit.fetch_add(1, Ordering::Relaxed);
            }
            return Some((guard, bound));
        }
    }

    fn lookup_read(
        &self,
        key: &[u8],
        step: Step,
        bump_hit: bool,
    ) -> Option<(NodeReadGuard, Vec<u8>)> {
        loop {
            let (node, bound) = self.lookup(key, step)?;
            let guard = node.read_arc();
            if guard.dirty {
                drop(guard);
                std::thread::yield_now();
                continue;
            }
            if bump_hit {
                guard.hit.fetch_add(1, Ordering::Relaxed);
            }
            return Some((guard, bound));
        }
    }

    /// Opens the slot's shard if it is closed, counting it against the
    /// open-shard budget and arming the GC trigger past the cap. Opens are
    /// always read-write — a routed write may land immediately.
    pub(crate) fn may_open<'a>(
        &self,
        body: &'a mut crate::node::NodeBody,
    ) -> Result<&'a mut Store> {
        if body.store.is_none() {
            let opened = Shard::open(
                body.name.clone(),
                Arc::clone(&self.seq_gen),
                self.options.shard_capacity,
            )?;
            tracing::debug!(dir = %body.name.display(), "opened shard");
            body.store = Some(Store::Single(opened));
            let before = self.operating_dbs.fetch_add(1, Ordering::AcqRel);
            if before + 1 > self.options.max_dbs {
                self.gc_flag.store(true, Ordering::Release);
            }
        }
        match body.store.as_mut() {
            Some(store) => Ok(store),
            None => Err(closed_slot()),
        }
    }
}

pub(crate) fn closed_slot() -> Error {
    Error::Corruption("routing slot has no open shard".to_string())
}

fn empty_table() -> Error {
    Error::Corruption("routing table has no begin sentinel".to_string())
}
