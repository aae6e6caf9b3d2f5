//! Write path: `put()`, `remove()`, and the batch `write()`.
//!
//! Every mutation routes to exactly one shard. A saturated shard is
//! promoted in place: its slot keeps working, but the store becomes a
//! [`Split1To2`] worker that accepts the retried operation by splitting
//! internally. After any write that passed through a slot, the slot is
//! checked for split completion (see `split.rs`).

use crate::error::{Error, Result};
use crate::node::{NodeWriteGuard, Store};
use crate::router::closed_slot;
use crate::Aggregator;
use shard::{Split1To2, WriteOptions};

impl Aggregator {
    /// Inserts a key-value pair.
    pub fn put(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let (mut guard, _bound) = self.best_for_write(key)?;
        self.may_open(&mut guard)?;
        self.put_with_promote(&mut guard, opts, key, value)?;
        self.check_split_done(&mut guard)
    }

    /// Deletes a key (writes a tombstone).
    pub fn remove(&self, opts: &WriteOptions, key: &[u8]) -> Result<()> {
        let (mut guard, _bound) = self.best_for_write(key)?;
        self.may_open(&mut guard)?;
        self.remove_with_promote(&mut guard, opts, key, "remove")?;
        self.check_split_done(&mut guard)
    }

    /// Applies a batch, sorted ascending by key on input.
    ///
    /// Placement is *eventual and per-shard*: every pair lands on its
    /// responsible shard, but there is no atomicity across shards. The
    /// batch is first submitted whole to the first key's owner, then
    /// spilled forward across later shards slice by slice, and finally any
    /// spilled keys are deleted from the owner to restore range ownership.
    pub fn write(&self, opts: &WriteOptions, kvs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        if kvs.is_empty() {
            return Ok(());
        }
        if !kvs.windows(2).all(|w| w[0].0 <= w[1].0) {
            return Err(Error::InvalidArgument(
                "batch must be sorted ascending by key".to_string(),
            ));
        }

        let (mut owner, owner_bound) = self.best_for_write(&kvs[0].0)?;
        self.may_open(&mut owner)?;

        // Submit the whole batch to the owner; promote on saturation.
        let store = owner.store.as_mut().ok_or_else(closed_slot)?;
        if store.write(opts, kvs)?.is_saturated() {
            self.promote_split(&mut owner, "write")?;
            let store = owner.store.as_mut().ok_or_else(closed_slot)?;
            let retry = store.write(opts, kvs)?;
            debug_assert!(!retry.is_saturated());
        }

        // Spill forward: each next-neighbour takes the slice between its
        // lower bound and the bound after it.
        let mut cursor_bound = owner_bound.clone();
        loop {
            let Some((mut cursor, bound)) = self.next_for_write(&cursor_bound) else {
                break;
            };
            let start = kvs.partition_point(|(k, _)| k.as_slice() < bound.as_slice());
            if start == kvs.len() {
                break;
            }
            self.may_open(&mut cursor)?;

            let end = match self.next_for_read(&bound) {
                Some((_next_next, next_bound)) => {
                    kvs.partition_point(|(k, _)| k.as_slice() < next_bound.as_slice())
                }
                None => kvs.len(),
            };

            for (key, value) in &kvs[start..end] {
                self.put_with_promote(&mut cursor, opts, key, value)?;
            }
            self.check_split_done(&mut cursor)?;
            cursor_bound = bound;
        }

        // Reclaim from the owner: keys at or past the next lower bound
        // have been placed elsewhere.
        if let Some((_next, next_bound)) = self.next_for_read(&owner_bound) {
            let start = kvs.partition_point(|(k, _)| k.as_slice() < next_bound.as_slice());
            for (key, _) in &kvs[start..] {
                self.remove_with_promote(&mut owner, opts, key, "remove inside write")?;
            }
        }

        self.check_split_done(&mut owner)
    }

    /// Applies one put to the slot, promoting to a splitter on saturation
    /// and retrying.
    pub(crate) fn put_with_promote(
        &self,
        guard: &mut NodeWriteGuard,
        opts: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let store = guard.store.as_mut().ok_or_else(closed_slot)?;
        if store.put(opts, key, value)?.is_saturated() {
            self.promote_split(guard, "put")?;
            let store = guard.store.as_mut().ok_or_else(closed_slot)?;
            let retry = store.put(opts, key, value)?;
            debug_assert!(!retry.is_saturated());
        }
        Ok(())
    }

    pub(crate) fn remove_with_promote(
        &self,
        guard: &mut NodeWriteGuard,
        opts: &WriteOptions,
        key: &[u8],
        what: &str,
    ) -> Result<()> {
        let store = guard.store.as_mut().ok_or_else(closed_slot)?;
        if store.remove(opts, key)?.is_saturated() {
            self.promote_split(guard, what)?;
            let store = guard.store.as_mut().ok_or_else(closed_slot)?;
            let retry = store.remove(opts, key)?;
            debug_assert!(!retry.is_saturated());
        }
        Ok(())
    }

    /// Wraps the slot's saturated shard in a split worker. The cached name
    /// is blanked: from here the slot answers for a range, not a
    /// directory, until the products are published.
    fn promote_split(&self, guard: &mut NodeWriteGuard, what: &str) -> Result<()> {
        let mut origin = match guard.store.take() {
            Some(Store::Single(shard)) => shard,
            other => {
                guard.store = other;
                return Err(Error::Corruption(
                    "saturation reported by a non-plain shard".to_string(),
                ));
            }
        };

        // A compaction artefact keeps its compound name until a rename.
        // The split stem must be regular, or recovery could not tell the
        // products apart from merge leftovers; rename first.
        if !crate::node::is_regular_name(origin.dir()) {
            let fresh = match self.meta.alloc_name() {
                Ok(n) => n,
                Err(e) => {
                    guard.store = Some(Store::Single(origin));
                    return Err(e);
                }
            };
            let target = self.dir.join(fresh.to_string());
            self.session_log
                .line(format!("rename {} to {fresh}", origin.dir().display()));
            if let Err(e) = origin.rename_dir(target) {
                guard.store = Some(Store::Single(origin));
                return Err(e.into());
            }
            guard.name = origin.dir().to_path_buf();
        }

        self.session_log
            .line(format!("split {} when {}", origin.dir().display(), what));
        tracing::info!(dir = %origin.dir().display(), "shard saturated, splitting");

        let name_a = self.meta.alloc_name()?;
        let name_b = self.meta.alloc_name()?;
        let worker = Split1To2::new(origin, name_a, name_b)?;
        guard.store = Some(Store::Splitting(Box::new(worker)));
        guard.name = std::path::PathBuf::new();
        Ok(())
    }
}
