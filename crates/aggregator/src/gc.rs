//! The GC pass: 2→1 merging of adjacent small shards, then eviction of
//! the coldest open shards when the open count exceeds the soft cap.
//!
//! Exactly one thread runs this at a time — the trigger flag is claimed
//! with a compare-and-swap in `best_for_write`. The walk holds at most two
//! node locks, always left-to-right, matching every other multi-node path
//! in the crate.

use std::ops::Bound;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::node::{is_regular_name, NodeBody, NodeWriteGuard, Store};
use crate::Aggregator;
use shard::Merge2To1;

impl Aggregator {
    pub(crate) fn gc(&self) -> Result<()> {
        tracing::debug!("gc pass begins");

        // Merge walk over (cursor, next) pairs. Dirty nodes may serve as
        // cursors — only their next-neighbour matters for advancing.
        let mut hit_q: Vec<u64> = Vec::new();
        {
            let (mut cursor, mut cursor_bound) = self.best_for_write_no_gc(b"")?;
            loop {
                if cursor.store.is_some() {
                    hit_q.push(cursor.hit.load(Ordering::Relaxed));
                }
                let Some((mut next, next_bound)) = self.next_for_write(&cursor_bound) else {
                    break;
                };
                self.try_merge(&mut cursor, &cursor_bound, &mut next, &next_bound)?;
                cursor = next;
                cursor_bound = next_bound;
            }
        }

        // Eviction pass: close the coldest open shards once the walk has
        // seen more open shards than the cap allows. The threshold sits
        // 50% above the count-th coldest hit, so shards sharing that hit
        // count close together — the cap is soft.
        let curr_dbs = hit_q.len();
        if curr_dbs > self.options.max_dbs {
            hit_q.sort_unstable();
            let close_limit = hit_q[curr_dbs - self.options.max_dbs] / 2 * 3;

            let (mut cursor, mut cursor_bound) = self.best_for_write_no_gc(b"")?;
            loop {
                let close = match &cursor.store {
                    Some(Store::Single(s)) => {
                        s.can_release() && cursor.hit.load(Ordering::Relaxed) <= close_limit
                    }
                    _ => false,
                };
                if close {
                    cursor.store = None;
                    self.operating_dbs.fetch_sub(1, Ordering::AcqRel);
                    self.session_log
                        .line(format!("evict {}", cursor.name.display()));
                    tracing::debug!(dir = %cursor.name.display(), "evicted cold shard");
                }
                cursor.hit.store(0, Ordering::Relaxed);

                match self.next_for_write(&cursor_bound) {
                    Some((guard, bound)) => {
                        cursor = guard;
                        cursor_bound = bound;
                    }
                    None => break,
                }
            }
        }

        tracing::debug!("gc pass ends");
        Ok(())
    }

    /// Merges `cursor` and `next` when every precondition holds: neither
    /// dirty, both plain open shards with regular names, both quiescent,
    /// combined space usage under the threshold. Returns whether a merge
    /// happened.
    fn try_merge(
        &self,
        cursor: &mut NodeWriteGuard,
        cursor_bound: &[u8],
        next: &mut NodeWriteGuard,
        next_bound: &[u8],
    ) -> Result<bool> {
        if cursor.dirty || next.dirty {
            return Ok(false);
        }
        let usage_a = match &cursor.store {
            Some(Store::Single(s)) if s.can_release() && is_regular_name(&cursor.name) => {
                s.space_usage()
            }
            _ => return Ok(false),
        };
        let usage_b = match &next.store {
            Some(Store::Single(s)) if s.can_release() && is_regular_name(&next.name) => {
                s.space_usage()
            }
            _ => return Ok(false),
        };
        if usage_a + usage_b >= self.options.merge_threshold {
            return Ok(false);
        }

        let (a, b) = match (cursor.store.take(), next.store.take()) {
            (Some(Store::Single(a)), Some(Store::Single(b))) => (a, b),
            (ca, cb) => {
                cursor.store = ca;
                next.store = cb;
                return Ok(false);
            }
        };
        let name_a = cursor.name.clone();
        let name_b = next.name.clone();

        // Synchronous: the GC thread blocks until the product is durable.
        let worker = match Merge2To1::run(a, b) {
            Ok(w) => w,
            Err(e) => {
                // The commit point was not reached: both source
                // directories are intact and the slots reopen lazily.
                self.operating_dbs.fetch_sub(2, Ordering::AcqRel);
                return Err(e.into());
            }
        };

        cursor.dirty = true;
        next.dirty = true;

        let product = worker.into_product();
        let hit = cursor.hit.load(Ordering::Relaxed) + next.hit.load(Ordering::Relaxed);
        let product_name = product.dir().to_path_buf();
        let node = NodeBody::with_store(Store::Single(product), product_name.clone(), hit);

        {
            let mut table = self.table.write();
            if let Some((_, slot)) = table
                .range_mut::<[u8], _>((Bound::Unbounded, Bound::Included(cursor_bound)))
                .next_back()
            {
                debug_assert!(Arc::ptr_eq(slot, NodeWriteGuard::rwlock(cursor)));
                *slot = node;
            }
            table.remove(next_bound);
        }
        self.operating_dbs.fetch_sub(1, Ordering::AcqRel);

        self.session_log.line(format!(
            "{}, {} to {}",
            name_a.display(),
            name_b.display(),
            product_name.display()
        ));
        Ok(true)
    }
}
