//! Split completion: publishing a drained worker's products.

use std::ops::Bound;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::node::{NodeBody, NodeWriteGuard, Store};
use crate::Aggregator;

impl Aggregator {
    /// Inspects a slot after a write passed through it. When the slot
    /// holds a drained split worker, the two product shards are published:
    ///
    /// 1. The old handle is marked dirty — routers that raced us re-fetch.
    /// 2. Two fresh handles are built, inheriting half the old hit count
    ///    each.
    /// 3. Under the routing-table write lock, product A replaces the old
    ///    slot (its smallest key *is* the former lower bound) and product
    ///    B is inserted under its own smallest key.
    ///
    /// A router holding the old handle keeps a live object (the handles
    /// are reference-counted); the dirty flag bounds how long it can act
    /// on it.
    pub(crate) fn check_split_done(&self, guard: &mut NodeWriteGuard) -> Result<()> {
        let drained = matches!(
            guard.store,
            Some(Store::Splitting(ref w)) if w.origin_dir().is_none() && w.can_release()
        );
        if !drained {
            return Ok(());
        }
        let worker = match guard.store.take() {
            Some(Store::Splitting(w)) => w,
            other => {
                guard.store = other;
                return Ok(());
            }
        };

        let (mut a, mut b) = worker.into_products();
        a.sync_files()?;
        b.sync_files()?;

        guard.dirty = true;
        let half_hit = guard.hit.load(Ordering::Relaxed) / 2;

        let key_a = a.smallest_key().to_vec();
        let key_b = b.smallest_key().to_vec();
        let name_a = a.dir().to_path_buf();
        let name_b = b.dir().to_path_buf();
        let node_a = NodeBody::with_store(Store::Single(a), name_a.clone(), half_hit);
        let node_b = NodeBody::with_store(Store::Single(b), name_b.clone(), half_hit);

        {
            let mut table = self.table.write();
            if let Some((_, slot)) = table
                .range_mut::<[u8], _>((Bound::Unbounded, Bound::Included(key_a.as_slice())))
                .next_back()
            {
                debug_assert!(Arc::ptr_eq(slot, NodeWriteGuard::rwlock(guard)));
                *slot = node_a;
            }
            table.insert(key_b, node_b);
        }
        self.operating_dbs.fetch_add(1, Ordering::AcqRel);

        self.session_log.line(format!(
            "compacting db to {}, {}",
            name_a.display(),
            name_b.display()
        ));
        tracing::info!(
            product_a = %name_a.display(),
            product_b = %name_b.display(),
            "split published"
        );
        Ok(())
    }
}
