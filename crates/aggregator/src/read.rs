//! Read path: `get()` and snapshots.

use crate::error::Result;
use crate::Aggregator;
use shard::{ReadOptions, Snapshot};

impl Aggregator {
    /// Looks up a key on its responsible shard. `Ok(None)` covers both
    /// "never written" and "tombstoned".
    ///
    /// A closed shard cannot be opened under a read lock, so the fast path
    /// bails out, re-routes for write, opens, and reads under the write
    /// lock instead.
    pub fn get(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let (guard, _bound) = self.best_for_read(key)?;
            if let Some(store) = guard.store.as_ref() {
                return Ok(store.get(opts, key)?);
            }
        }

        let (mut guard, _bound) = self.best_for_write(key)?;
        let store = self.may_open(&mut guard)?;
        Ok(store.get(opts, key)?)
    }

    /// An opaque handle for monotonic read-your-writes, drawn from the
    /// aggregator-wide sequence generator.
    pub fn make_snapshot(&self) -> Snapshot {
        self.seq_gen.make_snapshot()
    }
}
