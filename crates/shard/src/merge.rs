//! 2→1 merge compaction worker.
//!
//! Coalesces two range-adjacent shards into one. Unlike the split, the
//! merge runs to completion inside the constructor — the GC thread blocks
//! on it, and no other thread can reach either source (the caller holds
//! both routing slots' write locks).
//!
//! ## Crash story
//!
//! The product is built under the sentinel-free name `<a>+<b>`; a crash
//! before the final rename makes recovery delete the half-built product
//! and keep both sources. The rename to `<a>+<b>-` (trailing `-` is the
//! success sentinel) is the commit point; after it, recovery keeps the
//! product and deletes whatever is left of the sources.

use crate::{Shard, ShardError};

/// A completed 2→1 merge holding its product shard.
pub struct Merge2To1 {
    product: Shard,
}

impl Merge2To1 {
    /// Merges `a` and `b` (adjacent, `a` covering the lower range)
    /// synchronously. Both sources are consumed and deleted from disk.
    pub fn run(a: Shard, b: Shard) -> Result<Self, ShardError> {
        let parent = a
            .dir()
            .parent()
            .ok_or_else(|| ShardError::Corrupt("shard dir has no parent".to_string()))?
            .to_path_buf();
        let stem_a = dir_name(&a);
        let stem_b = dir_name(&b);
        let work_name = format!("{stem_a}+{stem_b}");

        let mut product = Shard::create(
            parent.join(&work_name),
            a.smallest_key().to_vec(),
            a.seq_gen().clone(),
            a.capacity(),
        )?;

        // Key ranges are disjoint, so plain sequential absorption under
        // original seqs reproduces both indexes exactly.
        for (key, entry) in a.mem().iter() {
            product.absorb(key.clone(), entry.clone(), false)?;
        }
        for (key, entry) in b.mem().iter() {
            product.absorb(key.clone(), entry.clone(), false)?;
        }
        product.sync_files()?;

        // Commit point.
        product.rename_dir(parent.join(format!("{work_name}-")))?;

        // Source deletion is cleanup, not part of the commit: recovery
        // removes leftovers whenever the success sentinel is present.
        let dir_a = a.dir().to_path_buf();
        if let Err(e) = a.destroy() {
            tracing::warn!(dir = %dir_a.display(), error = %e, "merge source left behind");
        }
        let dir_b = b.dir().to_path_buf();
        if let Err(e) = b.destroy() {
            tracing::warn!(dir = %dir_b.display(), error = %e, "merge source left behind");
        }

        tracing::info!(
            a = %stem_a,
            b = %stem_b,
            product = %product.dir().display(),
            "merge complete"
        );

        Ok(Self { product })
    }

    /// Consumes the worker, yielding the merged shard.
    pub fn into_product(self) -> Shard {
        self.product
    }
}

fn dir_name(shard: &Shard) -> String {
    shard
        .dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
