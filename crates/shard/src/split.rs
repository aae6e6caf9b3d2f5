//! 1→2 split compaction worker.
//!
//! Wraps a saturated shard and migrates it into two range-adjacent product
//! shards while continuing to accept every operation the plain shard
//! accepts. The aggregator leaves the worker in the saturated shard's
//! routing slot; the next few writes drive the migration forward, and once
//! the worker is drained the aggregator publishes the two products.
//!
//! ## Crash story
//!
//! The origin log stays authoritative until the very end: every fresh
//! write during the split is journalled to the origin *in addition to* the
//! owning product. Recovery that finds the origin directory next to
//! `<origin>_<n>` product directories therefore discards the products and
//! replays the origin — no acknowledged write is lost. Only after the
//! products are fsynced is the origin deleted (atomically, via a scratch
//! rename), at which point the products are complete and stand on their
//! own.
//!
//! ## Why interleaving is safe
//!
//! Migration copies records under their *original* seqs while fresh writes
//! carry new ones. The memtable keeps the newer seq, so a migrated copy
//! arriving after a fresh write to the same key changes nothing.

use crate::{Shard, ShardError, WriteOptions, WriteOutcome};
use memtable::ValueEntry;
use std::collections::VecDeque;
use std::path::Path;
use wal::LogRecord;

/// Entries migrated per contract call.
const MIGRATE_BATCH: usize = 64;

/// In-flight 1→2 split of a saturated shard.
pub struct Split1To2 {
    origin: Option<Shard>,
    product_a: Shard,
    product_b: Shard,
    /// Range lower bound of the origin (and of product A).
    from_key: Vec<u8>,
    /// Keys `< split_key` belong to product A, the rest to product B.
    split_key: Vec<u8>,
    /// Origin entries still to be copied into the products.
    pending: VecDeque<(Vec<u8>, ValueEntry)>,
}

impl Split1To2 {
    /// Starts a split of `origin`. `name_a` / `name_b` are fresh values of
    /// the aggregator's shard counter; the products are created next to
    /// the origin as `<origin>_<name_a>` and `<origin>_<name_b>`.
    pub fn new(origin: Shard, name_a: u64, name_b: u64) -> Result<Self, ShardError> {
        let parent = origin
            .dir()
            .parent()
            .ok_or_else(|| ShardError::Corrupt("shard dir has no parent".to_string()))?
            .to_path_buf();
        let stem = origin
            .dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let from_key = origin.smallest_key().to_vec();
        let split_key = choose_split_key(&origin, &from_key);

        let product_a = Shard::create(
            parent.join(format!("{stem}_{name_a}")),
            from_key.clone(),
            origin.seq_gen().clone(),
            origin.capacity(),
        )?;
        let product_b = Shard::create(
            parent.join(format!("{stem}_{name_b}")),
            split_key.clone(),
            origin.seq_gen().clone(),
            origin.capacity(),
        )?;

        let pending: VecDeque<(Vec<u8>, ValueEntry)> = origin
            .mem()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();

        tracing::info!(
            origin = %origin.dir().display(),
            split_key = ?split_key,
            entries = pending.len(),
            "split started"
        );

        Ok(Self {
            origin: Some(origin),
            product_a,
            product_b,
            from_key,
            split_key,
            pending,
        })
    }

    /// Inserts a key-value pair; always accepted (product logs are loaded
    /// without a capacity check until publication).
    pub fn put(
        &mut self,
        opts: &WriteOptions,
        key: &[u8],
        value: &[u8],
    ) -> Result<WriteOutcome, ShardError> {
        self.step()?;
        let seq = self.seq_next();
        self.route_fresh(
            LogRecord::Put {
                seq,
                key: key.to_vec(),
                value: value.to_vec(),
            },
            opts.sync,
        )?;
        Ok(WriteOutcome::Accepted)
    }

    /// Deletes a key; always accepted.
    pub fn remove(&mut self, opts: &WriteOptions, key: &[u8]) -> Result<WriteOutcome, ShardError> {
        self.step()?;
        let seq = self.seq_next();
        self.route_fresh(
            LogRecord::Del {
                seq,
                key: key.to_vec(),
            },
            opts.sync,
        )?;
        Ok(WriteOutcome::Accepted)
    }

    /// Applies a sorted batch; always accepted.
    pub fn write(
        &mut self,
        opts: &WriteOptions,
        kvs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<WriteOutcome, ShardError> {
        self.step()?;
        for (key, value) in kvs {
            let seq = self.seq_next();
            self.route_fresh(
                LogRecord::Put {
                    seq,
                    key: key.clone(),
                    value: value.clone(),
                },
                false,
            )?;
        }
        if opts.sync {
            match &mut self.origin {
                Some(origin) => origin.sync_files()?,
                None => {
                    self.product_a.sync_files()?;
                    self.product_b.sync_files()?;
                }
            }
        }
        Ok(WriteOutcome::Accepted)
    }

    /// Looks up a key: the owning product first (its entries are newest),
    /// then the origin for anything not yet migrated.
    pub fn get(
        &self,
        opts: &crate::ReadOptions,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, ShardError> {
        let product = if key < self.split_key.as_slice() {
            &self.product_a
        } else {
            &self.product_b
        };
        if let Some(entry) = product.mem_entry(key) {
            return Ok(entry.value.clone());
        }
        match &self.origin {
            Some(origin) => origin.get(opts, key),
            None => Ok(None),
        }
    }

    /// Migrates one batch of pending entries.
    pub fn try_apply_pending(&mut self) -> Result<(), ShardError> {
        self.step()
    }

    /// Drained and safe to publish?
    pub fn can_release(&self) -> bool {
        self.origin.is_none() && self.pending.is_empty()
    }

    /// The origin's directory while the split is in flight; `None` once
    /// drained — the aggregator's publication cue.
    pub fn origin_dir(&self) -> Option<&Path> {
        self.origin.as_ref().map(|o| o.dir())
    }

    /// Range lower bound of the whole (origin) range.
    pub fn smallest_key(&self) -> &[u8] {
        &self.from_key
    }

    pub fn space_usage(&self) -> u64 {
        self.product_a.space_usage()
            + self.product_b.space_usage()
            + self.origin.as_ref().map_or(0, |o| o.space_usage())
    }

    pub fn sync_files(&mut self) -> Result<(), ShardError> {
        self.product_a.sync_files()?;
        self.product_b.sync_files()?;
        if let Some(origin) = &mut self.origin {
            origin.sync_files()?;
        }
        Ok(())
    }

    /// Consumes the drained worker, yielding `(product_a, product_b)`.
    pub fn into_products(self) -> (Shard, Shard) {
        debug_assert!(self.can_release());
        (self.product_a, self.product_b)
    }

    fn seq_next(&self) -> u64 {
        self.product_a.seq_gen().next()
    }

    /// Applies a fresh write: journalled to the origin for durability (its
    /// log is the recovery source while it exists), applied to the owning
    /// product for reads and the eventual publication.
    fn route_fresh(&mut self, rec: LogRecord, sync: bool) -> Result<(), ShardError> {
        let entry = match &rec {
            LogRecord::Put { seq, value, .. } => ValueEntry {
                seq: *seq,
                value: Some(value.clone()),
            },
            LogRecord::Del { seq, .. } => ValueEntry {
                seq: *seq,
                value: None,
            },
        };
        let key = rec.key().to_vec();
        let to_b = key.as_slice() >= self.split_key.as_slice();

        match &mut self.origin {
            Some(origin) => {
                origin.journal(&rec, sync)?;
                let product = if to_b {
                    &mut self.product_b
                } else {
                    &mut self.product_a
                };
                product.absorb(key, entry, false)?;
            }
            None => {
                let product = if to_b {
                    &mut self.product_b
                } else {
                    &mut self.product_a
                };
                product.absorb(key, entry, sync)?;
            }
        }
        Ok(())
    }

    /// Copies up to [`MIGRATE_BATCH`] pending entries into the products;
    /// finishes the split when the queue runs dry.
    fn step(&mut self) -> Result<(), ShardError> {
        if self.origin.is_none() {
            return Ok(());
        }
        for _ in 0..MIGRATE_BATCH {
            match self.pending.pop_front() {
                Some((key, entry)) => {
                    let product = if key.as_slice() >= self.split_key.as_slice() {
                        &mut self.product_b
                    } else {
                        &mut self.product_a
                    };
                    product.absorb(key, entry, false)?;
                }
                None => return self.finish(),
            }
        }
        Ok(())
    }

    /// Publication point: products become durable, the origin disappears.
    /// Ordering matters — recovery keys off whether the origin directory
    /// still exists.
    fn finish(&mut self) -> Result<(), ShardError> {
        self.product_a.sync_files()?;
        self.product_b.sync_files()?;
        if let Some(origin) = self.origin.take() {
            let dir = origin.dir().to_path_buf();
            origin.destroy()?;
            tracing::info!(origin = %dir.display(), "split drained");
        }
        Ok(())
    }
}

/// Picks the key the range is cut at: the origin index's median, nudged
/// with a `0x00` suffix whenever the median would collide with the range's
/// own lower bound (single-entry index). The result is always strictly
/// greater than `from_key`, keeping routing bounds distinct.
fn choose_split_key(origin: &Shard, from_key: &[u8]) -> Vec<u8> {
    match origin.mem().split_point() {
        Some(median) if median > from_key => median.to_vec(),
        Some(median) => {
            let mut k = median.to_vec();
            k.push(0);
            k
        }
        None => {
            let mut k = from_key.to_vec();
            k.push(0);
            k
        }
    }
}
