//! # Memtable — ordered shard index
//!
//! The in-memory view of one shard: every live key (and tombstone) with its
//! latest value, ordered lexicographically. Rebuilt from the shard's record
//! log on open, updated in place on every accepted write.
//!
//! Entries are resolved by **sequence number**: an entry with an older seq
//! never overwrites a newer one. Split compaction depends on this — records
//! migrated out of an origin shard may arrive *after* a fresh write to the
//! same key, and must lose.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// The latest state of one key: its sequence number and the optional value.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

/// Ordered key -> [`ValueEntry`] index over one shard.
#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    approx_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            approx_size: 0,
        }
    }

    /// Applies an entry, keeping whichever of the existing and incoming
    /// entries has the newer seq. This is the single resolution point for
    /// live writes, log replay, and compaction migration alike.
    pub fn apply(&mut self, key: Vec<u8>, entry: ValueEntry) {
        match self.map.get(&key) {
            Some(old) if old.seq >= entry.seq => return,
            Some(old) => {
                if let Some(ref ov) = old.value {
                    self.approx_size = self.approx_size.saturating_sub(ov.len());
                }
            }
            None => self.approx_size += key.len(),
        }
        if let Some(ref v) = entry.value {
            self.approx_size += v.len();
        }
        self.map.insert(key, entry);
    }

    /// Put a key with a seq number. Stale seqs are ignored.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        self.apply(
            key,
            ValueEntry {
                seq,
                value: Some(value),
            },
        );
    }

    /// Delete: record a tombstone with seq.
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        self.apply(key, ValueEntry { seq, value: None });
    }

    /// The latest value if present and not a tombstone.
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.map
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// The latest entry, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    /// Ordered iterator over entries (key, ValueEntry), tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.map.iter()
    }

    /// Ordered iterator over a key range, tombstones included.
    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)>
    where
        R: RangeBounds<Vec<u8>>,
    {
        self.map.range(range)
    }

    /// The median key — where a split compaction cuts the shard in two.
    ///
    /// Entries strictly below the returned key go to the lower product,
    /// entries at or above it to the upper one. `None` on an empty index.
    pub fn split_point(&self) -> Option<&[u8]> {
        if self.map.is_empty() {
            return None;
        }
        self.map
            .keys()
            .nth(self.map.len() / 2)
            .map(|k| k.as_slice())
    }

    /// The smallest key present (tombstones included).
    pub fn first_key(&self) -> Option<&[u8]> {
        self.map.keys().next().map(|k| k.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate bytes held: key bytes plus live value bytes.
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
    }
}
