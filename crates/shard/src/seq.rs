//! Aggregator-wide sequence generator.
//!
//! Every write in the whole store draws its seq here, so cross-shard
//! per-key ordering falls out of a single atomic counter. Shards raise the
//! counter past their replayed maximum on open.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence source shared by every shard of one aggregator.
#[derive(Debug, Default)]
pub struct SeqGenerator {
    seq: AtomicU64,
}

impl SeqGenerator {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    /// Allocates the next seq (first allocation returns 1; 0 means
    /// "never written").
    pub fn next(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently allocated seq.
    pub fn current(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Raises the counter to at least `floor`. Called during shard open so
    /// fresh writes always out-sequence recovered entries.
    pub fn raise_to(&self, floor: u64) {
        self.seq.fetch_max(floor, Ordering::Relaxed);
    }

    /// Captures the current position as an opaque snapshot handle.
    pub fn make_snapshot(&self) -> Snapshot {
        Snapshot {
            seq: self.current(),
        }
    }
}

/// An opaque read position. Reads against a snapshot observe at least
/// every write sequenced at or before it (monotonic read-your-writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    seq: u64,
}

impl Snapshot {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}
