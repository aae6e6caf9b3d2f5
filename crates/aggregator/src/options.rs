//! Open-time configuration.

/// Default byte capacity of one shard's log.
pub const DEFAULT_SHARD_CAPACITY: u64 = 4 << 20;

/// Default soft cap on simultaneously open shards.
pub const DEFAULT_MAX_DBS: usize = 8;

/// Options recognised when opening an aggregator.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database when absent; otherwise opening a missing
    /// database fails with `NotFound`.
    pub create_if_missing: bool,

    /// Fail with `InvalidArgument` when the database already exists.
    pub error_if_exists: bool,

    /// Soft cap on open shards. Exceeding it arms the GC trigger; the next
    /// routed write runs a merge-and-evict pass.
    pub max_dbs: usize,

    /// Two adjacent shards merge when their combined space usage is below
    /// this threshold (and both are quiescent).
    pub merge_threshold: u64,

    /// Byte capacity of each shard's log; writes past it saturate the
    /// shard and trigger a split.
    pub shard_capacity: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            max_dbs: DEFAULT_MAX_DBS,
            merge_threshold: DEFAULT_SHARD_CAPACITY / 2,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
        }
    }
}
