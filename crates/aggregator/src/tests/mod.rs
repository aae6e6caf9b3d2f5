mod gc_tests;
mod read_write_tests;

use crate::{Aggregator, Options, WriteOptions};
use tempfile::TempDir;

/// Options with a tiny shard capacity so a handful of writes saturates a
/// shard and forces a split.
pub fn tiny_options() -> Options {
    Options {
        create_if_missing: true,
        shard_capacity: 2048,
        merge_threshold: 0, // merging off unless a test opts in
        ..Options::default()
    }
}

pub fn open_fresh(opts: Options) -> (TempDir, Aggregator) {
    let dir = TempDir::new().unwrap();
    let agg = Aggregator::open(dir.path().join("db"), opts).unwrap();
    (dir, agg)
}

pub fn put(agg: &Aggregator, key: &[u8], value: &[u8]) {
    agg.put(&WriteOptions::default(), key, value).unwrap();
}

/// Inserts `n` ascending keys `key0000..`, enough to force splits under
/// [`tiny_options`].
pub fn fill_ascending(agg: &Aggregator, n: usize) {
    for i in 0..n {
        put(
            agg,
            format!("key{i:04}").as_bytes(),
            format!("val{i}").as_bytes(),
        );
    }
}

/// Asserts every filled key reads back its value.
pub fn check_ascending(agg: &Aggregator, n: usize) {
    for i in 0..n {
        let got = agg
            .get(&crate::ReadOptions::default(), format!("key{i:04}").as_bytes())
            .unwrap();
        assert_eq!(
            got,
            Some(format!("val{i}").into_bytes()),
            "key{i:04} lost its value"
        );
    }
}

/// The routing-table bounds, in order.
pub fn bounds(agg: &Aggregator) -> Vec<Vec<u8>> {
    agg.table.read().keys().cloned().collect()
}
