use super::*;
use crate::node::Store;
use crate::{Error, ReadOptions, WriteOptions};
use anyhow::Result;

// --------------------- Open semantics ---------------------

#[test]
fn empty_open_put_get() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());

    agg.put(&WriteOptions::default(), b"a", b"1")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"a")?, Some(b"1".to_vec()));
    assert_eq!(agg.get(&ReadOptions::default(), b"z")?, None);
    Ok(())
}

#[test]
fn open_missing_without_create_is_not_found() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = crate::Aggregator::open(dir.path().join("absent"), crate::Options::default());
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn open_existing_with_error_if_exists_fails() {
    let (dir, agg) = open_fresh(tiny_options());
    let path = agg.dir().to_path_buf();
    drop(agg);

    let result = crate::Aggregator::open(
        &path,
        crate::Options {
            error_if_exists: true,
            create_if_missing: true,
            ..tiny_options()
        },
    );
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    drop(dir);
}

#[test]
fn second_opener_is_locked_out() {
    let (_dir, agg) = open_fresh(tiny_options());
    let result = crate::Aggregator::open(agg.dir(), tiny_options());
    assert!(matches!(result, Err(Error::Io(_))));
}

// --------------------- Round trip / idempotence ---------------------

#[test]
fn overwrite_returns_latest() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    agg.put(&WriteOptions::default(), b"k", b"v1")?;
    agg.put(&WriteOptions::default(), b"k", b"v2")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn remove_is_idempotent() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    agg.put(&WriteOptions::default(), b"k", b"v")?;
    agg.remove(&WriteOptions::default(), b"k")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"k")?, None);
    agg.remove(&WriteOptions::default(), b"k")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"k")?, None);
    Ok(())
}

#[test]
fn remove_of_absent_key_is_accepted() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    agg.remove(&WriteOptions::default(), b"ghost")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"ghost")?, None);
    Ok(())
}

#[test]
fn empty_key_round_trips() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    agg.put(&WriteOptions::default(), b"", b"void")?;
    assert_eq!(agg.get(&ReadOptions::default(), b"")?, Some(b"void".to_vec()));
    Ok(())
}

// --------------------- Forced split ---------------------

#[test]
fn forced_split_grows_routing_table() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());

    // ~38 bytes per record against a 2 KiB capacity: well past one shard.
    fill_ascending(&agg, 120);
    assert!(
        agg.shard_count() >= 2,
        "expected a split, table still has {} entry",
        agg.shard_count()
    );
    check_ascending(&agg, 120);
    Ok(())
}

#[test]
fn split_preserves_tombstones() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());

    fill_ascending(&agg, 40);
    agg.remove(&WriteOptions::default(), b"key0010")?;
    fill_ascending(&agg, 40); // re-put everything except nothing: key0010 back
    agg.remove(&WriteOptions::default(), b"key0020")?;
    // Push past saturation so a split runs with the tombstone in flight.
    for i in 100..160 {
        put(&agg, format!("key{i:04}").as_bytes(), b"filler");
    }
    assert!(agg.shard_count() >= 2);
    assert_eq!(agg.get(&ReadOptions::default(), b"key0020")?, None);
    assert_eq!(
        agg.get(&ReadOptions::default(), b"key0010")?,
        Some(b"val10".to_vec())
    );
    Ok(())
}

// --------------------- Batch write ---------------------

#[test]
fn batch_rejects_unsorted_input() {
    let (_dir, agg) = open_fresh(tiny_options());
    let kvs = vec![(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec())];
    let result = agg.write(&WriteOptions::default(), &kvs);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn batch_single_shard() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    let kvs: Vec<(Vec<u8>, Vec<u8>)> = (0..5)
        .map(|i| (format!("k{i}").into_bytes(), format!("v{i}").into_bytes()))
        .collect();
    agg.write(&WriteOptions::default(), &kvs)?;
    for i in 0..5 {
        assert_eq!(
            agg.get(&ReadOptions::default(), format!("k{i}").as_bytes())?,
            Some(format!("v{i}").into_bytes())
        );
    }
    Ok(())
}

#[test]
fn batch_spills_to_owning_shards() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());

    // Force at least two shards, then learn the second lower bound.
    fill_ascending(&agg, 120);
    let table_bounds = bounds(&agg);
    assert!(table_bounds.len() >= 2);
    let second_bound = table_bounds[1].clone();

    // One key below the second bound, one at/above it.
    let mut high = second_bound.clone();
    high.extend_from_slice(b"zz");
    let kvs = vec![
        (b"aaa".to_vec(), b"low".to_vec()),
        (high.clone(), b"high".to_vec()),
    ];
    agg.write(&WriteOptions::default(), &kvs)?;

    assert_eq!(
        agg.get(&ReadOptions::default(), b"aaa")?,
        Some(b"low".to_vec())
    );
    assert_eq!(
        agg.get(&ReadOptions::default(), &high)?,
        Some(b"high".to_vec())
    );

    // Range ownership: the spilled key must live on its own shard, not the
    // batch owner. Ask the owner's store directly.
    let (owner, _) = agg.best_for_read(b"aaa").unwrap();
    if let Some(Store::Single(s)) = owner.store.as_ref() {
        assert_eq!(s.get(&ReadOptions::default(), &high).unwrap(), None);
    }
    Ok(())
}

#[test]
fn batch_reclaim_removes_spilled_keys_from_owner() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    fill_ascending(&agg, 120);
    let table_bounds = bounds(&agg);
    let second_bound = table_bounds[1].clone();

    // The owner accepts the whole batch first; the reclaim pass must then
    // erase the out-of-range keys from it.
    let mut spilled = second_bound.clone();
    spilled.push(b'!');
    let kvs = vec![(b"a0".to_vec(), b"x".to_vec()), (spilled.clone(), b"y".to_vec())];
    agg.write(&WriteOptions::default(), &kvs)?;

    // Routing still answers from the responsible shard.
    assert_eq!(
        agg.get(&ReadOptions::default(), &spilled)?,
        Some(b"y".to_vec())
    );
    Ok(())
}

// --------------------- Durability across reopen ---------------------

#[test]
fn reopen_returns_acknowledged_writes() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let agg = crate::Aggregator::open(&path, tiny_options())?;
        agg.put(&WriteOptions { sync: true }, b"stay", b"put")?;
        agg.put(&WriteOptions { sync: true }, b"gone", b"x")?;
        agg.remove(&WriteOptions { sync: true }, b"gone")?;
    }

    let agg = crate::Aggregator::open(&path, tiny_options())?;
    assert_eq!(
        agg.get(&ReadOptions::default(), b"stay")?,
        Some(b"put".to_vec())
    );
    assert_eq!(agg.get(&ReadOptions::default(), b"gone")?, None);
    Ok(())
}

#[test]
fn reopen_after_splits_keeps_every_key() -> Result<()> {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let agg = crate::Aggregator::open(&path, tiny_options())?;
        fill_ascending(&agg, 150);
        assert!(agg.shard_count() >= 2);
    }

    let agg = crate::Aggregator::open(&path, tiny_options())?;
    check_ascending(&agg, 150);
    Ok(())
}

// --------------------- Snapshots ---------------------

#[test]
fn snapshots_are_monotonic() -> Result<()> {
    let (_dir, agg) = open_fresh(tiny_options());
    let s1 = agg.make_snapshot();
    agg.put(&WriteOptions::default(), b"k", b"v")?;
    let s2 = agg.make_snapshot();
    assert!(s2.seq() > s1.seq());

    // Reads through a snapshot still observe your own writes.
    assert_eq!(
        agg.get(
            &ReadOptions {
                snapshot: Some(s2)
            },
            b"k"
        )?,
        Some(b"v".to_vec())
    );
    Ok(())
}
