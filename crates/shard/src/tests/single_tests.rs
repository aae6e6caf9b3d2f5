use super::{dir_names, seq_gen};
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

const CAP: u64 = 1 << 20;

#[test]
fn create_put_get() -> Result<()> {
    let dir = tempdir()?;
    let mut s = Shard::create(dir.path().join("0"), Vec::new(), seq_gen(), CAP)?;

    let out = s.put(&WriteOptions::default(), b"name", b"alice")?;
    assert_eq!(out, WriteOutcome::Accepted);
    assert_eq!(
        s.get(&ReadOptions::default(), b"name")?,
        Some(b"alice".to_vec())
    );
    assert_eq!(s.get(&ReadOptions::default(), b"nope")?, None);
    Ok(())
}

#[test]
fn remove_leaves_tombstone() -> Result<()> {
    let dir = tempdir()?;
    let mut s = Shard::create(dir.path().join("0"), Vec::new(), seq_gen(), CAP)?;

    s.put(&WriteOptions::default(), b"k", b"v")?;
    s.remove(&WriteOptions::default(), b"k")?;
    assert_eq!(s.get(&ReadOptions::default(), b"k")?, None);

    // Removing again is a no-op for reads.
    s.remove(&WriteOptions::default(), b"k")?;
    assert_eq!(s.get(&ReadOptions::default(), b"k")?, None);
    Ok(())
}

#[test]
fn reopen_replays_log() -> Result<()> {
    let dir = tempdir()?;
    let gen = seq_gen();
    let path = dir.path().join("0");

    {
        let mut s = Shard::create(path.clone(), Vec::new(), gen.clone(), CAP)?;
        s.put(&WriteOptions { sync: true }, b"a", b"1")?;
        s.put(&WriteOptions { sync: true }, b"b", b"2")?;
        s.remove(&WriteOptions { sync: true }, b"a")?;
    }

    let s = Shard::open(path, seq_gen(), CAP)?;
    assert_eq!(s.get(&ReadOptions::default(), b"a")?, None);
    assert_eq!(s.get(&ReadOptions::default(), b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn open_raises_seq_gen_past_replayed_records() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("0");

    {
        let gen = seq_gen();
        let mut s = Shard::create(path.clone(), Vec::new(), gen, CAP)?;
        for i in 0..10 {
            s.put(&WriteOptions::default(), format!("k{i}").as_bytes(), b"v")?;
        }
        s.sync_files()?;
    }

    // A fresh generator starts at 0; open must raise it so the next write
    // out-sequences every recovered entry.
    let gen = seq_gen();
    let mut s = Shard::open(path, gen.clone(), CAP)?;
    assert!(gen.current() >= 10);
    s.put(&WriteOptions::default(), b"k0", b"new")?;
    assert_eq!(s.get(&ReadOptions::default(), b"k0")?, Some(b"new".to_vec()));
    Ok(())
}

#[test]
fn saturation_reports_without_writing() -> Result<()> {
    let dir = tempdir()?;
    let mut s = Shard::create(dir.path().join("0"), Vec::new(), seq_gen(), 64)?;

    let mut accepted = 0;
    loop {
        match s.put(&WriteOptions::default(), b"key", b"0123456789")? {
            WriteOutcome::Accepted => accepted += 1,
            WriteOutcome::Saturated => break,
        }
    }
    assert!(accepted >= 1);
    let usage = s.space_usage();

    // Saturated writes leave no trace.
    assert!(s.put(&WriteOptions::default(), b"key", b"x")?.is_saturated());
    assert_eq!(s.space_usage(), usage);
    Ok(())
}

#[test]
fn batch_write_is_all_or_nothing_at_saturation() -> Result<()> {
    let dir = tempdir()?;
    let mut s = Shard::create(dir.path().join("0"), Vec::new(), seq_gen(), 128)?;

    let big: Vec<(Vec<u8>, Vec<u8>)> = (0..20)
        .map(|i| (format!("key{i:02}").into_bytes(), vec![b'v'; 32]))
        .collect();
    assert!(s.write(&WriteOptions::default(), &big)?.is_saturated());
    assert_eq!(s.space_usage(), 0);
    assert_eq!(s.get(&ReadOptions::default(), b"key00")?, None);

    let small = vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())];
    assert_eq!(
        s.write(&WriteOptions::default(), &small)?,
        WriteOutcome::Accepted
    );
    assert_eq!(s.get(&ReadOptions::default(), b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn keeper_preserves_lower_bound() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("7");

    {
        let _s = Shard::create(path.clone(), b"m".to_vec(), seq_gen(), CAP)?;
    }
    assert_eq!(read_range_keeper(&path)?, b"m".to_vec());

    let s = Shard::open(path, seq_gen(), CAP)?;
    assert_eq!(s.smallest_key(), b"m");
    Ok(())
}

#[test]
fn repair_rebuilds_missing_keeper() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("3");

    {
        let mut s = Shard::create(path.clone(), b"g".to_vec(), seq_gen(), CAP)?;
        s.put(&WriteOptions { sync: true }, b"h", b"1")?;
        s.put(&WriteOptions { sync: true }, b"k", b"2")?;
    }
    std::fs::remove_file(path.join(KEEPER_FILENAME))?;

    repair_shard(&path)?;
    // The exact bound is unrecoverable; the smallest logged key stands in.
    assert_eq!(read_range_keeper(&path)?, b"h".to_vec());

    let s = Shard::open(path, seq_gen(), CAP)?;
    assert_eq!(s.get(&ReadOptions::default(), b"k")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn destroy_leaves_no_directory() -> Result<()> {
    let dir = tempdir()?;
    let s = Shard::create(dir.path().join("5"), Vec::new(), seq_gen(), CAP)?;
    s.destroy()?;
    assert!(dir_names(dir.path()).is_empty());
    Ok(())
}

#[test]
fn rename_dir_keeps_shard_usable() -> Result<()> {
    let dir = tempdir()?;
    let mut s = Shard::create(dir.path().join("5"), Vec::new(), seq_gen(), CAP)?;
    s.put(&WriteOptions::default(), b"k", b"v")?;

    s.rename_dir(dir.path().join("9"))?;
    assert_eq!(dir_names(dir.path()), vec!["9".to_string()]);
    s.put(&WriteOptions::default(), b"k2", b"v2")?;
    assert_eq!(s.get(&ReadOptions::default(), b"k2")?, Some(b"v2".to_vec()));
    Ok(())
}
