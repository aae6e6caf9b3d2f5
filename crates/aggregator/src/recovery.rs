//! Startup reconciliation of partially completed compactions.
//!
//! The aggregator's directory is scanned once, before any routing is
//! possible. Child directories whose names begin with a digit are shard
//! candidates; compound names encode interrupted compactions:
//!
//! - `<a>+<b>` / `<a>+<b>-` — a 2→1 merge product. The trailing `-` is
//!   the success sentinel: with it, the product stands and any leftover
//!   sources are deleted; without it, the half-built product is deleted.
//! - `<origin>_<n>` — a 1→2 split product. If the origin directory still
//!   exists, the split never finished: the origin log is authoritative,
//!   so the products are discarded and the origin repaired. If the origin
//!   is gone, the split completed and the products stand as shards.
//! - `…tmp` — scratch, always erased.
//!
//! Anything that survives and lacks a keeper is repaired from its log.
//! Split-repair failure is a hard corruption error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Scans `dir` and reconciles it, returning the surviving shard
/// directories and the next value for the shard-name counter (strictly
/// greater than every surviving name's leading integer).
pub(crate) fn recover(dir: &Path) -> Result<(Vec<PathBuf>, u64)> {
    // Merge products first: their sentinel decides whether sources or
    // product survive, independent of anything else.
    for name in candidates(dir)? {
        let Some(plus) = name.find('+') else { continue };
        let path = dir.join(&name);
        if name.ends_with('-') {
            let left = &name[..plus];
            let right = &name[plus + 1..name.len() - 1];
            for source in [left, right] {
                let source_dir = dir.join(source);
                if source_dir.is_dir() {
                    fs::remove_dir_all(&source_dir)?;
                    tracing::info!(source, product = %name, "removed merged source");
                }
            }
        } else {
            fs::remove_dir_all(&path)?;
            tracing::info!(product = %name, "removed unfinished merge product");
        }
    }

    // Scratch directories are always erased.
    for name in candidates(dir)? {
        if name.ends_with(shard::TMP_SUFFIX) {
            fs::remove_dir_all(dir.join(&name))?;
        }
    }

    // In-progress splits. Innermost stems first: a nested split's
    // products must be resolved before their origin is judged.
    let mut stems: Vec<String> = candidates(dir)?
        .into_iter()
        .filter_map(|name| name.rfind('_').map(|pos| name[..pos].to_string()))
        .collect();
    stems.sort();
    stems.dedup();
    stems.sort_by_key(|s| std::cmp::Reverse(s.len()));
    for stem in stems {
        repair_split(dir, &stem)
            .map_err(|e| Error::Corruption(format!("split repair of '{stem}' failed: {e}")))?;
    }

    // Survivors: repair any missing keeper, and track the largest leading
    // integer for the counter rewrite.
    let mut survivors = Vec::new();
    let mut max_name = 0u64;
    for name in candidates(dir)? {
        let path = dir.join(&name);
        if !keeper::keeper_exists(path.join(shard::KEEPER_FILENAME)) {
            shard::repair_shard(&path)
                .map_err(|e| Error::Corruption(format!("repair of '{name}' failed: {e}")))?;
        }
        if let Some(n) = leading_int(&name) {
            max_name = max_name.max(n);
        }
        survivors.push(path);
    }

    Ok((survivors, max_name + 1))
}

/// Rolls an interrupted split back onto its origin, or lets completed
/// products stand when the origin is gone.
fn repair_split(dir: &Path, stem: &str) -> Result<()> {
    let origin = dir.join(stem);
    if !origin.is_dir() {
        // The origin was deleted at the end of the migration: the split
        // completed, the products are whole shards.
        return Ok(());
    }

    for name in candidates(dir)? {
        if let Some(pos) = name.rfind('_') {
            if &name[..pos] == stem {
                fs::remove_dir_all(dir.join(&name))?;
                tracing::info!(product = %name, origin = %stem, "discarded split product");
            }
        }
    }
    if !keeper::keeper_exists(origin.join(shard::KEEPER_FILENAME)) {
        shard::repair_shard(&origin)?;
    }
    Ok(())
}

/// Child directories whose names begin with a decimal digit, sorted.
fn candidates(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.as_bytes().first().map_or(false, |b| b.is_ascii_digit()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn leading_int(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
