//! # CLI — ShoalKV interactive shell
//!
//! A REPL-style command-line interface over the sharded store. Reads
//! commands from stdin, executes them against the aggregator, and prints
//! results to stdout. Designed for both interactive use and scripted
//! testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value        Insert or update a key-value pair
//! GET key              Look up a key (prints value or "(nil)")
//! DEL key              Delete a key (writes a tombstone)
//! WRITE k=v [k=v ...]  Batch write (pairs are sorted before submission)
//! SNAPSHOT             Print the current snapshot sequence
//! STATS                Print shard and open-shard counts
//! EXIT / QUIT          Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! SHOAL_DIR       Database directory          (default: "data/shoal")
//! SHOAL_MAX_DBS   Open-shard soft cap         (default: 8)
//! SHOAL_SHARD_KB  Shard capacity in KiB       (default: 4096 = 4 MiB)
//! SHOAL_SYNC      fsync every write           (default: "false")
//! ```
//!
//! Diagnostics go through `tracing`; set `RUST_LOG=info` (or finer) to see
//! split/merge/eviction events on stderr.

use aggregator::{Aggregator, Options, ReadOptions, WriteOptions};
use anyhow::Result;
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let dir = env_or("SHOAL_DIR", "data/shoal");
    let max_dbs: usize = env_or("SHOAL_MAX_DBS", "8").parse().unwrap_or(8);
    let shard_kb: u64 = env_or("SHOAL_SHARD_KB", "4096").parse().unwrap_or(4096);
    let sync: bool = env_or("SHOAL_SYNC", "false").parse().unwrap_or(false);

    let shard_capacity = shard_kb * 1024;
    let options = Options {
        create_if_missing: true,
        max_dbs,
        shard_capacity,
        merge_threshold: shard_capacity / 2,
        ..Options::default()
    };
    let agg = Aggregator::open(&dir, options)?;

    println!(
        "ShoalKV started (dir={dir}, shards={}, max_dbs={max_dbs}, shard={shard_kb}KiB, sync={sync})",
        agg.shard_count()
    );

    let write_opts = WriteOptions { sync };
    let read_opts = ReadOptions::default();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };

        match cmd.to_ascii_uppercase().as_str() {
            "SET" => match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => {
                    agg.put(&write_opts, key.as_bytes(), value.as_bytes())?;
                    println!("OK");
                }
                _ => println!("usage: SET key value"),
            },
            "GET" => match parts.next() {
                Some(key) => match agg.get(&read_opts, key.as_bytes())? {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("(nil)"),
                },
                None => println!("usage: GET key"),
            },
            "DEL" => match parts.next() {
                Some(key) => {
                    agg.remove(&write_opts, key.as_bytes())?;
                    println!("OK");
                }
                None => println!("usage: DEL key"),
            },
            "WRITE" => {
                let mut kvs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
                let mut bad = false;
                for pair in parts {
                    match pair.split_once('=') {
                        Some((k, v)) => kvs.push((k.into(), v.into())),
                        None => {
                            println!("usage: WRITE k=v [k=v ...]");
                            bad = true;
                            break;
                        }
                    }
                }
                if !bad && !kvs.is_empty() {
                    kvs.sort_by(|a, b| a.0.cmp(&b.0));
                    agg.write(&write_opts, &kvs)?;
                    println!("OK ({} pairs)", kvs.len());
                }
            }
            "SNAPSHOT" => {
                println!("snapshot seq={}", agg.make_snapshot().seq());
            }
            "STATS" => {
                println!(
                    "shards={} open={} dir={}",
                    agg.shard_count(),
                    agg.operating_dbs(),
                    agg.dir().display()
                );
            }
            "EXIT" | "QUIT" => {
                println!("bye");
                break;
            }
            other => println!("unknown command: {other}"),
        }
    }

    Ok(())
}
