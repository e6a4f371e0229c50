//! # CLI — DriftKV Interactive Shell
//!
//! A REPL-style command-line interface for the DriftKV storage engine.
//! Reads commands from stdin, executes them against an open database, and
//! prints results to stdout. Designed for both interactive use and scripted
//! testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key
//! GET key            Look up a key (prints the value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! STATS              Print segment count, ids and disk usage
//! ERRORS             Drain and print pending background merge errors
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! DRIFT_DIR              data directory            (default: "data")
//! DRIFT_ROLLOVER_KB      rollover threshold in KiB (default: 1024 = 1 MiB)
//! DRIFT_FSYNC            fsync every write         (default: "false")
//! DRIFT_MERGE            background merge enabled  (default: "true")
//! DRIFT_MERGE_THRESHOLD  inactive segments needed  (default: 100)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! DriftKV started (dir=data, segments=1, rollover=1024KiB, merge_threshold=100)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > DEL name
//! OK
//! > GET name
//! (nil)
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use engine::{Db, KvError, Options};
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    env_logger::init();

    let dir = env_or("DRIFT_DIR", "data");
    let rollover_kb: u64 = env_or("DRIFT_ROLLOVER_KB", "1024").parse().unwrap_or(1024);
    let fsync: bool = env_or("DRIFT_FSYNC", "false").parse().unwrap_or(false);
    let merge_enabled: bool = env_or("DRIFT_MERGE", "true").parse().unwrap_or(true);
    let merge_threshold: usize = env_or("DRIFT_MERGE_THRESHOLD", "100").parse().unwrap_or(100);

    let db = Db::open(
        &dir,
        Options {
            rollover_threshold: rollover_kb * 1024,
            fsync_on_write: fsync,
            merge_enabled,
            merge_threshold,
            ..Options::default()
        },
    )?;

    println!(
        "DriftKV started (dir={}, segments={}, rollover={}KiB, merge_threshold={})",
        dir,
        db.segment_count(),
        rollover_kb,
        merge_threshold
    );
    println!("Commands: SET key value | GET key | DEL key | STATS | ERRORS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let merge_errors = db.merge_errors();
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(key) = parts.next() {
                        let value: String = parts.collect::<Vec<&str>>().join(" ");
                        match db.set(key, &value) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR set failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(key) = parts.next() {
                        match db.get(key) {
                            Ok(value) => println!("{}", value),
                            Err(KvError::KeyNotFound) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(key) = parts.next() {
                        match db.delete(key) {
                            Ok(()) => println!("OK"),
                            Err(KvError::KeyNotFound) => println!("(nil)"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "STATS" => {
                    println!(
                        "segments={} ids={:?} disk_size={}",
                        db.segment_count(),
                        db.segment_ids(),
                        db.disk_size().map(|n| n.to_string()).unwrap_or_else(|e| e.to_string())
                    );
                }
                "ERRORS" => {
                    let mut drained = 0;
                    while let Ok(err) = merge_errors.try_recv() {
                        println!("merge error: {}", err);
                        drained += 1;
                    }
                    if drained == 0 {
                        println!("(none)");
                    }
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    db.close()?;
    Ok(())
}
