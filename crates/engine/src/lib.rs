//! # Engine — the DriftKV storage engine
//!
//! A crash-safe, log-structured key/value store over a data directory. Ties
//! together the [`record`] codec and [`segment`] files with an in-memory key
//! directory, a durable manifest, and a background merge.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                      DB                          │
//! │                                                  │
//! │ write.rs → append to active segment              │
//! │              |                                   │
//! │              |  (size >= rollover threshold?)    │
//! │              |            yes                    │
//! │              v                                   │
//! │         rollover → new active segment            │
//! │              |                                   │
//! │              |  (inactive >= merge threshold?)   │
//! │              |            yes                    │
//! │              v                                   │
//! │         merge.rs → compacted segments (async)    │
//! │                                                  │
//! │ read.rs → key directory → read at (seg, offset)  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                                |
//! |--------------|--------------------------------------------------------|
//! | `lib.rs`     | `Db` handle, `Options`, open/replay, close, accessors  |
//! | [`read`]     | `get()` under the shared lock                          |
//! | [`write`]    | `set()`, `delete()`, rollover, merge trigger           |
//! | [`merge`]    | Background compaction with index reconciliation        |
//! | [`manifest`] | Durable segment list in replay order                   |
//! | [`fsio`]     | Atomic file replacement, durable creation              |
//!
//! ## Data directory
//!
//! ```text
//! MANIFEST   one decimal segment id per line, replay order, atomically
//!            rewritten whenever the segment list changes
//! seg001     append-only record files; the last manifest entry is active,
//! seg002     all others are immutable
//! ...
//! ```
//!
//! ## Concurrency
//!
//! One reader/writer lock guards the segment list, the key directory and the
//! manifest handle. Reads take it shared; writes, close and the merge's
//! install step take it exclusive. The background merge scans its inputs
//! with only brief shared-lock lookups, so long compaction I/O never blocks
//! foreground reads; the reconciliation step at install time resolves any
//! keys that were overwritten or deleted while the merge ran.
//!
//! ## Crash Safety
//!
//! A record is a single positional write framed by a checksum that covers
//! its own length fields. A torn tail (crash mid-append) is truncated away
//! silently on open — such records were never acknowledged. A checksum
//! mismatch before the tail is a hard error. The manifest is replaced via
//! temp file + fsync + rename + directory fsync, so the segment list is
//! never half-written.

mod error;
mod fsio;
mod manifest;
mod merge;
mod read;
mod write;

pub use error::{KvError, Result};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use record::WriteType;
use segment::Segment;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Tuning knobs for [`Db::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Roll the active segment once it reaches this many bytes.
    pub rollover_threshold: u64,
    /// Fsync the active segment after every successful write. Off by
    /// default: reads in this process still see the write immediately, but
    /// it may not survive power loss until the next sync.
    pub fsync_on_write: bool,
    /// Whether the background merge may run at all.
    pub merge_enabled: bool,
    /// Minimum number of inactive segments required to trigger a merge.
    pub merge_threshold: usize,
    /// Verify record checksums on open-time scans and on every read.
    pub verify_checksums: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rollover_threshold: 1024 * 1024,
            fsync_on_write: false,
            merge_enabled: true,
            merge_threshold: 100,
            verify_checksums: true,
        }
    }
}

/// Where the latest record for a key lives.
#[derive(Clone)]
pub(crate) struct RecordLocation {
    pub(crate) segment: Arc<Segment>,
    pub(crate) offset: u64,
}

impl RecordLocation {
    /// Segment ids are never reused, so id + offset equality identifies a
    /// record exactly.
    pub(crate) fn same_record(&self, other: &RecordLocation) -> bool {
        self.segment.id() == other.segment.id() && self.offset == other.offset
    }
}

/// Everything guarded by the engine's reader/writer lock.
pub(crate) struct DbState {
    /// All segments in replay order; the last one is active.
    pub(crate) segments: Vec<Arc<Segment>>,
    /// Maps each live key to its last-seen record location.
    pub(crate) index: HashMap<String, RecordLocation>,
    /// Open manifest handle; replaced on every atomic rewrite, dropped on
    /// close.
    pub(crate) manifest: Option<File>,
    pub(crate) closed: bool,
}

pub(crate) struct DbShared {
    pub(crate) dir: PathBuf,
    pub(crate) opts: Options,
    pub(crate) state: RwLock<DbState>,
    /// Next segment id to hand out; ids are never reused, even across
    /// restarts (seeded from the manifest's max id plus one).
    pub(crate) next_segment_id: AtomicU64,
    /// Single-slot merge semaphore: at most one merge at a time, extra
    /// triggers are dropped.
    pub(crate) merge_running: AtomicBool,
    pub(crate) merge_err_tx: Sender<KvError>,
    pub(crate) merge_err_rx: Receiver<KvError>,
    #[cfg(test)]
    pub(crate) hooks: merge::MergeHooks,
}

/// A handle to an open DriftKV data directory.
///
/// `Db` is cheap to clone; all clones share the same engine state, and any
/// clone may be used concurrently from multiple threads. Reads take the
/// shared lock, writes the exclusive one.
#[derive(Clone)]
pub struct Db {
    pub(crate) shared: Arc<DbShared>,
}

impl Db {
    /// Opens (or creates) the database in `dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create `dir` if it does not exist.
    /// 2. Open the manifest, durably creating it on first use.
    /// 3. Open and scan every listed segment in manifest order, replaying
    ///    records into the key directory (sets insert, tombstones remove).
    ///    File order is the logical order within a segment; manifest order
    ///    establishes order across segments.
    /// 4. Seed the segment id counter with the highest id seen plus one.
    /// 5. Warn about `seg*` files not listed in the manifest (orphans from
    ///    an interrupted merge) without failing.
    /// 6. For a fresh directory, create segment 1 and commit the manifest.
    ///
    /// Any failure simply drops whatever was opened so far and returns the
    /// error; no handles outlive a failed open.
    pub fn open(dir: impl AsRef<Path>, opts: Options) -> Result<Db> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut man = manifest::ensure_manifest(&dir)?;
        let ids = manifest::read_segment_ids(&mut man)?;

        let mut segments: Vec<Arc<Segment>> = Vec::with_capacity(ids.len());
        let mut index: HashMap<String, RecordLocation> = HashMap::new();

        for &id in &ids {
            let (seg, records) = Segment::open(&dir, id, opts.verify_checksums)?;
            let seg = Arc::new(seg);
            for rec in records {
                match rec.write_type {
                    WriteType::Set => {
                        index.insert(
                            rec.key,
                            RecordLocation {
                                segment: Arc::clone(&seg),
                                offset: rec.offset,
                            },
                        );
                    }
                    WriteType::Delete => {
                        index.remove(&rec.key);
                    }
                }
            }
            segments.push(seg);
        }

        let max_id = ids.iter().copied().max().unwrap_or(0);

        warn_orphaned_segments(&dir, &ids)?;

        let (merge_err_tx, merge_err_rx) = crossbeam_channel::bounded(1);
        let db = Db {
            shared: Arc::new(DbShared {
                dir,
                opts,
                state: RwLock::new(DbState {
                    segments,
                    index,
                    manifest: Some(man),
                    closed: false,
                }),
                next_segment_id: AtomicU64::new(max_id + 1),
                merge_running: AtomicBool::new(false),
                merge_err_tx,
                merge_err_rx,
                #[cfg(test)]
                hooks: merge::MergeHooks::default(),
            }),
        };

        // fresh directory: create the first segment and commit it
        {
            let mut state = db.shared.state.write();
            if state.segments.is_empty() {
                db.shared.add_segment(&mut state)?;
            }
        }

        Ok(db)
    }

    /// Syncs and closes every segment and the manifest.
    ///
    /// Taking the exclusive lock serialises the close with a running
    /// merge's install step; a merge that finishes later observes the
    /// closed state and rolls its output back instead of installing.
    pub fn close(self) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.closed {
            return Ok(());
        }

        for seg in &state.segments {
            seg.sync()?;
        }
        if let Some(manifest) = &state.manifest {
            manifest.sync_all()?;
        }

        state.closed = true;
        state.segments.clear();
        state.index.clear();
        state.manifest = None;

        Ok(())
    }

    /// Number of segments currently in the directory (including the active
    /// one).
    pub fn segment_count(&self) -> usize {
        self.shared.state.read().segments.len()
    }

    /// Segment ids in replay order; the last id is the active segment.
    pub fn segment_ids(&self) -> Vec<u64> {
        collect_ids(&self.shared.state.read().segments)
    }

    /// Sum of all on-disk segment file sizes.
    pub fn disk_size(&self) -> Result<u64> {
        let state = self.shared.state.read();
        let mut total = 0;
        for seg in &state.segments {
            total += seg.file_len()?;
        }
        Ok(total)
    }

    /// The merge error outlet.
    ///
    /// A single-slot, non-blocking channel: if a merge fails while a
    /// previous error is still undrained, the new error is logged and
    /// dropped. Callers interested in merge failures should drain this
    /// receiver.
    pub fn merge_errors(&self) -> Receiver<KvError> {
        self.shared.merge_err_rx.clone()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        // best-effort: push outstanding appends to stable storage; Drop
        // cannot propagate errors, and the data is replayable regardless
        let state = self.shared.state.read();
        if !state.closed {
            for seg in &state.segments {
                let _ = seg.sync();
            }
        }
    }
}

impl DbShared {
    /// Hands out the next segment id. Shared between foreground rollover
    /// and merge output creation.
    pub(crate) fn claim_next_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Creates an empty segment, appends it to the list as the new active
    /// segment, and commits the new list to the manifest.
    pub(crate) fn add_segment(&self, state: &mut DbState) -> Result<()> {
        let seg = Segment::create(&self.dir, self.claim_next_segment_id())?;
        state.segments.push(Arc::new(seg));
        state.manifest = Some(manifest::overwrite_manifest(
            &self.dir,
            &collect_ids(&state.segments),
        )?);
        Ok(())
    }
}

pub(crate) fn collect_ids(segments: &[Arc<Segment>]) -> Vec<u64> {
    segments.iter().map(|s| s.id()).collect()
}

/// Flags `seg*` files that are on disk but not in the manifest. These are
/// left behind when a crash interrupts a merge between creating outputs and
/// committing the manifest; they are unreachable and harmless, so opening
/// proceeds.
fn warn_orphaned_segments(dir: &Path, ids: &[u64]) -> Result<()> {
    let expected: HashSet<String> = ids.iter().map(|&id| segment::segment_file_name(id)).collect();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("seg") {
            continue;
        }
        if !expected.contains(name.as_ref()) {
            log::warn!("orphaned segment file {:?} is not in the manifest", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
