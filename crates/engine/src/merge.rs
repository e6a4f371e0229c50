//! Background merge (compaction).
//!
//! Collapses a snapshot of inactive segments into new segments holding one
//! set record per live key; overwritten records and tombstones (together
//! with everything they shadow) are dropped. The merge runs on its own
//! thread and holds no lock while streaming input records — only brief
//! shared-lock directory lookups — so foreground reads and writes proceed
//! while it works. The install step is the only critical section that
//! mutates state.
//!
//! ## Last-writer-wins across a concurrent merge
//!
//! The directory may change while the merge streams its snapshot. At
//! install time, for every key the merge copied, one of three cases holds:
//!
//! - the directory entry still equals the copied record's old location →
//!   swap it for the new location (same value, new file);
//! - the entry points elsewhere → the key was overwritten mid-merge; the
//!   newer set lives in a later segment and stays authoritative;
//! - the entry is gone → the key was deleted mid-merge; a tombstone in a
//!   later segment encodes the delete.
//!
//! In every case the post-install directory points at the most recent live
//! value, and nothing that was latest at snapshot time is dropped without a
//! strictly newer replacement in a later segment.

use crate::error::Result;
use crate::{collect_ids, manifest, DbShared, RecordLocation};
use record::WriteType;
use segment::{segment_path, Segment};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Segments and index changes produced by an in-flight merge. Owned by the
/// merge until install; rolled back (closed and unlinked) on failure.
struct MergeOutput {
    segments: Vec<Arc<Segment>>,
    /// key → (location before the merge, location in the merge output).
    changes: HashMap<String, (RecordLocation, RecordLocation)>,
}

impl DbShared {
    /// Non-blocking merge trigger.
    ///
    /// The `merge_running` flag is a single-slot semaphore: if a merge is
    /// already in flight the trigger is dropped silently — the next write
    /// whose post-rollover state still exceeds the threshold will trigger
    /// again.
    pub(crate) fn try_merge(self: &Arc<Self>) {
        if self
            .merge_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = Arc::clone(self);
        thread::spawn(move || {
            if let Err(err) = shared.merge() {
                // single-slot outlet: if nobody drained the previous error,
                // log this one and move on rather than block the worker
                if let Err(e) = shared.merge_err_tx.try_send(err) {
                    log::error!("merge failed, error slot full, dropping: {}", e.into_inner());
                }
            }
            shared.merge_running.store(false, Ordering::Release);
        });
    }

    fn merge(&self) -> Result<()> {
        // Snapshot the inactive prefix. Only inactive segments are merged —
        // they are immutable — and segments created after this point,
        // including new active segments from further rollovers, are out of
        // scope for this run.
        let (inputs, inputs_len) = {
            let state = self.state.read();
            if state.closed || state.segments.len() < 2 {
                return Ok(());
            }
            let len = state.segments.len() - 1;
            (state.segments[..len].to_vec(), len)
        };

        self.fire_merge_start();

        let mut out = MergeOutput {
            segments: Vec::new(),
            changes: HashMap::new(),
        };

        if let Err(e) = self.build_merge_output(&inputs, &mut out) {
            self.abort_merge(&out);
            return Err(e);
        }

        // finalise every output before any of them can become reachable
        for seg in &out.segments {
            if let Err(e) = seg.sync() {
                self.abort_merge(&out);
                return Err(e.into());
            }
        }

        self.fire_merge_apply();

        self.install_merge(inputs, inputs_len, out)
    }

    /// Streams the input segments into fresh output segments, keeping only
    /// records that are still the latest for their key.
    fn build_merge_output(&self, inputs: &[Arc<Segment>], out: &mut MergeOutput) -> Result<()> {
        let mut current = self.rollover_merge_segment(out)?;

        for seg in inputs {
            // Inputs were checksum-verified when they were opened, so the
            // copy path skips verification; bytes corrupted since then are
            // still caught by foreground reads.
            let mut scanner = seg.scanner(false);
            while let Some(rec) = scanner.next_record()? {
                let loc = {
                    let state = self.state.read();
                    state.index.get(&rec.key).cloned()
                };

                // The directory is always at least as recent as the
                // snapshot: a missing key was deleted, a different location
                // means the key was overwritten. Either way this record is
                // obsolete.
                let Some(loc) = loc else { continue };
                if loc.segment.id() != seg.id() || loc.offset != rec.offset {
                    continue;
                }

                // Roll the output before the write, and only when another
                // record is actually pending, so no run ends with an empty
                // trailing output.
                if current.size() >= self.opts.rollover_threshold {
                    current = self.rollover_merge_segment(out)?;
                }

                let offset =
                    current.append(WriteType::Set, &rec.key, &rec.value, self.opts.fsync_on_write)?;

                out.changes.insert(
                    rec.key,
                    (
                        loc,
                        RecordLocation {
                            segment: Arc::clone(&current),
                            offset,
                        },
                    ),
                );
            }
        }

        Ok(())
    }

    fn rollover_merge_segment(&self, out: &mut MergeOutput) -> Result<Arc<Segment>> {
        let seg = Arc::new(Segment::create(&self.dir, self.claim_next_segment_id())?);
        out.segments.push(Arc::clone(&seg));
        Ok(seg)
    }

    /// Swaps the merge output in under the exclusive lock: reconcile the
    /// directory, splice the segment list, commit the manifest, then doom
    /// the replaced inputs.
    fn install_merge(
        &self,
        inputs: Vec<Arc<Segment>>,
        inputs_len: usize,
        out: MergeOutput,
    ) -> Result<()> {
        let mut state = self.state.write();

        if state.closed {
            // the database went away while we were merging; nothing to
            // install into, so the outputs are garbage
            drop(state);
            self.abort_merge(&out);
            return Ok(());
        }

        // Reconcile: a key overwritten or deleted while the merge ran wins
        // over the copy (see the module docs for the case analysis).
        for (key, (before, after)) in &out.changes {
            let Some(current) = state.index.get(key) else {
                continue;
            };
            if !current.same_record(before) {
                continue;
            }
            state.index.insert(key.clone(), after.clone());
        }

        // Splice: the outputs replace the inactive prefix; the tail (the
        // active segment plus anything created during the merge) stays.
        let mut new_list = out.segments.clone();
        new_list.extend_from_slice(&state.segments[inputs_len..]);
        state.segments = new_list;

        state.manifest = Some(manifest::overwrite_manifest(
            &self.dir,
            &collect_ids(&state.segments),
        )?);

        // The replaced inputs are doomed: unlink the files and let the
        // handles close as the last references drop. Unlink failures are
        // not fatal — the next open reports them as orphans.
        for seg in &inputs {
            let path = segment_path(&self.dir, seg.id());
            if let Err(e) = fs::remove_file(&path) {
                log::error!("remove merged segment {}: {}", seg.id(), e);
            }
        }

        Ok(())
    }

    /// Rolls back an in-flight merge: every output segment created so far is
    /// closed and unlinked. The live segment list, directory and manifest
    /// were never touched.
    fn abort_merge(&self, out: &MergeOutput) {
        log::warn!(
            "merge failed, removing {} output segment(s)",
            out.segments.len()
        );
        for seg in &out.segments {
            let path = segment_path(&self.dir, seg.id());
            if let Err(e) = fs::remove_file(&path) {
                log::error!("remove aborted merge segment {}: {}", seg.id(), e);
            }
        }
    }

    #[cfg(test)]
    fn fire_merge_start(&self) {
        let hook = self.hooks.on_start.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    #[cfg(not(test))]
    fn fire_merge_start(&self) {}

    #[cfg(test)]
    fn fire_merge_apply(&self) {
        let hook = self.hooks.on_apply.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    #[cfg(not(test))]
    fn fire_merge_apply(&self) {}
}

/// Callbacks that make deterministic merge/concurrency tests possible.
/// Compiled only into test builds; the production merge runs hook-free.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MergeHooks {
    pub(crate) on_start: parking_lot::Mutex<Option<MergeHook>>,
    pub(crate) on_apply: parking_lot::Mutex<Option<MergeHook>>,
}

#[cfg(test)]
pub(crate) type MergeHook = Arc<dyn Fn() + Send + Sync>;

#[cfg(test)]
impl crate::Db {
    /// Installs a callback fired after the merge snapshots its inputs and
    /// before it starts streaming them.
    pub(crate) fn set_on_merge_start(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.shared.hooks.on_start.lock() = Some(Arc::new(hook));
    }

    /// Installs a callback fired after outputs are finalised and before the
    /// install step takes the exclusive lock.
    pub(crate) fn set_on_merge_apply(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.shared.hooks.on_apply.lock() = Some(Arc::new(hook));
    }

    /// Whether a merge is currently in flight.
    pub(crate) fn merge_in_flight(&self) -> bool {
        self.shared.merge_running.load(Ordering::Acquire)
    }
}
