//! Write path: `set()`, `delete()`, rollover, and the merge trigger.
//!
//! All mutations hold the exclusive lock end to end: append a record to the
//! active segment, update the key directory, then handle rollover and the
//! merge trigger before releasing the lock. Appends are therefore fully
//! serialised and every reader observes either the state before a write or
//! after it, never in between.

use crate::error::{KvError, Result};
use crate::{Db, DbState, RecordLocation};
use record::WriteType;
use segment::Segment;
use std::sync::Arc;

impl Db {
    /// Inserts or overwrites a key.
    ///
    /// Appends a set record to the active segment and points the key
    /// directory at it. Crossing the rollover threshold creates a new
    /// active segment; if that leaves at least `merge_threshold` inactive
    /// segments and merging is enabled, a background merge is triggered
    /// (non-blocking, dropped if one is already running).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        if value.len() > u32::MAX as usize {
            return Err(KvError::InvalidArgument(
                "value exceeds 4 GiB".to_string(),
            ));
        }

        let mut state = self.shared.state.write();
        ensure_open(&state)?;

        let active = active_segment(&state);
        let offset = active.append(WriteType::Set, key, value, self.shared.opts.fsync_on_write)?;

        // offset equals the pre-append size; if power is lost right here the
        // index is rebuilt from the segments on the next open anyway
        state.index.insert(
            key.to_string(),
            RecordLocation {
                segment: Arc::clone(&active),
                offset,
            },
        );

        self.roll_and_maybe_merge(&mut state, &active)
    }

    /// Deletes a key by appending a tombstone.
    ///
    /// Fails fast with [`KvError::KeyNotFound`] when the key is absent. The
    /// key leaves the directory immediately; on disk the tombstone shadows
    /// older records until a merge drops both.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let mut state = self.shared.state.write();
        ensure_open(&state)?;

        if !state.index.contains_key(key) {
            return Err(KvError::KeyNotFound);
        }

        let active = active_segment(&state);
        active.append(WriteType::Delete, key, "", self.shared.opts.fsync_on_write)?;
        state.index.remove(key);

        self.roll_and_maybe_merge(&mut state, &active)
    }

    /// Post-append bookkeeping shared by `set` and `delete`.
    ///
    /// Rollover happens after the write, so the record that crosses the
    /// threshold stays in the segment it was appended to and the *next*
    /// record opens the new one.
    fn roll_and_maybe_merge(&self, state: &mut DbState, active: &Segment) -> Result<()> {
        if active.size() < self.shared.opts.rollover_threshold {
            return Ok(());
        }

        self.shared.add_segment(state)?;

        // +1 because the threshold counts only inactive segments
        if self.shared.opts.merge_enabled
            && state.segments.len() >= self.shared.opts.merge_threshold + 1
        {
            self.shared.try_merge();
        }

        Ok(())
    }
}

fn active_segment(state: &DbState) -> Arc<Segment> {
    Arc::clone(
        state
            .segments
            .last()
            .expect("segment list is never empty while open"),
    )
}

fn ensure_open(state: &DbState) -> Result<()> {
    if state.closed {
        return Err(KvError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "database is closed",
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > u32::MAX as usize {
        return Err(KvError::InvalidArgument("key exceeds 4 GiB".to_string()));
    }
    Ok(())
}
