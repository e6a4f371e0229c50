//! Read path: `get()` under the shared lock.

use crate::error::{KvError, Result};
use crate::Db;
use record::WriteType;

impl Db {
    /// Looks up the current value for `key`.
    ///
    /// Takes the shared lock, so any number of readers proceed in parallel
    /// with each other and with the merge's scan phase.
    ///
    /// # Errors
    ///
    /// - [`KvError::KeyNotFound`] if the key has never been written or its
    ///   latest record is a tombstone.
    /// - [`KvError::ChecksumMismatch`] if the stored record fails
    ///   verification (and checksums are enabled).
    /// - [`KvError::Io`] on a read failure.
    pub fn get(&self, key: &str) -> Result<String> {
        let state = self.shared.state.read();
        if state.closed {
            return Err(KvError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "database is closed",
            )));
        }

        let loc = state.index.get(key).ok_or(KvError::KeyNotFound)?;
        let (value, wt) = loc
            .segment
            .read_at(loc.offset, self.shared.opts.verify_checksums)?;

        match wt {
            WriteType::Set => Ok(value),
            WriteType::Delete => {
                // An indexed location always holds a set record in normal
                // operation; a tombstone here means the index and the file
                // diverged. Report the key as missing rather than invent a
                // value.
                log::warn!(
                    "index for key {:?} points at a tombstone (segment {}, offset {})",
                    key,
                    loc.segment.id(),
                    loc.offset
                );
                Err(KvError::KeyNotFound)
            }
        }
    }
}
