//! Error and `Result` types for the engine's public operations.

use record::RecordError;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, KvError>;

/// The error type surfaced by [`Db`](crate::Db) operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The key has never been written, or its latest record is a tombstone.
    #[error("key not found")]
    KeyNotFound,

    /// A record's stored checksum does not match its contents.
    #[error("checksum mismatch: expected {expected:#018x}, got {actual:#018x}")]
    ChecksumMismatch {
        /// Checksum stored in the record header.
        expected: u64,
        /// Checksum recomputed from the record contents.
        actual: u64,
    },

    /// On-disk data is structurally invalid (torn mid-stream record, bad
    /// manifest contents, unknown write-type tag).
    #[error("corruption: {0}")]
    Corruption(String),

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The caller passed an argument the engine cannot store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<RecordError> for KvError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Io(e) => KvError::Io(e),
            RecordError::ChecksumMismatch { expected, actual } => {
                KvError::ChecksumMismatch { expected, actual }
            }
            RecordError::Corrupt(msg) => KvError::Corruption(msg.to_string()),
        }
    }
}
