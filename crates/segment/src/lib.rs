//! # Segment — append-only record files
//!
//! A segment is an append-only file of [`record`]-encoded entries with a
//! monotonically assigned id that is never reused. Exactly one segment per
//! data directory is *active* (the tail, receiving appends); all others are
//! immutable and only read.
//!
//! All file access is positional: appends go through `write_all_at` at the
//! tracked size and reads through `read_exact_at`, so a segment handle can
//! serve concurrent readers and a scanner while the single appender works at
//! the tail. The appender is serialised externally (the engine's exclusive
//! lock); `size` is atomic only so readers can observe it without taking
//! that lock.

use record::{
    encode_record, read_record_at, RecordError, RecordScanner, ScannedRecord, WriteType,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A convenience `Result` carrying [`RecordError`], which already covers
/// everything that can go wrong at this layer (I/O, checksum, corruption).
pub type Result<T> = std::result::Result<T, RecordError>;

/// File name for the segment with the given id: `seg001`, `seg002`, ...
/// (more digits once ids exceed 999).
pub fn segment_file_name(id: u64) -> String {
    format!("seg{:03}", id)
}

/// Full path of the segment file with the given id inside `dir`.
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_file_name(id))
}

/// An open segment file with its tracked size.
pub struct Segment {
    id: u64,
    file: File,
    /// Bytes committed to the file. Only the appender mutates this, always
    /// under the engine's exclusive lock.
    size: AtomicU64,
}

impl Segment {
    /// Creates a fresh, empty segment file.
    ///
    /// Fails if a file for this id already exists; ids are never reused, so
    /// a collision means something else wrote into the data directory.
    pub fn create(dir: &Path, id: u64) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            id,
            file,
            size: AtomicU64::new(0),
        })
    }

    /// Opens an existing segment and scans it from the start.
    ///
    /// Returns the segment plus every complete record in file order, for
    /// replay into the key directory. The file is truncated to the end of
    /// the last complete record, dropping any torn tail left by a crash, so
    /// the next append starts at a record boundary. A checksum mismatch or
    /// structural corruption before the tail fails the open.
    pub fn open(dir: &Path, id: u64, verify_checksums: bool) -> Result<(Self, Vec<ScannedRecord>)> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut records = Vec::new();
        let mut scanner = RecordScanner::new(&file, verify_checksums);
        while let Some(rec) = scanner.next_record()? {
            records.push(rec);
        }
        let size = scanner.end_offset();

        file.set_len(size)?;

        Ok((
            Self {
                id,
                file,
                size: AtomicU64::new(size),
            },
            records,
        ))
    }

    /// Appends a record and returns its start offset.
    ///
    /// The record is encoded into a single buffer and written with one
    /// positional write. With `fsync` the file is synchronised before
    /// returning; without it the write is still visible to in-process
    /// positional reads through the page cache.
    pub fn append(&self, wt: WriteType, key: &str, value: &str, fsync: bool) -> Result<u64> {
        let offset = self.size.load(Ordering::Acquire);

        let mut buf = Vec::new();
        encode_record(&mut buf, wt, key, value);
        self.file.write_all_at(&buf, offset)?;

        self.size
            .store(offset + buf.len() as u64, Ordering::Release);

        if fsync {
            self.file.sync_all()?;
        }

        Ok(offset)
    }

    /// Decodes the record at `offset`, returning its value and write type.
    pub fn read_at(&self, offset: u64, verify: bool) -> Result<(String, WriteType)> {
        read_record_at(&self.file, offset, verify)
    }

    /// A positional scanner over this segment from offset 0.
    pub fn scanner(&self, verify: bool) -> RecordScanner<'_> {
        RecordScanner::new(&self.file, verify)
    }

    /// Flushes OS-buffered data for this segment to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// The segment's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes committed to this segment.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Current on-disk length of the segment file.
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
