//! Durable file primitives: atomic replacement and durable creation.
//!
//! Both helpers follow the classic recipe — write to a temp file in the same
//! directory, fsync the file, rename, fsync the directory — so a crash at
//! any point leaves either the old contents or the new contents, never a
//! mix, and the directory entry itself survives power loss.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

/// Atomically replaces the file at `path` with `data`.
///
/// Writes to `<path>.tmp` (which must not already exist), fsyncs it, renames
/// it over `path`, fsyncs the parent directory, and returns a fresh
/// read/write handle to the new file. On any error the temp file is
/// removed.
pub fn replace_file_atomic(path: &Path, data: &[u8]) -> io::Result<File> {
    let tmp_path = path.with_extension("tmp");

    let result = write_and_rename(path, &tmp_path, data);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_rename(path: &Path, tmp_path: &Path, data: &[u8]) -> io::Result<File> {
    use std::io::Write;

    let mut tmp = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(tmp_path)?;

    tmp.write_all(data)?;
    tmp.sync_all()?;

    fs::rename(tmp_path, path)?;

    // the rename itself must survive a crash
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }

    // the temp handle points at the wrong path now; hand back a fresh one
    OpenOptions::new().read(true).write(true).open(path)
}

/// Creates (or opens) `dir/name` and makes its directory entry durable by
/// fsyncing both the file and the directory.
pub fn create_file_durable(dir: &Path, name: &str) -> io::Result<File> {
    let path = dir.join(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;

    file.sync_all()?;
    sync_dir(dir)?;

    Ok(file)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
