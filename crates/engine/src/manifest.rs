//! The `MANIFEST` file: the durable list of segment ids in replay order.
//!
//! UTF-8 text, one decimal id per line. File order is replay order — the
//! later a segment appears, the later it sits in history, and the last line
//! names the segment that becomes active on reopen. The file is rewritten
//! atomically (see [`fsio`](crate::fsio)) whenever the segment list changes.

use crate::error::{KvError, Result};
use crate::fsio;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

/// Name of the manifest file within the data directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Opens the manifest, durably creating an empty one if it does not exist.
pub fn ensure_manifest(dir: &Path) -> Result<File> {
    let path = dir.join(MANIFEST_FILENAME);
    if path.exists() {
        Ok(OpenOptions::new().read(true).write(true).open(&path)?)
    } else {
        Ok(fsio::create_file_durable(dir, MANIFEST_FILENAME)?)
    }
}

/// Parses the segment ids out of an open manifest, in replay order.
///
/// An id that fails to parse is corruption: loading a wrong segment set
/// silently would be worse than refusing to open.
pub fn read_segment_ids(manifest: &mut File) -> Result<Vec<u64>> {
    let mut contents = String::new();
    manifest.read_to_string(&mut contents)?;

    let mut ids = Vec::new();
    for token in contents.split_whitespace() {
        let id = token.parse::<u64>().map_err(|_| {
            KvError::Corruption(format!("manifest lists invalid segment id {:?}", token))
        })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Serialises `ids` and atomically rewrites the manifest, returning the new
/// handle for future rewrites.
pub fn overwrite_manifest(dir: &Path, ids: &[u64]) -> Result<File> {
    let buf: String = ids.iter().map(|id| format!("{}\n", id)).collect();
    Ok(fsio::replace_file_atomic(
        &dir.join(MANIFEST_FILENAME),
        buf.as_bytes(),
    )?)
}
