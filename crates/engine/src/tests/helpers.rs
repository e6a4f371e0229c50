use crate::{Db, Options};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Opens a fresh database in a temp directory.
pub fn setup_db(opts: Options) -> (TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), opts).unwrap();
    (dir, db)
}

/// Options with merging off, for tests that only exercise the write path.
pub fn no_merge() -> Options {
    Options {
        merge_enabled: false,
        ..Options::default()
    }
}

/// Blocks until no merge is in flight. The trigger flips the flag in the
/// foreground before spawning the worker, so a merge started by a write
/// that has returned is always observed.
pub fn wait_for_merge(db: &Db) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while db.merge_in_flight() {
        assert!(Instant::now() < deadline, "merge did not finish in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Names of the `seg*` files currently on disk, sorted.
pub fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("seg"))
        .collect();
    names.sort();
    names
}
