// Shared fixtures for the sync tests

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;
use redsync::remote::MemoryRemote;
use redsync::sync::{ExcludePatterns, SyncEngine};
use tempfile::TempDir;

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn write_file(path: &Path, content: &[u8], mtime: i64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

pub fn mtime_of(path: &Path) -> i64 {
    let meta = std::fs::metadata(path).unwrap();
    FileTime::from_last_modification_time(&meta).unix_seconds()
}

pub struct Fixture {
    // Held so the scratch directory lives as long as the engine.
    _dir: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub engine: SyncEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_remote(MemoryRemote::new())
    }

    pub fn with_remote(remote: MemoryRemote) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(remote);
        let engine = SyncEngine::new(
            dir.path().to_path_buf(),
            remote.clone(),
            ExcludePatterns::default(),
        );
        Self {
            _dir: dir,
            remote,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.engine.root()
    }
}
