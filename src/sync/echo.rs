//! Paths the reconciliation pass wrote locally, so live sync can ignore the
//! watcher events those writes produce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a pulled path stays suppressed.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct LocalWrites {
    window: Duration,
    recent: Mutex<HashMap<PathBuf, Instant>>,
}

impl Default for LocalWrites {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl LocalWrites {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, path: &Path) {
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        recent.retain(|_, at| now.duration_since(*at) < self.window);
        recent.insert(path.to_path_buf(), now);
    }

    /// Whether `path` was written within the window.
    pub fn is_recent(&self, path: &Path) -> bool {
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent
            .get(path)
            .is_some_and(|at| at.elapsed() < self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_path_is_recent() {
        let writes = LocalWrites::default();
        writes.record(Path::new("/sync/a.txt"));

        assert!(writes.is_recent(Path::new("/sync/a.txt")));
        assert!(!writes.is_recent(Path::new("/sync/b.txt")));
    }

    #[test]
    fn test_window_expires() {
        let writes = LocalWrites::new(Duration::from_millis(20));
        writes.record(Path::new("/sync/a.txt"));
        std::thread::sleep(Duration::from_millis(40));

        assert!(!writes.is_recent(Path::new("/sync/a.txt")));
    }
}
