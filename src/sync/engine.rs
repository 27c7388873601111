//! Sync engine: the reconciliation pass and live sync.
//!
//! A pass builds both trees, merges them newest-wins and materializes the
//! result. Live sync runs as its own task and maps watcher events straight
//! to remote mutations. Both share one [`SerializedRemote`], so the remote
//! sees a single writer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{IoContext, Result, SyncError};
use crate::remote::{CallTally, RemoteStore, SerializedRemote};
use crate::sync::echo::LocalWrites;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::mapper::EventMapper;
use crate::sync::materialize::{MaterializeReport, Materializer};
use crate::sync::merge::{merge, Inconsistency};
use crate::sync::watcher::LocalWatcher;
use crate::tree::builder::{build_local_tree, build_remote_tree};
use crate::tree::entry::{count_entries, normalize_remote, to_local_path, Tree, SEPARATOR};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Remote directory the pass started from.
    pub directory: String,
    pub local_entries: usize,
    pub remote_entries: usize,
    /// Entries the merge said must move.
    pub pending: usize,
    #[serde(flatten)]
    pub applied: MaterializeReport,
    pub inconsistencies: Vec<Inconsistency>,
    /// Remote calls the pass made, reads included.
    pub remote_calls: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.applied.failures.is_empty() && self.inconsistencies.is_empty()
    }
}

/// Handle to the running live-sync task.
pub struct LiveSync {
    handle: JoinHandle<()>,
}

impl LiveSync {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Resets the busy flag when a pass ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    root: PathBuf,
    remote: SerializedRemote,
    excludes: ExcludePatterns,
    writes: Arc<LocalWrites>,
    busy: AtomicBool,
}

impl SyncEngine {
    /// Engine mirroring `root` against `remote`. The root is canonicalized
    /// when it exists, so paths match what the watcher reports.
    pub fn new(root: PathBuf, remote: Arc<dyn RemoteStore>, excludes: ExcludePatterns) -> Self {
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            remote: SerializedRemote::new(remote),
            excludes,
            writes: Arc::new(LocalWrites::default()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a reconciliation pass is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass for the remote directory `dir` (`/` for
    /// the whole tree).
    ///
    /// Fails with [`SyncError::PassInProgress`] while another pass runs,
    /// and with [`SyncError::AuthenticationMissing`] before touching either
    /// side when there is no session. A remote error while building the
    /// trees aborts the pass; errors while materializing are reported per
    /// entry. Deletions are never propagated here.
    pub async fn run_reconciliation(&self, dir: &str) -> Result<SyncReport> {
        let _busy = BusyGuard::acquire(&self.busy).ok_or(SyncError::PassInProgress)?;
        if !self.remote.is_authenticated() {
            return Err(SyncError::AuthenticationMissing);
        }

        let started = Instant::now();
        let dir = directory_path(dir);
        info!(dir = %dir, root = %self.root.display(), "reconciliation pass started");

        let local_dir = to_local_path(&self.root, &dir);
        tokio::fs::create_dir_all(&local_dir)
            .await
            .with_path("creating directory", &local_dir)?;

        let tally = CallTally::new(&self.remote);
        let local = self.local_tree(&dir).await?;
        let remote = build_remote_tree(&tally, &dir, &self.excludes).await?;

        let merged = merge(&local, &remote);
        for issue in &merged.inconsistencies {
            warn!(
                error = %SyncError::InconsistentKind { key: issue.key.clone() },
                dir = %issue.directory,
                "left unresolved"
            );
        }

        let applied = Materializer::new(&self.root, &tally)
            .with_writes(&self.writes)
            .apply(&merged.pending)
            .await;

        let report = SyncReport {
            directory: dir,
            local_entries: count_entries(&local),
            remote_entries: count_entries(&remote),
            pending: merged.action_count(),
            applied,
            inconsistencies: merged.inconsistencies,
            remote_calls: tally.count(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            pending = report.pending,
            applied = report.applied.actions(),
            failed = report.applied.failures.len(),
            remote_calls = report.remote_calls,
            duration_ms = report.duration_ms,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn local_tree(&self, dir: &str) -> Result<Tree> {
        let root = self.root.clone();
        let dir = dir.to_string();
        let excludes = self.excludes.clone();
        tokio::task::spawn_blocking(move || build_local_tree(&root, &dir, &excludes))
            .await
            .map_err(|e| SyncError::local(std::io::Error::other(e), "scanning", &self.root))?
    }

    /// Event mapper sharing this engine's remote, excludes and echo record.
    pub fn mapper(&self) -> EventMapper {
        EventMapper::new(
            self.root.clone(),
            Arc::new(self.remote.clone()),
            self.excludes.clone(),
        )
        .with_writes(self.writes.clone())
    }

    /// Watch the sync root and mirror every change to the remote until the
    /// returned handle is stopped. Per-event failures are logged and the
    /// task keeps going.
    pub fn start_live_sync(&self, debounce: Duration) -> Result<LiveSync> {
        if !self.remote.is_authenticated() {
            return Err(SyncError::AuthenticationMissing);
        }
        let mut watcher = LocalWatcher::new(&self.root, debounce)?;
        let mapper = self.mapper();

        let handle = tokio::spawn(async move {
            info!(root = %watcher.root().display(), "live sync started");
            while let Some(event) = watcher.next_event().await {
                let kind = event.kind();
                let outcomes = mapper.handle(event).await;
                let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
                if failed > 0 {
                    warn!(kind, failed, "event handled with failures");
                }
            }
            info!("live sync stopped");
        });

        Ok(LiveSync { handle })
    }
}

/// Normalized remote directory with a trailing separator.
fn directory_path(dir: &str) -> String {
    let mut dir = normalize_remote(dir);
    if !dir.ends_with(SEPARATOR) {
        dir.push(SEPARATOR);
    }
    dir
}
