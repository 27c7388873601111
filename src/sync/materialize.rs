//! Applies a pending-actions tree to whichever side is behind.
//!
//! The walk is pre-order, so a folder always exists before anything is
//! written into it. A failing entry is recorded and its subtree skipped;
//! siblings still run.

use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IoContext, Result, SyncError};
use crate::remote::RemoteStore;
use crate::sync::echo::LocalWrites;
use crate::tree::entry::{to_local_path, Entry, Origin, Tree};

/// What a materialize walk did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub folders_pulled: usize,
    pub files_pulled: usize,
    pub bytes_pulled: u64,
    pub folders_pushed: usize,
    pub files_pushed: usize,
    pub failures: Vec<EntryFailure>,
}

impl MaterializeReport {
    pub fn actions(&self) -> usize {
        self.folders_pulled + self.files_pulled + self.folders_pushed + self.files_pushed
    }
}

/// An entry that could not be applied.
#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub path: String,
    pub direction: &'static str,
    pub reason: String,
    /// Descendants left untouched because of this failure.
    pub skipped: usize,
}

pub struct Materializer<'a> {
    root: &'a Path,
    remote: &'a dyn RemoteStore,
    writes: Option<&'a LocalWrites>,
}

impl<'a> Materializer<'a> {
    pub fn new(root: &'a Path, remote: &'a dyn RemoteStore) -> Self {
        Self {
            root,
            remote,
            writes: None,
        }
    }

    /// Record every local write so live sync can ignore its echo.
    pub fn with_writes(mut self, writes: &'a LocalWrites) -> Self {
        self.writes = Some(writes);
        self
    }

    pub async fn apply(&self, pending: &Tree) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        self.walk(pending, &mut report).await;
        report
    }

    fn walk<'b>(&'b self, tree: &'b Tree, report: &'b mut MaterializeReport) -> BoxFuture<'b, ()> {
        async move {
            for entry in tree.values() {
                match self.apply_entry(entry, report).await {
                    Ok(()) => {
                        if let Some(children) = &entry.children {
                            self.walk(children, report).await;
                        }
                    }
                    Err(err) => {
                        let skipped = descendants(entry);
                        warn!(
                            path = %entry.remote_path(),
                            skipped,
                            error = %err,
                            "entry failed, skipping subtree"
                        );
                        report.failures.push(EntryFailure {
                            path: entry.remote_path(),
                            direction: direction(entry.origin),
                            reason: err.to_string(),
                            skipped,
                        });
                    }
                }
            }
        }
        .boxed()
    }

    async fn apply_entry(&self, entry: &Entry, report: &mut MaterializeReport) -> Result<()> {
        match (entry.origin, entry.is_folder()) {
            (Origin::Remote, true) => {
                self.pull_folder(entry).await?;
                report.folders_pulled += 1;
            }
            (Origin::Remote, false) => {
                report.bytes_pulled += self.pull_file(entry).await?;
                report.files_pulled += 1;
            }
            (Origin::Local, true) => {
                self.push_folder(entry).await?;
                report.folders_pushed += 1;
            }
            (Origin::Local, false) => {
                self.push_file(entry).await?;
                report.files_pushed += 1;
            }
        }
        Ok(())
    }

    async fn pull_folder(&self, entry: &Entry) -> Result<()> {
        let path = entry.local_path(self.root);
        if tokio::fs::try_exists(&path).await.with_path("inspecting", &path)? {
            debug!(path = %path.display(), "local folder already present");
            return Ok(());
        }

        info!(path = %path.display(), "creating local folder");
        tokio::fs::create_dir_all(&path)
            .await
            .with_path("creating directory", &path)?;
        set_mtime(&path, entry.modified_at)?;
        self.note_write(&path);
        Ok(())
    }

    /// Returns the number of bytes written.
    async fn pull_file(&self, entry: &Entry) -> Result<u64> {
        let id = entry.id.ok_or_else(|| {
            SyncError::malformed("getPropertiesAsXML", format!("{} has no id", entry.remote_path()))
        })?;
        let resolved = Entry::from_properties(self.remote.get_properties(id).await?);
        let path = to_local_path(
            self.root,
            &format!("{}{}", resolved.directory, resolved.display_name),
        );

        info!(id, path = %path.display(), "pulling file");
        let content = self.remote.get_content(id).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_path("creating directory", parent)?;
        }
        self.note_write(&path);
        tokio::fs::write(&path, &content)
            .await
            .with_path("writing", &path)?;
        set_mtime(&path, resolved.modified_at)?;

        info!(path = %path.display(), bytes = content.len(), "pulled file");
        Ok(content.len() as u64)
    }

    async fn push_folder(&self, entry: &Entry) -> Result<()> {
        let name = entry.bare_name();
        info!(name, parent = %entry.directory, "creating remote folder");
        if !self.remote.create_directory(name, &entry.directory).await? {
            return Err(SyncError::RemoteRejected {
                method: "createDir",
                target: entry.remote_path(),
            });
        }
        info!(path = %entry.remote_path(), "created remote folder");
        Ok(())
    }

    async fn push_file(&self, entry: &Entry) -> Result<()> {
        let path = entry.local_path(self.root);
        info!(path = %path.display(), dir = %entry.directory, "uploading file");
        if !self
            .remote
            .upload_file(&path, &entry.directory, entry.modified_at)
            .await?
        {
            return Err(SyncError::RemoteRejected {
                method: "uploadFile",
                target: entry.remote_path(),
            });
        }
        info!(path = %entry.remote_path(), "uploaded file");
        Ok(())
    }

    fn note_write(&self, path: &Path) {
        if let Some(writes) = self.writes {
            writes.record(path);
        }
    }
}

fn set_mtime(path: &Path, time: DateTime<Utc>) -> Result<()> {
    let mtime = FileTime::from_unix_time(time.timestamp(), 0);
    filetime::set_file_mtime(path, mtime).with_path("setting mtime of", path)
}

fn descendants(entry: &Entry) -> usize {
    entry.children().map(|c| 1 + descendants(c)).sum()
}

fn direction(origin: Origin) -> &'static str {
    match origin {
        Origin::Remote => "pull",
        Origin::Local => "push",
    }
}
