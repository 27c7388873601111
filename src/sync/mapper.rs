//! Live sync: maps local file system events to remote mutations.
//!
//! Every event is translated into a remote parent directory plus a bare
//! name and handled on its own. A failure is logged and returned with the
//! event; it never stops the caller's loop.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IoContext, Result, SyncError};
use crate::remote::RemoteStore;
use crate::sync::echo::LocalWrites;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::watcher::FsEvent;
use crate::tree::entry::{folder_key, split_remote, to_remote_path, truncate_to_seconds};

/// What the mapper did for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MappedAction {
    CreateFolder,
    Upload,
    /// Changed file: delete the remote copy, upload the new one.
    Replace,
    DeleteFolder,
    DeleteFile,
    RenameFolder,
    RenameFile,
    /// Moved to another directory, renamed on the way if needed.
    MoveFolder,
    MoveFile,
    /// Excluded, echoed, vanished, or unknown to the remote.
    Skipped,
}

#[derive(Debug)]
pub struct Outcome {
    pub path: PathBuf,
    pub action: MappedAction,
    pub error: Option<SyncError>,
}

impl Outcome {
    fn skipped(path: PathBuf) -> Self {
        Self {
            path,
            action: MappedAction::Skipped,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct EventMapper {
    root: PathBuf,
    remote: Arc<dyn RemoteStore>,
    excludes: ExcludePatterns,
    writes: Arc<LocalWrites>,
}

impl EventMapper {
    pub fn new(root: PathBuf, remote: Arc<dyn RemoteStore>, excludes: ExcludePatterns) -> Self {
        Self {
            root,
            remote,
            excludes,
            writes: Arc::new(LocalWrites::default()),
        }
    }

    /// Share the record of files the reconciliation pass wrote.
    pub fn with_writes(mut self, writes: Arc<LocalWrites>) -> Self {
        self.writes = writes;
        self
    }

    /// Handle one event and everything it expands into. A created directory
    /// queues a synthetic `Created` for each entry already inside it; the
    /// queue is drained before returning.
    pub async fn handle(&self, event: FsEvent) -> Vec<Outcome> {
        let mut queue = VecDeque::from([event]);
        let mut outcomes = Vec::new();

        while let Some(event) = queue.pop_front() {
            let Some(outcome) = self.handle_one(event, &mut queue).await else {
                continue;
            };
            match &outcome.error {
                None if outcome.action == MappedAction::Skipped => {
                    debug!(path = %outcome.path.display(), "event skipped");
                }
                None => info!(
                    path = %outcome.path.display(),
                    action = ?outcome.action,
                    "remote updated"
                ),
                Some(err) => warn!(
                    path = %outcome.path.display(),
                    action = ?outcome.action,
                    error = %err,
                    "live sync action failed"
                ),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn handle_one(&self, event: FsEvent, queue: &mut VecDeque<FsEvent>) -> Option<Outcome> {
        let outcome = match event {
            FsEvent::Created(path) => {
                if self.ignored(&path) || self.writes.is_recent(&path) {
                    Outcome::skipped(path)
                } else {
                    self.created(path, queue).await
                }
            }
            FsEvent::Changed(path) => {
                if self.ignored(&path) || self.writes.is_recent(&path) {
                    Outcome::skipped(path)
                } else {
                    self.changed(path).await
                }
            }
            FsEvent::Deleted { path, is_dir } => {
                if self.ignored(&path) {
                    Outcome::skipped(path)
                } else {
                    self.deleted(path, is_dir).await
                }
            }
            FsEvent::Renamed { from, to } => {
                return self.renamed(from, to, queue).await;
            }
        };
        Some(outcome)
    }

    fn ignored(&self, path: &Path) -> bool {
        match to_remote_path(&self.root, path) {
            Some(remote) => remote == "/" || self.excludes.is_excluded(&remote),
            None => true,
        }
    }

    async fn created(&self, path: PathBuf, queue: &mut VecDeque<FsEvent>) -> Outcome {
        let Some((dir, name)) = split_remote(&self.root, &path) else {
            return Outcome::skipped(path);
        };

        if path.is_dir() {
            info!(name = %name, parent = %dir, "directory created");
            let mut result = self
                .remote
                .create_directory(&name, &dir)
                .await
                .and_then(|ok| accepted(ok, "createDir", folder_key(&dir, &name)));
            if result.is_ok() {
                result = enqueue_children(&path, queue).await;
            }
            finish(path, MappedAction::CreateFolder, result)
        } else if path.is_file() {
            info!(name = %name, dir = %dir, "file created");
            let result = self.upload(&path, &dir, &name).await;
            finish(path, MappedAction::Upload, result)
        } else {
            // Gone again before we got to it.
            Outcome::skipped(path)
        }
    }

    async fn changed(&self, path: PathBuf) -> Outcome {
        let Some((dir, name)) = split_remote(&self.root, &path) else {
            return Outcome::skipped(path);
        };
        if !path.is_file() {
            return Outcome::skipped(path);
        }

        info!(name = %name, dir = %dir, "file changed");
        let result = self.replace(&path, &dir, &name).await;

        match result {
            Ok(false) => Outcome::skipped(path),
            Ok(true) => finish(path, MappedAction::Replace, Ok(())),
            Err(err) => finish(path, MappedAction::Replace, Err(err)),
        }
    }

    async fn deleted(&self, path: PathBuf, is_dir: bool) -> Outcome {
        let Some((dir, name)) = split_remote(&self.root, &path) else {
            return Outcome::skipped(path);
        };

        if is_dir {
            let key = folder_key(&dir, &name);
            info!(folder = %key, "directory deleted");
            let result = self
                .remote
                .delete_folder(&key)
                .await
                .and_then(|ok| accepted(ok, "deleteFolder", key.clone()));
            finish(path, MappedAction::DeleteFolder, result)
        } else {
            info!(name = %name, dir = %dir, "file deleted");
            let result = self.delete_file(&dir, &name).await;
            finish(path, MappedAction::DeleteFile, result)
        }
    }

    async fn renamed(
        &self,
        from: PathBuf,
        to: PathBuf,
        queue: &mut VecDeque<FsEvent>,
    ) -> Option<Outcome> {
        let from_ignored = self.ignored(&from);
        let to_ignored = self.ignored(&to);
        let is_dir = to.is_dir();

        let (Some((old_dir, old_name)), Some((new_dir, new_name))) =
            (split_remote(&self.root, &from), split_remote(&self.root, &to))
        else {
            return Some(Outcome::skipped(to));
        };

        // Renaming from or to an excluded name is a delete of the old path
        // plus a create of the new.
        if from_ignored || to_ignored {
            debug!(from = %from.display(), to = %to.display(), "rename split into delete and create");
            if !to_ignored {
                queue.push_front(FsEvent::Created(to));
            }
            if !from_ignored {
                queue.push_front(FsEvent::Deleted { path: from, is_dir });
            }
            return None;
        }

        if old_dir != new_dir {
            return Some(if is_dir {
                info!(from = %folder_key(&old_dir, &old_name), to = %new_dir, "directory moved");
                let result = self
                    .move_folder(&old_dir, &old_name, &new_dir, &new_name)
                    .await;
                finish(to, MappedAction::MoveFolder, result)
            } else {
                info!(name = %old_name, from = %old_dir, to = %new_dir, "file moved");
                let result = self
                    .move_file(&old_dir, &old_name, &new_dir, &new_name)
                    .await;
                finish(to, MappedAction::MoveFile, result)
            });
        }

        let outcome = if is_dir {
            let source = folder_key(&old_dir, &old_name);
            info!(source = %source, new_name = %new_name, "directory renamed");
            let result = self
                .remote
                .rename_folder(&source, &new_name, &old_dir, &old_dir)
                .await
                .and_then(|ok| accepted(ok, "renameFolder", source.clone()));
            finish(to, MappedAction::RenameFolder, result)
        } else {
            info!(old_name = %old_name, new_name = %new_name, dir = %old_dir, "file renamed");
            let result = self.rename_file(&old_dir, &old_name, &new_name).await;
            finish(to, MappedAction::RenameFile, result)
        };
        Some(outcome)
    }

    /// `Ok(false)` when the remote has no such file.
    async fn replace(&self, path: &Path, dir: &str, name: &str) -> Result<bool> {
        if !self.remote.exists(name, dir).await? {
            debug!(name, dir, "not on the remote, nothing to replace");
            return Ok(false);
        }
        let hash = self.remote.compute_hash(name, dir).await?;
        let deleted = self.remote.delete_file(&hash).await?;
        accepted(deleted, "deleteFile", format!("{dir}{name}"))?;
        self.upload(path, dir, name).await?;
        Ok(true)
    }

    async fn delete_file(&self, dir: &str, name: &str) -> Result<()> {
        let hash = self.remote.compute_hash(name, dir).await?;
        let ok = self.remote.delete_file(&hash).await?;
        accepted(ok, "deleteFile", format!("{dir}{name}"))
    }

    /// Files are addressed by content hash, looked up under the old name.
    async fn rename_file(&self, dir: &str, old_name: &str, new_name: &str) -> Result<()> {
        let hash = self.remote.compute_hash(old_name, dir).await?;
        let ok = self.remote.rename_file(&hash, new_name, dir).await?;
        accepted(ok, "renameFile", format!("{dir}{old_name}"))
    }

    /// Move by hash, then rename in the target directory if the name
    /// changed too.
    async fn move_file(
        &self,
        old_dir: &str,
        old_name: &str,
        new_dir: &str,
        new_name: &str,
    ) -> Result<()> {
        let hash = self.remote.compute_hash(old_name, old_dir).await?;
        let ok = self.remote.move_file(&hash, new_dir).await?;
        accepted(ok, "move", format!("{old_dir}{old_name}"))?;
        if old_name != new_name {
            let ok = self.remote.rename_file(&hash, new_name, new_dir).await?;
            accepted(ok, "renameFile", format!("{new_dir}{old_name}"))?;
        }
        Ok(())
    }

    async fn move_folder(
        &self,
        old_dir: &str,
        old_name: &str,
        new_dir: &str,
        new_name: &str,
    ) -> Result<()> {
        let source = folder_key(old_dir, old_name);
        let ok = self.remote.move_folder(&source, new_dir, old_dir).await?;
        accepted(ok, "move", source)?;
        if old_name != new_name {
            let moved = folder_key(new_dir, old_name);
            let ok = self
                .remote
                .rename_folder(&moved, new_name, new_dir, new_dir)
                .await?;
            accepted(ok, "renameFolder", moved)?;
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, dir: &str, name: &str) -> Result<()> {
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .with_path("inspecting", path)?;
        let modified_at = truncate_to_seconds(DateTime::<Utc>::from(modified));
        let ok = self.remote.upload_file(path, dir, modified_at).await?;
        accepted(ok, "uploadFile", format!("{dir}{name}"))
    }
}

/// Queue a `Created` for every entry directly inside `dir`: files first,
/// then directories, each sorted by name. Symlinks are not followed.
async fn enqueue_children(dir: &Path, queue: &mut VecDeque<FsEvent>) -> Result<()> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .with_path("reading directory", dir)?;
    while let Some(item) = read_dir
        .next_entry()
        .await
        .with_path("reading directory", dir)?
    {
        let file_type = item.file_type().await.with_path("inspecting", item.path())?;
        if file_type.is_dir() {
            dirs.push(item.path());
        } else if file_type.is_file() {
            files.push(item.path());
        }
    }
    files.sort();
    dirs.sort();

    debug!(dir = %dir.display(), files = files.len(), dirs = dirs.len(), "replaying directory contents");
    queue.extend(files.into_iter().chain(dirs).map(FsEvent::Created));
    Ok(())
}

fn accepted(ok: bool, method: &'static str, target: impl Into<String>) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SyncError::RemoteRejected {
            method,
            target: target.into(),
        })
    }
}

fn finish(path: PathBuf, action: MappedAction, result: Result<()>) -> Outcome {
    Outcome {
        path,
        action,
        error: result.err(),
    }
}
