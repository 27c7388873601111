//! Builds comparable trees of both sides, rooted at a remote directory.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::error::{IoContext, Result};
use crate::remote::RemoteStore;
use crate::sync::exclude::ExcludePatterns;
use crate::tree::entry::{folder_key, to_local_path, truncate_to_seconds, Entry, Tree};

/// Scan the local directory that corresponds to the remote directory `dir`
/// (under `root`) and everything below it. Symlinks are not followed.
pub fn build_local_tree(root: &Path, dir: &str, excludes: &ExcludePatterns) -> Result<Tree> {
    let path = to_local_path(root, dir);
    let mut tree = Tree::new();

    let read_dir = fs::read_dir(&path).with_path("reading directory", &path)?;
    for item in read_dir {
        let item = item.with_path("reading directory", &path)?;
        let name = item.file_name().to_string_lossy().into_owned();
        let file_type = item.file_type().with_path("inspecting", item.path())?;
        if file_type.is_symlink() {
            continue;
        }

        let remote_path = if file_type.is_dir() {
            folder_key(dir, &name)
        } else {
            format!("{dir}{name}")
        };
        if excludes.is_excluded(&remote_path) {
            continue;
        }

        let metadata = item.metadata().with_path("inspecting", item.path())?;
        let modified = metadata.modified().with_path("inspecting", item.path())?;
        let modified_at = truncate_to_seconds(DateTime::<Utc>::from(modified));

        let entry = if file_type.is_dir() {
            let children = build_local_tree(root, &remote_path, excludes)?;
            Entry::local_folder(dir, &name, modified_at, children)
        } else {
            Entry::local_file(dir, &name, modified_at)
        };
        tree.insert(entry.display_name.clone(), entry);
    }

    Ok(tree)
}

/// List `dir` on the remote and recurse into every folder, one listing
/// call per directory. Any failed call fails the whole build.
pub fn build_remote_tree<'a>(
    remote: &'a dyn RemoteStore,
    dir: &'a str,
    excludes: &'a ExcludePatterns,
) -> BoxFuture<'a, Result<Tree>> {
    async move {
        let heads = remote.list_directory(dir).await?;
        debug!(dir, entries = heads.len(), "listed remote directory");

        let mut tree = Tree::new();
        for head in heads {
            let mut entry = Entry::from_head(head, dir);
            if excludes.is_excluded(&entry.remote_path()) {
                continue;
            }
            if entry.is_folder() {
                let key = entry.display_name.clone();
                entry.children = Some(build_remote_tree(remote, &key, excludes).await?);
            }
            tree.insert(entry.display_name.clone(), entry);
        }
        Ok(tree)
    }
    .boxed()
}
