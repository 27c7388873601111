//! Tree nodes shared by the builder, the reconciler and the materializer,
//! plus the conversions between remote slash paths and local paths.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::remote::{RemoteHead, RemoteProperties};

/// Separator marker used by remote paths and folder keys.
pub const SEPARATOR: char = '/';

/// Remote path of the sync root.
pub const ROOT: &str = "/";

/// Child mapping of a folder, keyed by display name.
pub type Tree = BTreeMap<String, Entry>;

/// Which side an entry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// A file or folder from one side of the sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub origin: Origin,
    pub id: Option<u64>,
    /// Key within the parent mapping. Folders use their full remote path
    /// with a trailing separator (`/docs/`), files their bare name.
    pub display_name: String,
    pub file_name: String,
    /// Parent directory as a remote path, e.g. `/` or `/docs/`.
    pub directory: String,
    pub modified_at: DateTime<Utc>,
    pub size_in_bytes: Option<u64>,
    pub content_hash: Option<String>,
    pub content: Option<Vec<u8>>,
    pub children: Option<Tree>,
}

impl Entry {
    pub fn local_file(directory: &str, name: &str, modified_at: DateTime<Utc>) -> Self {
        Self {
            origin: Origin::Local,
            id: None,
            display_name: name.to_string(),
            file_name: name.to_string(),
            directory: directory.to_string(),
            modified_at,
            size_in_bytes: None,
            content_hash: None,
            content: None,
            children: None,
        }
    }

    pub fn local_folder(
        directory: &str,
        name: &str,
        modified_at: DateTime<Utc>,
        children: Tree,
    ) -> Self {
        let key = folder_key(directory, name);
        Self {
            origin: Origin::Local,
            id: None,
            file_name: key.clone(),
            display_name: key,
            directory: directory.to_string(),
            modified_at,
            size_in_bytes: None,
            content_hash: None,
            content: None,
            children: Some(children),
        }
    }

    /// Entry for one row of a remote listing of `directory`.
    pub fn from_head(head: RemoteHead, directory: &str) -> Self {
        let children = head.display_name.ends_with(SEPARATOR).then(Tree::new);
        Self {
            origin: Origin::Remote,
            id: Some(head.id),
            display_name: head.display_name,
            file_name: head.file_name,
            directory: directory.to_string(),
            modified_at: head.modified_at,
            size_in_bytes: None,
            content_hash: None,
            content: None,
            children,
        }
    }

    /// Entry built from a properties call; carries size and hash.
    pub fn from_properties(props: RemoteProperties) -> Self {
        let children = props.display_name.ends_with(SEPARATOR).then(Tree::new);
        Self {
            origin: Origin::Remote,
            id: Some(props.id),
            display_name: props.display_name,
            file_name: props.file_name,
            directory: normalize_remote(&props.directory),
            modified_at: props.modified_at,
            size_in_bytes: Some(props.size_in_bytes),
            content_hash: Some(props.hash),
            content: None,
            children,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.display_name.ends_with(SEPARATOR)
    }

    /// The last path segment, without any trailing separator.
    pub fn bare_name(&self) -> &str {
        let trimmed = self.display_name.trim_end_matches(SEPARATOR);
        trimmed.rsplit(SEPARATOR).next().unwrap_or(trimmed)
    }

    /// Remote path of this entry: the folder key itself, or directory + name.
    pub fn remote_path(&self) -> String {
        if self.is_folder() {
            self.display_name.clone()
        } else {
            format!("{}{}", self.directory, self.display_name)
        }
    }

    /// Where this entry lives under the local sync root.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        to_local_path(root, &self.remote_path())
    }

    pub fn children(&self) -> impl Iterator<Item = &Entry> {
        self.children.iter().flat_map(|c| c.values())
    }
}

/// Entries in `tree`, folders and everything below them included.
pub fn count_entries(tree: &Tree) -> usize {
    tree.values()
        .map(|e| 1 + e.children.as_ref().map(count_entries).unwrap_or(0))
        .sum()
}

/// Key of a folder named `name` inside `directory`.
pub fn folder_key(directory: &str, name: &str) -> String {
    normalize_remote(&format!("{directory}{SEPARATOR}{name}{SEPARATOR}"))
}

/// Backslashes become slashes, doubled separators collapse, and the
/// result always starts with a single `/`.
pub fn normalize_remote(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push(SEPARATOR);
    for ch in path.chars().map(|c| if c == '\\' { SEPARATOR } else { c }) {
        if ch == SEPARATOR && out.ends_with(SEPARATOR) {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Convert a remote path (`/a/b.txt`, `/a/`) into a path under `root`.
pub fn to_local_path(root: &Path, remote: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in remote.split(|c: char| c == '/' || c == '\\').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Remote segments of `local` relative to `root`, or `None` when the path
/// lies outside the root.
fn relative_segments(root: &Path, local: &Path) -> Option<Vec<String>> {
    let relative = local.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(segments)
}

/// Remote path of a directory under `root`, with a trailing separator.
pub fn to_remote_dir(root: &Path, local_dir: &Path) -> Option<String> {
    let segments = relative_segments(root, local_dir)?;
    if segments.is_empty() {
        return Some(ROOT.to_string());
    }
    Some(normalize_remote(&format!("{}{SEPARATOR}", segments.join("/"))))
}

/// Remote path of a file under `root`, without a trailing separator.
pub fn to_remote_path(root: &Path, local: &Path) -> Option<String> {
    let segments = relative_segments(root, local)?;
    Some(normalize_remote(&segments.join("/")))
}

/// Split a local path under `root` into its remote parent directory and
/// bare name. The root itself has no parent and yields `None`.
pub fn split_remote(root: &Path, local: &Path) -> Option<(String, String)> {
    let name = local.file_name()?.to_string_lossy().into_owned();
    let parent = to_remote_dir(root, local.parent()?)?;
    Some((parent, name))
}

/// Drop sub-second precision; the remote stores whole seconds.
pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_folder_detection_by_marker() {
        let folder = Entry::local_folder("/", "docs", t(0), Tree::new());
        let file = Entry::local_file("/", "docs", t(0));

        assert!(folder.is_folder());
        assert_eq!(folder.display_name, "/docs/");
        assert!(folder.children.is_some());

        assert!(!file.is_folder());
        assert!(file.children.is_none());
        assert_ne!(folder.display_name, file.display_name);
    }

    #[test]
    fn test_bare_name_and_remote_path() {
        let nested = Entry::local_folder("/docs/", "img", t(0), Tree::new());
        assert_eq!(nested.display_name, "/docs/img/");
        assert_eq!(nested.bare_name(), "img");
        assert_eq!(nested.remote_path(), "/docs/img/");

        let file = Entry::local_file("/docs/", "a.txt", t(0));
        assert_eq!(file.bare_name(), "a.txt");
        assert_eq!(file.remote_path(), "/docs/a.txt");
    }

    #[test]
    fn test_remote_head_gets_children_only_for_folders() {
        let folder = Entry::from_head(
            RemoteHead {
                id: 4,
                display_name: "/docs/".into(),
                file_name: "docs".into(),
                modified_at: t(10),
            },
            "/",
        );
        assert_eq!(folder.origin, Origin::Remote);
        assert_eq!(folder.id, Some(4));
        assert!(folder.children.is_some());

        let file = Entry::from_head(
            RemoteHead {
                id: 5,
                display_name: "a.txt".into(),
                file_name: "a_1.txt".into(),
                modified_at: t(10),
            },
            "/",
        );
        assert!(file.children.is_none());
        assert_eq!(file.file_name, "a_1.txt");
    }

    #[test]
    fn test_normalize_remote() {
        assert_eq!(normalize_remote(""), "/");
        assert_eq!(normalize_remote("/"), "/");
        assert_eq!(normalize_remote("//docs//img/"), "/docs/img/");
        assert_eq!(normalize_remote("docs\\img\\a.txt"), "/docs/img/a.txt");
    }

    #[test]
    fn test_path_round_trip() {
        let root = Path::new("/home/user/Sync");

        for dir in ["/", "/docs/", "/docs/img/", "/a b/c/"] {
            let local = to_local_path(root, dir);
            assert_eq!(to_remote_dir(root, &local).as_deref(), Some(dir));
        }

        for file in ["/a.txt", "/docs/report.docx", "/docs/img/photo 1.png"] {
            let local = to_local_path(root, file);
            assert_eq!(to_remote_path(root, &local).as_deref(), Some(file));
        }
    }

    #[test]
    fn test_root_maps_to_sync_root() {
        let root = Path::new("/srv/sync");
        assert_eq!(to_local_path(root, "/"), root);
        assert_eq!(to_local_path(root, "/docs/"), root.join("docs"));
    }

    #[test]
    fn test_split_remote() {
        let root = Path::new("/srv/sync");
        assert_eq!(
            split_remote(root, &root.join("docs").join("a.txt")),
            Some(("/docs/".to_string(), "a.txt".to_string()))
        );
        assert_eq!(
            split_remote(root, &root.join("photos")),
            Some(("/".to_string(), "photos".to_string()))
        );
        assert_eq!(split_remote(root, Path::new("/elsewhere/a.txt")), None);
    }

    #[test]
    fn test_truncate_to_seconds() {
        let precise = Utc.timestamp_opt(100, 999_000_000).unwrap();
        assert_eq!(truncate_to_seconds(precise), t(100));
    }
}
