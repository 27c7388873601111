//! In-process remote store.
//!
//! Behaves like the server for every [`RemoteStore`] operation and records
//! each call, so sync passes and live-sync handlers can be checked call by
//! call without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{IoContext, Result, SyncError};
use crate::remote::{RemoteHead, RemoteProperties, RemoteStore};
use crate::tree::entry::{folder_key, normalize_remote, truncate_to_seconds};

/// A call received by [`MemoryRemote`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListDirectory(String),
    GetProperties(u64),
    GetContent(u64),
    Exists { name: String, dir: String },
    ComputeHash { name: String, dir: String },
    Upload { name: String, dir: String },
    CreateDirectory { name: String, parent: String },
    RenameFile { hash: String, new_name: String, dir: String },
    RenameFolder { source: String, new_name: String, old_root: String },
    MoveFile { hash: String, dir: String },
    MoveFolder { source: String, target: String },
    CopyFile { hash: String, dir: String },
    CopyFolder { source: String, target: String },
    DeleteFile(String),
    DeleteFolder(String),
}

impl RemoteCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RemoteCall::Upload { .. }
                | RemoteCall::CreateDirectory { .. }
                | RemoteCall::RenameFile { .. }
                | RemoteCall::RenameFolder { .. }
                | RemoteCall::MoveFile { .. }
                | RemoteCall::MoveFolder { .. }
                | RemoteCall::CopyFile { .. }
                | RemoteCall::CopyFolder { .. }
                | RemoteCall::DeleteFile(_)
                | RemoteCall::DeleteFolder(_)
        )
    }

    /// Wire name of the remote method.
    pub fn method(&self) -> &'static str {
        match self {
            RemoteCall::ListDirectory(_) => "getFileHeadsAsXML",
            RemoteCall::GetProperties(_) => "getPropertiesAsXML",
            RemoteCall::GetContent(_) => "getContent",
            RemoteCall::Exists { .. } => "exists",
            RemoteCall::ComputeHash { .. } => "getHash",
            RemoteCall::Upload { .. } => "uploadFile",
            RemoteCall::CreateDirectory { .. } => "createDir",
            RemoteCall::RenameFile { .. } => "renameFile",
            RemoteCall::RenameFolder { .. } => "renameFolder",
            RemoteCall::MoveFile { .. } | RemoteCall::MoveFolder { .. } => "move",
            RemoteCall::CopyFile { .. } | RemoteCall::CopyFolder { .. } => "copy",
            RemoteCall::DeleteFile(_) => "deleteFile",
            RemoteCall::DeleteFolder(_) => "deleteFolder",
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: u64,
    display_name: String,
    file_name: String,
    directory: String,
    modified_at: DateTime<Utc>,
    content: Vec<u8>,
}

impl Node {
    fn is_folder(&self) -> bool {
        self.display_name.ends_with('/')
    }

    fn hash(&self) -> String {
        blake3::hash(&self.content).to_hex().to_string()
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<u64, Node>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    offline: bool,
    failing: HashSet<&'static str>,
    rejecting: HashSet<&'static str>,
    /// Location `get_properties` reports instead of the listed one.
    resolved: HashMap<u64, (String, String)>,
}

impl State {
    fn insert(&mut self, mut node: Node) -> u64 {
        self.next_id += 1;
        node.id = self.next_id;
        self.nodes.insert(node.id, node);
        self.next_id
    }

    fn find(&self, name: &str, dir: &str) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.directory == dir && !n.is_folder() && n.display_name == name)
    }

    fn find_by_hash(&self, hash: &str) -> Option<u64> {
        self.nodes
            .values()
            .find(|n| !n.is_folder() && n.hash() == hash)
            .map(|n| n.id)
    }

    fn folder_exists(&self, key: &str) -> bool {
        key == "/" || self.nodes.values().any(|n| n.display_name == key)
    }

    /// Re-home everything below the folder `source` under `target`. The
    /// folder's own node is left to the caller.
    fn relocate_below(&mut self, source: &str, target: &str) {
        for node in self.nodes.values_mut() {
            if let Some(rest) = node.directory.strip_prefix(source) {
                node.directory = format!("{target}{rest}");
                if let Some(rest) = node.display_name.strip_prefix(source) {
                    node.display_name = format!("{target}{rest}");
                }
            }
        }
    }

    /// The folder `source` and everything below it, re-keyed under `target`
    /// with the folder itself placed in `parent`.
    fn copies_of(&self, source: &str, target: &str, parent: &str) -> Vec<Node> {
        let mut copies = Vec::new();
        for node in self.nodes.values() {
            let mut copy = node.clone();
            if node.display_name == source {
                copy.display_name = target.to_string();
                copy.directory = parent.to_string();
            } else if let Some(rest) = node.directory.strip_prefix(source) {
                copy.directory = format!("{target}{rest}");
                if let Some(rest) = node.display_name.strip_prefix(source) {
                    copy.display_name = format!("{target}{rest}");
                }
            } else {
                continue;
            }
            copies.push(copy);
        }
        copies
    }

    /// Checks shared by folder moves and copies; `None` when refused.
    fn folder_target(&self, source: &str, target: &str) -> Option<String> {
        let name = source.trim_end_matches('/').rsplit('/').next()?;
        let key = folder_key(target, name);
        let allowed = source != "/"
            && self.folder_exists(source)
            && self.folder_exists(target)
            && !target.starts_with(source)
            && !self.folder_exists(&key);
        allowed.then_some(key)
    }

    /// Checks shared by file moves and copies; the file's id when allowed.
    fn file_target(&self, hash: &str, target: &str) -> Option<u64> {
        let id = self.find_by_hash(hash)?;
        let name = &self.nodes.get(&id)?.display_name;
        let allowed = self.folder_exists(target) && self.find(name, target).is_none();
        allowed.then_some(id)
    }
}

/// Remote store held entirely in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
    authenticated: bool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            authenticated: true,
        }
    }

    /// A store that reports no session key.
    pub fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            ..Self::new()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a file without recording a call. Returns its id.
    pub fn put_file(&self, dir: &str, name: &str, content: &[u8], modified_at: DateTime<Utc>) -> u64 {
        let mut state = self.state();
        let dir = normalize_remote(dir);
        if let Some(id) = state.find(name, &dir).map(|n| n.id) {
            state.nodes.remove(&id);
        }
        state.insert(Node {
            id: 0,
            display_name: name.to_string(),
            file_name: name.to_string(),
            directory: dir,
            modified_at: truncate_to_seconds(modified_at),
            content: content.to_vec(),
        })
    }

    /// Seed a folder without recording a call. Returns its id.
    pub fn put_folder(&self, parent: &str, name: &str, modified_at: DateTime<Utc>) -> u64 {
        let mut state = self.state();
        state.insert(Node {
            id: 0,
            display_name: folder_key(parent, name),
            file_name: name.to_string(),
            directory: normalize_remote(parent),
            modified_at: truncate_to_seconds(modified_at),
            content: Vec::new(),
        })
    }

    /// Make every following call fail as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make calls to `method` (wire name) fail as unreachable.
    pub fn fail_method(&self, method: &'static str) {
        self.state().failing.insert(method);
    }

    /// Make mutation calls to `method` (wire name) answer `false`.
    pub fn reject_method(&self, method: &'static str) {
        self.state().rejecting.insert(method);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn mutations(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let (dir, name) = split_path(path);
        self.state().find(name, &dir).map(|n| n.content.clone())
    }

    pub fn file_modified(&self, path: &str) -> Option<DateTime<Utc>> {
        let (dir, name) = split_path(path);
        self.state().find(name, &dir).map(|n| n.modified_at)
    }

    pub fn has_folder(&self, key: &str) -> bool {
        self.state().folder_exists(&normalize_remote(key))
    }

    /// Make `get_properties` report `directory` and `display_name` for `id`
    /// while listings keep showing the stored location.
    pub fn resolve_to(&self, id: u64, directory: &str, display_name: &str) {
        self.state()
            .resolved
            .insert(id, (normalize_remote(directory), display_name.to_string()));
    }

    pub fn hash_of(&self, path: &str) -> Option<String> {
        let (dir, name) = split_path(path);
        self.state().find(name, &dir).map(Node::hash)
    }

    /// Record the call and apply offline/failure injection.
    fn enter(&self, call: RemoteCall) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state();
        let method = call.method();
        state.calls.push(call);
        if state.offline || state.failing.contains(method) {
            return Err(SyncError::unreachable(
                method,
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "remote offline"),
            ));
        }
        Ok(state)
    }
}

/// `/docs/a.txt` -> (`/docs/`, `a.txt`)
fn split_path(path: &str) -> (String, &str) {
    match path.rfind('/') {
        Some(idx) => (normalize_remote(&path[..=idx]), &path[idx + 1..]),
        None => ("/".to_string(), path),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteHead>> {
        let state = self.enter(RemoteCall::ListDirectory(dir.to_string()))?;
        let dir = normalize_remote(dir);
        Ok(state
            .nodes
            .values()
            .filter(|n| n.directory == dir)
            .map(|n| RemoteHead {
                id: n.id,
                display_name: n.display_name.clone(),
                file_name: n.file_name.clone(),
                modified_at: n.modified_at,
            })
            .collect())
    }

    async fn get_properties(&self, id: u64) -> Result<RemoteProperties> {
        let state = self.enter(RemoteCall::GetProperties(id))?;
        let node = state
            .nodes
            .get(&id)
            .ok_or_else(|| SyncError::malformed("getPropertiesAsXML", format!("unknown id {id}")))?;
        let (directory, display_name) = state
            .resolved
            .get(&id)
            .cloned()
            .unwrap_or_else(|| (node.directory.clone(), node.display_name.clone()));
        Ok(RemoteProperties {
            id,
            file_name: node.file_name.clone(),
            display_name,
            modified_at: node.modified_at,
            hash: node.hash(),
            size_in_bytes: node.content.len() as u64,
            directory,
        })
    }

    async fn get_content(&self, id: u64) -> Result<Vec<u8>> {
        let state = self.enter(RemoteCall::GetContent(id))?;
        state
            .nodes
            .get(&id)
            .map(|n| n.content.clone())
            .ok_or_else(|| SyncError::malformed("getContent", format!("unknown id {id}")))
    }

    async fn exists(&self, name: &str, dir: &str) -> Result<bool> {
        let state = self.enter(RemoteCall::Exists {
            name: name.to_string(),
            dir: dir.to_string(),
        })?;
        Ok(state.find(name, &normalize_remote(dir)).is_some())
    }

    async fn compute_hash(&self, name: &str, dir: &str) -> Result<String> {
        let state = self.enter(RemoteCall::ComputeHash {
            name: name.to_string(),
            dir: dir.to_string(),
        })?;
        Ok(state
            .find(name, &normalize_remote(dir))
            .map(Node::hash)
            .unwrap_or_default())
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        dir: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read(local_path).with_path("reading", local_path)?;

        let mut state = self.enter(RemoteCall::Upload {
            name: name.clone(),
            dir: dir.to_string(),
        })?;
        let dir = normalize_remote(dir);
        if state.rejecting.contains("uploadFile") || !state.folder_exists(&dir) {
            return Ok(false);
        }
        if let Some(id) = state.find(&name, &dir).map(|n| n.id) {
            state.nodes.remove(&id);
        }
        state.insert(Node {
            id: 0,
            file_name: name.clone(),
            display_name: name,
            directory: dir,
            modified_at: truncate_to_seconds(timestamp),
            content,
        });
        Ok(true)
    }

    async fn create_directory(&self, name: &str, parent: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::CreateDirectory {
            name: name.to_string(),
            parent: parent.to_string(),
        })?;
        let key = folder_key(parent, name);
        let parent = normalize_remote(parent);
        if state.rejecting.contains("createDir")
            || !state.folder_exists(&parent)
            || state.folder_exists(&key)
        {
            return Ok(false);
        }
        state.insert(Node {
            id: 0,
            display_name: key,
            file_name: name.to_string(),
            directory: parent,
            modified_at: truncate_to_seconds(Utc::now()),
            content: Vec::new(),
        });
        Ok(true)
    }

    async fn rename_file(&self, hash: &str, new_name: &str, dir: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::RenameFile {
            hash: hash.to_string(),
            new_name: new_name.to_string(),
            dir: dir.to_string(),
        })?;
        if state.rejecting.contains("renameFile") {
            return Ok(false);
        }
        match state.find_by_hash(hash) {
            Some(id) => {
                if let Some(node) = state.nodes.get_mut(&id) {
                    node.display_name = new_name.to_string();
                    node.file_name = new_name.to_string();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rename_folder(
        &self,
        source: &str,
        new_name: &str,
        old_root: &str,
        _dir: &str,
    ) -> Result<bool> {
        let mut state = self.enter(RemoteCall::RenameFolder {
            source: source.to_string(),
            new_name: new_name.to_string(),
            old_root: old_root.to_string(),
        })?;
        let source = normalize_remote(source);
        let target = folder_key(old_root, new_name);
        if state.rejecting.contains("renameFolder")
            || source == "/"
            || !state.folder_exists(&source)
            || state.folder_exists(&target)
        {
            return Ok(false);
        }
        state.relocate_below(&source, &target);
        for node in state.nodes.values_mut() {
            if node.display_name == source {
                node.display_name = target.clone();
                node.file_name = new_name.to_string();
            }
        }
        Ok(true)
    }

    async fn move_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::MoveFile {
            hash: hash.to_string(),
            dir: target_dir.to_string(),
        })?;
        let target = normalize_remote(target_dir);
        if state.rejecting.contains("move") {
            return Ok(false);
        }
        let Some(id) = state.file_target(hash, &target) else {
            return Ok(false);
        };
        if let Some(node) = state.nodes.get_mut(&id) {
            node.directory = target;
        }
        Ok(true)
    }

    async fn move_folder(&self, source: &str, target: &str, _old_root: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::MoveFolder {
            source: source.to_string(),
            target: target.to_string(),
        })?;
        let source = normalize_remote(source);
        let target = normalize_remote(target);
        if state.rejecting.contains("move") {
            return Ok(false);
        }
        let Some(key) = state.folder_target(&source, &target) else {
            return Ok(false);
        };
        state.relocate_below(&source, &key);
        for node in state.nodes.values_mut() {
            if node.display_name == source {
                node.display_name = key.clone();
                node.directory = target.clone();
            }
        }
        Ok(true)
    }

    async fn copy_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::CopyFile {
            hash: hash.to_string(),
            dir: target_dir.to_string(),
        })?;
        let target = normalize_remote(target_dir);
        if state.rejecting.contains("copy") {
            return Ok(false);
        }
        let Some(mut copy) = state
            .file_target(hash, &target)
            .and_then(|id| state.nodes.get(&id).cloned())
        else {
            return Ok(false);
        };
        copy.directory = target;
        state.insert(copy);
        Ok(true)
    }

    async fn copy_folder(&self, source: &str, target: &str, _old_root: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::CopyFolder {
            source: source.to_string(),
            target: target.to_string(),
        })?;
        let source = normalize_remote(source);
        let target = normalize_remote(target);
        if state.rejecting.contains("copy") {
            return Ok(false);
        }
        let Some(key) = state.folder_target(&source, &target) else {
            return Ok(false);
        };
        for copy in state.copies_of(&source, &key, &target) {
            state.insert(copy);
        }
        Ok(true)
    }

    async fn delete_file(&self, hash: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::DeleteFile(hash.to_string()))?;
        if state.rejecting.contains("deleteFile") {
            return Ok(false);
        }
        match state.find_by_hash(hash) {
            Some(id) => Ok(state.nodes.remove(&id).is_some()),
            None => Ok(false),
        }
    }

    async fn delete_folder(&self, path: &str) -> Result<bool> {
        let mut state = self.enter(RemoteCall::DeleteFolder(path.to_string()))?;
        let path = normalize_remote(path);
        if state.rejecting.contains("deleteFolder") || path == "/" || !state.folder_exists(&path) {
            return Ok(false);
        }
        state
            .nodes
            .retain(|_, n| n.display_name != path && !n.directory.starts_with(&path));
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_listing_is_per_level() {
        let remote = MemoryRemote::new();
        remote.put_file("/", "a.txt", b"a", t(1));
        remote.put_folder("/", "docs", t(1));
        remote.put_file("/docs/", "b.txt", b"b", t(1));

        let root = remote.list_directory("/").await.unwrap();
        let names: Vec<_> = root.iter().map(|h| h.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "/docs/"]);

        let docs = remote.list_directory("/docs/").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].display_name, "b.txt");
        assert_eq!(
            remote.calls(),
            vec![
                RemoteCall::ListDirectory("/".into()),
                RemoteCall::ListDirectory("/docs/".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_folder_moves_descendants() {
        let remote = MemoryRemote::new();
        remote.put_folder("/", "old", t(1));
        remote.put_folder("/old/", "sub", t(1));
        remote.put_file("/old/sub/", "x.txt", b"x", t(1));

        assert!(remote.rename_folder("/old/", "new", "/", "/").await.unwrap());
        assert!(remote.has_folder("/new/"));
        assert!(remote.has_folder("/new/sub/"));
        assert!(!remote.has_folder("/old/"));
        assert_eq!(remote.file_content("/new/sub/x.txt"), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_move_file_and_folder() {
        let remote = MemoryRemote::new();
        remote.put_folder("/", "inbox", t(1));
        remote.put_folder("/", "archive", t(1));
        remote.put_folder("/inbox/", "2024", t(1));
        remote.put_file("/inbox/", "mail.eml", b"m", t(1));
        remote.put_file("/inbox/2024/", "old.eml", b"o", t(1));
        let hash = remote.hash_of("/inbox/mail.eml").unwrap();

        assert!(remote.move_file(&hash, "/archive/").await.unwrap());
        assert!(remote.file_content("/inbox/mail.eml").is_none());
        assert_eq!(remote.file_content("/archive/mail.eml"), Some(b"m".to_vec()));

        assert!(remote.move_folder("/inbox/2024/", "/archive/", "/inbox/").await.unwrap());
        assert!(!remote.has_folder("/inbox/2024/"));
        assert!(remote.has_folder("/archive/2024/"));
        assert_eq!(remote.file_content("/archive/2024/old.eml"), Some(b"o".to_vec()));

        // Into itself, or onto an existing name, is refused.
        assert!(!remote.move_folder("/archive/", "/archive/2024/", "/").await.unwrap());
        assert!(!remote.move_file(&hash, "/archive/").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let remote = MemoryRemote::new();
        remote.put_folder("/", "docs", t(1));
        remote.put_folder("/", "backup", t(1));
        remote.put_file("/docs/", "a.txt", b"a", t(1));
        let hash = remote.hash_of("/docs/a.txt").unwrap();

        assert!(remote.copy_file(&hash, "/").await.unwrap());
        assert!(remote.copy_folder("/docs/", "/backup/", "/").await.unwrap());

        assert_eq!(remote.file_content("/docs/a.txt"), Some(b"a".to_vec()));
        assert_eq!(remote.file_content("/a.txt"), Some(b"a".to_vec()));
        assert_eq!(remote.file_content("/backup/docs/a.txt"), Some(b"a".to_vec()));
        assert_eq!(
            remote.mutations(),
            vec![
                RemoteCall::CopyFile {
                    hash,
                    dir: "/".into()
                },
                RemoteCall::CopyFolder {
                    source: "/docs/".into(),
                    target: "/backup/".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_by_hash() {
        let remote = MemoryRemote::new();
        remote.put_file("/", "a.txt", b"payload", t(1));
        let hash = remote.compute_hash("a.txt", "/").await.unwrap();

        assert_eq!(Some(hash.clone()), remote.hash_of("/a.txt"));
        assert!(remote.delete_file(&hash).await.unwrap());
        assert!(remote.file_content("/a.txt").is_none());
        assert!(!remote.delete_file(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let err = remote.list_directory("/").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnreachable { method: "getFileHeadsAsXML", .. }));
    }

    #[tokio::test]
    async fn test_create_directory_requires_parent() {
        let remote = MemoryRemote::new();
        assert!(!remote.create_directory("img", "/docs/").await.unwrap());
        assert!(remote.create_directory("docs", "/").await.unwrap());
        assert!(remote.create_directory("img", "/docs/").await.unwrap());
        assert!(remote.has_folder("/docs/img/"));
    }
}
