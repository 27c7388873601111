//! Counts the remote calls one reconciliation pass makes.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::remote::{RemoteHead, RemoteProperties, RemoteStore};

/// Forwards to another store and counts every call, successful or not.
pub struct CallTally<'a> {
    inner: &'a dyn RemoteStore,
    calls: AtomicUsize,
}

impl<'a> CallTally<'a> {
    pub fn new(inner: &'a dyn RemoteStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl<'a> RemoteStore for CallTally<'a> {
    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteHead>> {
        self.tick();
        self.inner.list_directory(dir).await
    }

    async fn get_properties(&self, id: u64) -> Result<RemoteProperties> {
        self.tick();
        self.inner.get_properties(id).await
    }

    async fn get_content(&self, id: u64) -> Result<Vec<u8>> {
        self.tick();
        self.inner.get_content(id).await
    }

    async fn exists(&self, name: &str, dir: &str) -> Result<bool> {
        self.tick();
        self.inner.exists(name, dir).await
    }

    async fn compute_hash(&self, name: &str, dir: &str) -> Result<String> {
        self.tick();
        self.inner.compute_hash(name, dir).await
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        dir: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        self.tick();
        self.inner.upload_file(local_path, dir, timestamp).await
    }

    async fn create_directory(&self, name: &str, parent: &str) -> Result<bool> {
        self.tick();
        self.inner.create_directory(name, parent).await
    }

    async fn rename_file(&self, hash: &str, new_name: &str, dir: &str) -> Result<bool> {
        self.tick();
        self.inner.rename_file(hash, new_name, dir).await
    }

    async fn rename_folder(
        &self,
        source: &str,
        new_name: &str,
        old_root: &str,
        dir: &str,
    ) -> Result<bool> {
        self.tick();
        self.inner.rename_folder(source, new_name, old_root, dir).await
    }

    async fn move_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        self.tick();
        self.inner.move_file(hash, target_dir).await
    }

    async fn move_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        self.tick();
        self.inner.move_folder(source, target, old_root).await
    }

    async fn copy_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        self.tick();
        self.inner.copy_file(hash, target_dir).await
    }

    async fn copy_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        self.tick();
        self.inner.copy_folder(source, target, old_root).await
    }

    async fn delete_file(&self, hash: &str) -> Result<bool> {
        self.tick();
        self.inner.delete_file(hash).await
    }

    async fn delete_folder(&self, path: &str) -> Result<bool> {
        self.tick();
        self.inner.delete_folder(path).await
    }

    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }
}
