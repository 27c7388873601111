//! Single-writer access to a remote store.
//!
//! The reconciliation pass and live sync run concurrently and share one
//! remote. Mutations from both go through one fair async lock, so the remote
//! sees them strictly one at a time in arrival order. Reads pass through.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::remote::{RemoteHead, RemoteProperties, RemoteStore};

#[derive(Clone)]
pub struct SerializedRemote {
    inner: Arc<dyn RemoteStore>,
    writer: Arc<Mutex<()>>,
}

impl SerializedRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            writer: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl RemoteStore for SerializedRemote {
    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteHead>> {
        self.inner.list_directory(dir).await
    }

    async fn get_properties(&self, id: u64) -> Result<RemoteProperties> {
        self.inner.get_properties(id).await
    }

    async fn get_content(&self, id: u64) -> Result<Vec<u8>> {
        self.inner.get_content(id).await
    }

    async fn exists(&self, name: &str, dir: &str) -> Result<bool> {
        self.inner.exists(name, dir).await
    }

    async fn compute_hash(&self, name: &str, dir: &str) -> Result<String> {
        self.inner.compute_hash(name, dir).await
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        dir: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.upload_file(local_path, dir, timestamp).await
    }

    async fn create_directory(&self, name: &str, parent: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.create_directory(name, parent).await
    }

    async fn rename_file(&self, hash: &str, new_name: &str, dir: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.rename_file(hash, new_name, dir).await
    }

    async fn rename_folder(
        &self,
        source: &str,
        new_name: &str,
        old_root: &str,
        dir: &str,
    ) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.rename_folder(source, new_name, old_root, dir).await
    }

    async fn move_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.move_file(hash, target_dir).await
    }

    async fn move_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.move_folder(source, target, old_root).await
    }

    async fn copy_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.copy_file(hash, target_dir).await
    }

    async fn copy_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.copy_folder(source, target, old_root).await
    }

    async fn delete_file(&self, hash: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.delete_file(hash).await
    }

    async fn delete_folder(&self, path: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        self.inner.delete_folder(path).await
    }

    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }
}
