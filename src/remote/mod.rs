//! The remote store boundary.
//!
//! Everything the synchronization core needs from the server is expressed
//! by [`RemoteStore`]. The HTTP transport, the in-memory store used by the
//! tests and the single-writer wrapper all implement it.

pub mod http;
pub mod memory;
pub mod serial;
pub mod tally;
pub mod xml;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall};
pub use serial::SerializedRemote;
pub use tally::CallTally;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub id: u64,
    pub display_name: String,
    pub file_name: String,
    pub modified_at: DateTime<Utc>,
}

/// Full metadata of a single remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProperties {
    pub id: u64,
    pub file_name: String,
    pub display_name: String,
    pub modified_at: DateTime<Utc>,
    pub hash: String,
    pub size_in_bytes: u64,
    pub directory: String,
}

/// Remote procedure boundary used by both the reconciliation pass and live
/// sync. Directories are remote paths (`/`, `/docs/`).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // ========== Reads ==========

    /// List the entries directly inside `dir`. One call per level.
    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteHead>>;

    async fn get_properties(&self, id: u64) -> Result<RemoteProperties>;

    async fn get_content(&self, id: u64) -> Result<Vec<u8>>;

    async fn exists(&self, name: &str, dir: &str) -> Result<bool>;

    /// Content hash of the file `name` in `dir`; files are addressed by it
    /// in rename and delete calls.
    async fn compute_hash(&self, name: &str, dir: &str) -> Result<String>;

    // ========== Mutations ==========

    async fn upload_file(
        &self,
        local_path: &Path,
        dir: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool>;

    async fn create_directory(&self, name: &str, parent: &str) -> Result<bool>;

    async fn rename_file(&self, hash: &str, new_name: &str, dir: &str) -> Result<bool>;

    async fn rename_folder(
        &self,
        source: &str,
        new_name: &str,
        old_root: &str,
        dir: &str,
    ) -> Result<bool>;

    /// Move the file with content hash `hash` into `target_dir`, keeping
    /// its name.
    async fn move_file(&self, hash: &str, target_dir: &str) -> Result<bool>;

    /// Move the folder `source` (full path, trailing `/`) from `old_root`
    /// into `target`, keeping its name and contents.
    async fn move_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool>;

    async fn copy_file(&self, hash: &str, target_dir: &str) -> Result<bool>;

    async fn copy_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool>;

    async fn delete_file(&self, hash: &str) -> Result<bool>;

    async fn delete_folder(&self, path: &str) -> Result<bool>;

    // ========== Session ==========

    /// Whether calls will carry a valid session key.
    fn is_authenticated(&self) -> bool {
        true
    }
}
