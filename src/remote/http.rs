//! HTTP transport for the remote API.
//!
//! Every call is a form POST to a single endpoint with a `method` field and
//! the session key; uploads are multipart.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::{IoContext, Result, SyncError};
use crate::remote::xml::{format_timestamp, parse_bool, parse_heads, parse_properties, parse_scalar};
use crate::remote::{RemoteHead, RemoteProperties, RemoteStore};

/// Remote store reached over HTTP.
pub struct HttpRemote {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn new(api_url: &str, user_agent: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::unreachable("connect", e))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// Build the transport and obtain a session key. A key present in the
    /// config is used as is; otherwise the user name and password are
    /// exchanged for one. Without either the remote stays unauthenticated.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut remote = Self::new(&config.api_url, &config.user_agent, config.api_key.clone())?;
        if remote.api_key.is_none() {
            if let (Some(user), Some(password)) = (&config.user_name, &config.password) {
                remote.api_key = remote.request_api_key(user, password).await?;
            }
        }
        Ok(remote)
    }

    async fn request_api_key(&self, user: &str, password: &str) -> Result<Option<String>> {
        let body = self
            .submit("getApiKey", &[("userName", user), ("password", password)])
            .await?;
        let key = parse_scalar("getApiKey", &body)?;
        Ok((!key.is_empty()).then_some(key))
    }

    /// Version string reported by the server.
    pub async fn version(&self) -> Result<String> {
        let body = self.submit("getVersion", &[]).await?;
        parse_scalar("getVersion", &body)
    }

    fn key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or(SyncError::AuthenticationMissing)
    }

    async fn submit(&self, method: &'static str, fields: &[(&str, &str)]) -> Result<String> {
        let mut form: Vec<(&str, &str)> = vec![("method", method)];
        form.extend_from_slice(fields);
        debug!(method, "remote call");

        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::unreachable(method, e))?;
        response
            .text()
            .await
            .map_err(|e| SyncError::unreachable(method, e))
    }

    /// Submit with the session key attached.
    async fn call(&self, method: &'static str, fields: &[(&str, &str)]) -> Result<String> {
        let key = self.key()?;
        let mut with_key: Vec<(&str, &str)> = vec![("key", key)];
        with_key.extend_from_slice(fields);
        self.submit(method, &with_key).await
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn list_directory(&self, dir: &str) -> Result<Vec<RemoteHead>> {
        let body = self.call("getFileHeadsAsXML", &[("dir", dir)]).await?;
        parse_heads(&body)
    }

    async fn get_properties(&self, id: u64) -> Result<RemoteProperties> {
        let id = id.to_string();
        let body = self.call("getPropertiesAsXML", &[("id", &id)]).await?;
        parse_properties(&body)
    }

    async fn get_content(&self, id: u64) -> Result<Vec<u8>> {
        let key = self.key()?;
        let id = id.to_string();
        debug!(method = "getContent", "remote call");
        let response = self
            .client
            .post(&self.api_url)
            .form(&[("id", id.as_str()), ("key", key), ("method", "getContent")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::unreachable("getContent", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::unreachable("getContent", e))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, name: &str, dir: &str) -> Result<bool> {
        let body = self.call("exists", &[("entry", name), ("dir", dir)]).await?;
        parse_bool("exists", &body)
    }

    async fn compute_hash(&self, name: &str, dir: &str) -> Result<String> {
        let body = self.call("getHash", &[("file", name), ("dir", dir)]).await?;
        parse_scalar("getHash", &body)
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        dir: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        const METHOD: &str = "uploadFile";

        let key = self.key()?.to_string();
        let data = tokio::fs::read(local_path)
            .await
            .with_path("reading", local_path)?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let form = Form::new()
            .text("key", key)
            .text("method", METHOD)
            .text("currentdir", dir.to_string())
            .text("timestamp", format_timestamp(timestamp))
            .part("userfile[]", Part::bytes(data).file_name(file_name));

        debug!(method = METHOD, path = %local_path.display(), "remote call");
        let body = self
            .client
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::unreachable(METHOD, e))?
            .text()
            .await
            .map_err(|e| SyncError::unreachable(METHOD, e))?;
        parse_bool(METHOD, &body)
    }

    async fn create_directory(&self, name: &str, parent: &str) -> Result<bool> {
        let body = self.call("createDir", &[("entry", name), ("dir", parent)]).await?;
        parse_bool("createDir", &body)
    }

    async fn rename_file(&self, hash: &str, new_name: &str, dir: &str) -> Result<bool> {
        let body = self
            .call(
                "renameFile",
                &[("file", hash), ("newname", new_name), ("currentdir", dir)],
            )
            .await?;
        parse_bool("renameFile", &body)
    }

    async fn rename_folder(
        &self,
        source: &str,
        new_name: &str,
        old_root: &str,
        dir: &str,
    ) -> Result<bool> {
        let body = self
            .call(
                "renameFolder",
                &[
                    ("newname", new_name),
                    ("source", source),
                    ("old_root", old_root),
                    ("currentdir", dir),
                ],
            )
            .await?;
        parse_bool("renameFolder", &body)
    }

    async fn move_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let body = self.call("move", &[("file", hash), ("dir", target_dir)]).await?;
        parse_bool("move", &body)
    }

    async fn move_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        let body = self
            .call(
                "move",
                &[("source", source), ("target", target), ("old_root", old_root)],
            )
            .await?;
        parse_bool("move", &body)
    }

    async fn copy_file(&self, hash: &str, target_dir: &str) -> Result<bool> {
        let body = self.call("copy", &[("file", hash), ("dir", target_dir)]).await?;
        parse_bool("copy", &body)
    }

    async fn copy_folder(&self, source: &str, target: &str, old_root: &str) -> Result<bool> {
        let body = self
            .call(
                "copy",
                &[("source", source), ("target", target), ("old_root", old_root)],
            )
            .await?;
        parse_bool("copy", &body)
    }

    async fn delete_file(&self, hash: &str) -> Result<bool> {
        let body = self.call("deleteFile", &[("s", "true"), ("file", hash)]).await?;
        parse_bool("deleteFile", &body)
    }

    async fn delete_folder(&self, path: &str) -> Result<bool> {
        let body = self.call("deleteFolder", &[("s", "true"), ("dir", path)]).await?;
        parse_bool("deleteFolder", &body)
    }

    fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_without_key_is_unauthenticated() {
        let remote = HttpRemote::new("http://localhost/api.php", "redsync-test", None).unwrap();
        assert!(!remote.is_authenticated());
        assert!(matches!(remote.key(), Err(SyncError::AuthenticationMissing)));
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let remote =
            HttpRemote::new("http://localhost/api.php", "redsync-test", Some(String::new())).unwrap();
        assert!(!remote.is_authenticated());
    }

    #[tokio::test]
    async fn test_calls_fail_fast_without_key() {
        let remote = HttpRemote::new("http://localhost/api.php", "redsync-test", None).unwrap();
        let err = remote.list_directory("/").await.unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationMissing));
    }
}
