//! Whole-object store consumed by the filesystem layer.
//!
//! `BundleStore` wraps one `ObjectBackend` and materializes objects as files
//! in a local scratch directory: `get` downloads into a fresh scratch file,
//! `upload` pushes a scratch file back under the object's name. Every backend
//! call is bounded by `StoreConfig::timeout`.

use crate::cadapter::client::{BackendError, ObjectBackend, ObjectClient};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0:?} not found")]
    NotFound(String),

    #[error("{op} {key:?} failed: {source}")]
    Backend {
        op: &'static str,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("scratch file {path:?}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} {key:?} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        key: String,
        timeout: Duration,
    },
}

/// Store staging options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where objects are materialized as local files.
    pub scratch_dir: PathBuf,
    /// Upper bound for a single backend call.
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scratch_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bundlefs"),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct ScratchFile {
    path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "failed to remove scratch file"),
        }
    }
}

/// One named object with a local materialized copy.
///
/// Clones share the scratch file; it is removed when the last clone drops.
#[derive(Debug, Clone)]
pub struct StoreObject {
    name: String,
    scratch: Arc<ScratchFile>,
}

impl StoreObject {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.scratch.path
    }

    pub async fn upload<S: ObjectStore + ?Sized>(&self, store: &S) -> Result<(), StoreError> {
        store.upload(self).await
    }
}

/// The narrow contract the filesystem layer needs from a remote store.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn get(&self, name: &str) -> Result<StoreObject, StoreError>;

    async fn new_object_from_content(
        &self,
        content: &[u8],
        name: &str,
    ) -> Result<StoreObject, StoreError>;

    /// Push the object's materialized file to the store under its name.
    async fn upload(&self, object: &StoreObject) -> Result<(), StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Local directory backing materialized objects.
    fn scratch_dir(&self) -> &Path;
}

pub struct BundleStore<B: ObjectBackend> {
    client: ObjectClient<B>,
    config: StoreConfig,
    seq: AtomicU64,
}

impl<B: ObjectBackend> BundleStore<B> {
    pub fn new(client: ObjectClient<B>, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            seq: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &ObjectClient<B> {
        &self.client
    }

    /// `<scratch>/<sha[0..2]>/<sha[2..]>.<pid>.<seq>`: unique per materialization,
    /// so two handles on one name never share a file.
    fn scratch_path_for(&self, name: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let hash_str = hex::encode(hasher.finalize());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut path = self.config.scratch_dir.clone();
        path.push(&hash_str[0..2]);
        path.push(format!("{}.{}.{}", &hash_str[2..], std::process::id(), seq));
        path
    }

    async fn stage(&self, name: &str, content: &[u8]) -> Result<StoreObject, StoreError> {
        let path = self.scratch_path_for(name);
        let scratch_err = |path: &Path, source| StoreError::Scratch {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| scratch_err(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| scratch_err(&path, e))?;
        Ok(StoreObject {
            name: name.to_string(),
            scratch: Arc::new(ScratchFile { path }),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(source)) => Err(StoreError::Backend {
                op,
                key: key.to_string(),
                source,
            }),
            Err(_) => Err(StoreError::Timeout {
                op,
                key: key.to_string(),
                timeout: self.config.timeout,
            }),
        }
    }
}

#[async_trait]
impl<B: ObjectBackend + 'static> ObjectStore for BundleStore<B> {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("list", prefix, self.client.list_objects(prefix))
            .await
    }

    async fn get(&self, name: &str) -> Result<StoreObject, StoreError> {
        let data = self
            .bounded("get", name, self.client.get_object(name))
            .await?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        debug!(name, len = data.len(), "materialized object");
        self.stage(name, &data).await
    }

    async fn new_object_from_content(
        &self,
        content: &[u8],
        name: &str,
    ) -> Result<StoreObject, StoreError> {
        self.stage(name, content).await
    }

    async fn upload(&self, object: &StoreObject) -> Result<(), StoreError> {
        let data = tokio::fs::read(object.path())
            .await
            .map_err(|source| StoreError::Scratch {
                path: object.path().to_path_buf(),
                source,
            })?;
        self.bounded("put", object.name(), self.client.put_object(object.name(), &data))
            .await?;
        debug!(name = object.name(), len = data.len(), "uploaded object");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.bounded("delete", name, self.client.delete_object(name))
            .await
    }

    fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }
}
