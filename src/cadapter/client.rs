//! High-level client API for the object store
//!
//! `ObjectBackend` is the raw key/bytes contract every endpoint implements.
//! `ObjectClient` is the thin wrapper the store layer talks to, so the
//! backend can be swapped without touching staging or timeout logic.

use async_trait::async_trait;

pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Whole-object storage endpoint.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Returns `Ok(None)` when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), BackendError>;

    /// Keys starting with `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, BackendError>;
}

pub struct ObjectClient<B: ObjectBackend> {
    backend: B,
}

impl<B: ObjectBackend> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        self.backend.put_object(key, data).await
    }

    pub async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.backend.get_object(key).await
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        self.backend.delete_object(key).await
    }

    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.backend.list_objects(prefix).await
    }
}
