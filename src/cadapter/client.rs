//! High-level object client wrapping backend put/get/delete.

use async_trait::async_trait;

pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait ObjectBackend: Clone + Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError>;

    /// `None` when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    async fn delete_object(&self, key: &str) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct ObjectClient<B: ObjectBackend> {
    backend: B,
}

impl<B: ObjectBackend> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
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
}
