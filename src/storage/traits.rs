use async_trait::async_trait;
use thiserror::Error;

use crate::document::Document;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage connection error: {0}")]
    Connection(String),
    #[error("stored object is corrupt for '{id}': {detail}")]
    Corrupt { id: String, detail: String },
}

/// Pluggable persistence for documents of registered types.
///
/// All operations are serializable per `(kind, id)`; the mutation pipeline's
/// per-type lock provides the read-modify-write exclusion, so backends only
/// need individually atomic operations. `write` is a full-object overwrite.
/// List order is unspecified; the list engine sorts.
#[async_trait]
pub trait Store: Send + Sync {
    async fn read(&self, kind: &str, id: &str) -> Result<Option<Document>, StorageError>;
    async fn write(&self, kind: &str, doc: &Document) -> Result<(), StorageError>;
    async fn delete(&self, kind: &str, id: &str) -> Result<(), StorageError>;
    async fn list(&self, kind: &str) -> Result<Vec<Document>, StorageError>;

    /// Check existence without transferring the document.
    /// Default implementation reads and discards.
    async fn exists(&self, kind: &str, id: &str) -> Result<bool, StorageError> {
        Ok(self.read(kind, id).await?.is_some())
    }
}
