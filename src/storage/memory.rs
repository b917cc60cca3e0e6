use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{StorageError, Store};
use crate::document::Document;

/// In-memory reference backend: one concurrent map per kind.
pub struct MemoryStore {
    kinds: DashMap<String, DashMap<String, Document>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kinds: DashMap::new(),
        }
    }

    /// Total document count across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.iter().map(|k| k.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.kinds.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, kind: &str, id: &str) -> Result<Option<Document>, StorageError> {
        Ok(self
            .kinds
            .get(kind)
            .and_then(|m| m.get(id).map(|d| d.value().clone())))
    }

    async fn write(&self, kind: &str, doc: &Document) -> Result<(), StorageError> {
        self.kinds
            .entry(kind.to_string())
            .or_default()
            .insert(doc.meta.id.clone(), doc.clone());
        Ok(())
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), StorageError> {
        if let Some(m) = self.kinds.get(kind) {
            m.remove(id);
        }
        Ok(())
    }

    async fn list(&self, kind: &str) -> Result<Vec<Document>, StorageError> {
        Ok(self
            .kinds
            .get(kind)
            .map(|m| m.iter().map(|d| d.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn exists(&self, kind: &str, id: &str) -> Result<bool, StorageError> {
        Ok(self.kinds.get(kind).is_some_and(|m| m.contains_key(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn test_doc(id: &str) -> Document {
        let fields = match json!({"test": "data", "id_copy": id}) {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Document::new(id, fields)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = MemoryStore::new();
        store.write("widget", &test_doc("item-1")).await.unwrap();

        let result = store.read("widget", "item-1").await.unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().meta.id, "item-1");
    }

    #[tokio::test]
    async fn test_read_nonexistent_returns_none() {
        let store = MemoryStore::new();
        assert!(store.read("widget", "nope").await.unwrap().is_none());
        assert!(store.read("nokind", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kinds_are_disjoint() {
        let store = MemoryStore::new();
        store.write("widget", &test_doc("shared")).await.unwrap();

        assert!(store.read("widget", "shared").await.unwrap().is_some());
        assert!(store.read("gadget", "shared").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.write("widget", &test_doc("to-delete")).await.unwrap();
        assert_eq!(store.len(), 1);

        store.delete("widget", "to-delete").await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.read("widget", "to-delete").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete("widget", "nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let store = MemoryStore::new();
        let mut doc = test_doc("same-id");
        store.write("widget", &doc).await.unwrap();

        doc.meta.generation = 5;
        store.write("widget", &doc).await.unwrap();

        assert_eq!(store.len(), 1);
        let back = store.read("widget", "same-id").await.unwrap().unwrap();
        assert_eq!(back.meta.generation, 5);
    }

    #[tokio::test]
    async fn test_list() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .write("widget", &test_doc(&format!("item-{i}")))
                .await
                .unwrap();
        }

        let listed = store.list("widget").await.unwrap();
        assert_eq!(listed.len(), 5);
        assert!(store.list("gadget").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exists() {
        let store = MemoryStore::new();
        store.write("widget", &test_doc("here")).await.unwrap();
        assert!(store.exists("widget", "here").await.unwrap());
        assert!(!store.exists("widget", "gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let doc = test_doc(&format!("batch-{batch}-item-{i}"));
                    store.write("widget", &doc).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
