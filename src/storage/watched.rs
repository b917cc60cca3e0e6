// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-capturing wrapper around a [`Store`].
//!
//! Every successful `write` or `delete` publishes the post-commit state to
//! the notification bus, so subscribers never observe a change that was not
//! durably applied. Reads and lists pass straight through.

use std::sync::Arc;

use crate::bus::{Bus, Change, Subscription};
use crate::document::Document;
use crate::storage::traits::{StorageError, Store};

pub struct WatchedStore {
    inner: Arc<dyn Store>,
    bus: Bus,
}

impl WatchedStore {
    pub fn new(inner: Arc<dyn Store>, bus: Bus) -> Self {
        Self { inner, bus }
    }

    pub async fn read(&self, kind: &str, id: &str) -> Result<Option<Document>, StorageError> {
        self.inner.read(kind, id).await
    }

    pub async fn list(&self, kind: &str) -> Result<Vec<Document>, StorageError> {
        self.inner.list(kind).await
    }

    pub async fn write(&self, kind: &str, doc: &Document) -> Result<(), StorageError> {
        self.inner.write(kind, doc).await?;
        self.bus
            .publish(kind, &doc.meta.id, &Change::Put(doc.clone()));
        Ok(())
    }

    pub async fn delete(&self, kind: &str, id: &str) -> Result<(), StorageError> {
        self.inner.delete(kind, id).await?;
        self.bus
            .publish(kind, id, &Change::Delete { id: id.to_string() });
        Ok(())
    }

    pub fn subscribe_key(&self, kind: &str, id: &str) -> Subscription {
        self.bus.subscribe_key(kind, id)
    }

    pub fn subscribe_kind(&self, kind: &str) -> Subscription {
        self.bus.subscribe_kind(kind)
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use serde_json::Map;

    fn watched() -> WatchedStore {
        WatchedStore::new(Arc::new(MemoryStore::new()), Bus::new(16))
    }

    #[tokio::test]
    async fn test_write_publishes_post_commit_state() {
        let store = watched();
        let mut sub = store.subscribe_key("widget", "a");

        let mut doc = Document::new("a", Map::new());
        doc.meta.generation = 3;
        store.write("widget", &doc).await.unwrap();

        // The published document matches what a reader now sees
        match sub.recv().await {
            Some(Change::Put(published)) => {
                let read_back = store.read("widget", "a").await.unwrap().unwrap();
                assert_eq!(published, read_back);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_publishes() {
        let store = watched();
        store
            .write("widget", &Document::new("a", Map::new()))
            .await
            .unwrap();

        let mut sub = store.subscribe_kind("widget");
        store.delete("widget", "a").await.unwrap();

        match sub.recv().await {
            Some(Change::Delete { id }) => assert_eq!(id, "a"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reads_do_not_publish() {
        let store = watched();
        store
            .write("widget", &Document::new("a", Map::new()))
            .await
            .unwrap();

        let mut sub = store.subscribe_kind("widget");
        let _ = store.read("widget", "a").await.unwrap();
        let _ = store.list("widget").await.unwrap();

        store.delete("widget", "a").await.unwrap();
        // First observed change is the delete, not any read
        match sub.recv().await {
            Some(Change::Delete { id }) => assert_eq!(id, "a"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
