// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine coordinator.
//!
//! The [`Engine`] ties the registry, the watched store, and the
//! configuration together and exposes the full operation surface:
//! `create`, `get`, `list`, `replace`, `merge`, `delete`, plus typed
//! wrappers over registered resource types. The HTTP layer is a thin
//! mapping onto these operations; everything here is callable directly.
//!
//! # Concurrency
//!
//! Each registered type carries a reader/writer lock. Mutations hold the
//! writer side for their whole read-modify-write cycle, which is what makes
//! generation accounting exact without a transactional backend. Reads and
//! stream setup take the reader side. Bus publication happens inside the
//! writer section, so subscribers observe mutations in commit order.

mod list;
mod mutate;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::bus::Bus;
use crate::config::ServerConfig;
use crate::document::Document;
use crate::error::Error;
use crate::listopts::ListOpts;
use crate::registry::{Hooks, OpContext, Registry, Resource, ResourceType};
use crate::storage::{MemoryStore, Store, WatchedStore};

pub use list::list_etag;

pub struct Engine {
    config: ServerConfig,
    registry: Registry,
    store: WatchedStore,
}

impl Engine {
    /// Create an engine over an arbitrary storage backend.
    pub fn new(config: ServerConfig, backend: Arc<dyn Store>) -> Self {
        let bus = Bus::new(config.subscriber_buffer);
        Self {
            config,
            registry: Registry::new(),
            store: WatchedStore::new(backend, bus),
        }
    }

    /// Create an engine over the in-memory reference backend.
    #[must_use]
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Register `T` under its default name with no hooks.
    pub fn register<T: Resource>(&mut self) -> Result<(), Error> {
        self.registry.register::<T>()
    }

    /// Register `T` with authorization hooks.
    pub fn register_with<T: Resource>(&mut self, hooks: Hooks) -> Result<(), Error> {
        self.registry.register_with::<T>(hooks)
    }

    /// Register `T` under an explicit URL name.
    pub fn register_named_with<T: Resource>(
        &mut self,
        name: &str,
        hooks: Hooks,
    ) -> Result<(), Error> {
        self.registry.register_named_with::<T>(name, hooks)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &WatchedStore {
        &self.store
    }

    /// Read one object, running the read check (which may redact).
    #[tracing::instrument(skip(self, ctx))]
    pub async fn get(
        &self,
        ctx: &OpContext,
        kind: &str,
        id: &str,
    ) -> Result<Option<Document>, Error> {
        let rt = self.registry.get(kind)?;
        let _guard = rt.lock.read().await;
        self.get_unlocked(&rt, ctx, id).await
    }

    pub(crate) async fn get_unlocked(
        &self,
        rt: &ResourceType,
        ctx: &OpContext,
        id: &str,
    ) -> Result<Option<Document>, Error> {
        match self.store.read(rt.name(), id).await? {
            None => {
                debug!(kind = rt.name(), id, "read miss");
                Ok(None)
            }
            Some(doc) => rt.check_read(doc, ctx).map(Some),
        }
    }

    /// List with filter/sort/pagination, applying read checks per item.
    #[tracing::instrument(skip(self, ctx, opts))]
    pub async fn list(
        &self,
        ctx: &OpContext,
        kind: &str,
        opts: &ListOpts,
    ) -> Result<Vec<Document>, Error> {
        let rt = self.registry.get(kind)?;
        let _guard = rt.lock.read().await;
        self.list_unlocked(&rt, ctx, opts).await
    }

    // --- Typed wrappers over registered resource types ---

    pub async fn create_typed<T: Resource>(&self, ctx: &OpContext, obj: &T) -> Result<T, Error> {
        let doc = self
            .create(ctx, &T::type_name(), serde_json::to_value(obj)?)
            .await?;
        typed(doc)
    }

    pub async fn get_typed<T: Resource>(
        &self,
        ctx: &OpContext,
        id: &str,
    ) -> Result<Option<T>, Error> {
        match self.get(ctx, &T::type_name(), id).await? {
            Some(doc) => typed(doc).map(Some),
            None => Ok(None),
        }
    }

    pub async fn list_typed<T: Resource>(
        &self,
        ctx: &OpContext,
        opts: &ListOpts,
    ) -> Result<Vec<T>, Error> {
        self.list(ctx, &T::type_name(), opts)
            .await?
            .into_iter()
            .map(typed)
            .collect()
    }

    /// Full replace (PUT semantics).
    pub async fn replace_typed<T: Resource>(
        &self,
        ctx: &OpContext,
        id: &str,
        obj: &T,
    ) -> Result<T, Error> {
        let doc = self
            .replace(ctx, &T::type_name(), id, serde_json::to_value(obj)?, None)
            .await?;
        typed(doc)
    }

    /// Merge update (PATCH semantics); `delta` carries only the fields to
    /// change.
    pub async fn merge_typed<T: Resource>(
        &self,
        ctx: &OpContext,
        id: &str,
        delta: Value,
    ) -> Result<T, Error> {
        let doc = self.merge(ctx, &T::type_name(), id, delta, None).await?;
        typed(doc)
    }

    pub async fn delete_typed<T: Resource>(&self, ctx: &OpContext, id: &str) -> Result<(), Error> {
        self.delete(ctx, &T::type_name(), id, None).await
    }
}

fn typed<T: Resource>(doc: Document) -> Result<T, Error> {
    serde_json::from_value(doc.to_value())
        .map_err(|e| Error::internal(format!("decode stored object failed: {e}")))
}
