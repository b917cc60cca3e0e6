// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The conditional-mutation pipeline.
//!
//! Every mutation of an existing object runs the same cycle under the
//! type's writer lock: load, evaluate If-Match, clone the prior value,
//! parse and strip the request delta, apply (merge or overlay), bump the
//! generation, run the write hooks, recompute the etag, persist (which
//! publishes to the bus), then run the read hook for the caller. There is
//! no retry at any step; each failure maps to one taxonomy kind.

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::Engine;
use crate::document::Document;
use crate::error::Error;
use crate::metadata::{IfMatch, Metadata};
use crate::registry::OpContext;

impl Engine {
    /// Create a new object (POST). The id is server-assigned and the
    /// generation starts at 0.
    #[tracing::instrument(skip(self, ctx, body))]
    pub async fn create(
        &self,
        ctx: &OpContext,
        kind: &str,
        body: Value,
    ) -> Result<Document, Error> {
        let rt = self.registry().get(kind)?;

        let fields = Document::strip_metadata(body)?;
        let fields = rt.validate_fields(&fields)?;

        let mut doc = Document::new(Uuid::new_v4().to_string(), fields);
        rt.check_create(&doc, ctx)?;
        doc.refresh_etag()?;

        self.store().write(rt.name(), &doc).await?;
        crate::metrics::record_operation(rt.name(), "create", "success");
        debug!(kind, id = %doc.meta.id, "created");

        rt.check_read(doc, ctx)
    }

    /// Full replace (PUT): start from the type's zero value, overlay the
    /// request fields, keep the id, bump the generation.
    #[tracing::instrument(skip(self, ctx, body, if_match))]
    pub async fn replace(
        &self,
        ctx: &OpContext,
        kind: &str,
        id: &str,
        body: Value,
        if_match: Option<&IfMatch>,
    ) -> Result<Document, Error> {
        let rt = self.registry().get(kind)?;
        let _guard = rt.lock.write().await;

        let cur = self
            .store()
            .read(rt.name(), id)
            .await?
            .ok_or_else(|| Error::not_found(format!("{id}: not found")))?;

        if let Some(cond) = if_match {
            cond.check(&cur.meta)?;
        }

        let prev = cur.clone();

        let delta = Document::strip_metadata(body)?;
        let mut fields = rt.zero_fields().clone();
        for (k, v) in delta {
            fields.insert(k, v);
        }
        let fields = rt.validate_fields(&fields)?;

        self.commit(&rt, ctx, cur, prev, fields).await
    }

    /// Merge update (PATCH): recursive merge of the delta into the stored
    /// object. Nested objects merge member-by-member; scalars and arrays
    /// replace wholesale; explicit null clears back to the zero value.
    #[tracing::instrument(skip(self, ctx, body, if_match))]
    pub async fn merge(
        &self,
        ctx: &OpContext,
        kind: &str,
        id: &str,
        body: Value,
        if_match: Option<&IfMatch>,
    ) -> Result<Document, Error> {
        let rt = self.registry().get(kind)?;
        let _guard = rt.lock.write().await;

        let cur = self
            .store()
            .read(rt.name(), id)
            .await?
            .ok_or_else(|| Error::not_found(format!("{id}: not found")))?;

        if let Some(cond) = if_match {
            cond.check(&cur.meta)?;
        }

        let prev = cur.clone();

        let delta = Document::strip_metadata(body)?;
        let mut fields = cur.fields.clone();
        merge_fields(&mut fields, delta);
        let fields = rt.validate_fields(&fields)?;

        self.commit(&rt, ctx, cur, prev, fields).await
    }

    /// Delete (DELETE). Evaluates If-Match and the delete hooks before the
    /// storage deletion, which publishes the removal.
    #[tracing::instrument(skip(self, ctx, if_match))]
    pub async fn delete(
        &self,
        ctx: &OpContext,
        kind: &str,
        id: &str,
        if_match: Option<&IfMatch>,
    ) -> Result<(), Error> {
        let rt = self.registry().get(kind)?;
        let _guard = rt.lock.write().await;

        let cur = self
            .store()
            .read(rt.name(), id)
            .await?
            .ok_or_else(|| Error::not_found(format!("{id}: not found")))?;

        if let Some(cond) = if_match {
            cond.check(&cur.meta)?;
        }

        rt.check_delete(&cur, ctx)?;

        self.store().delete(rt.name(), id).await?;
        crate::metrics::record_operation(rt.name(), "delete", "success");
        debug!(kind, id, "deleted");

        Ok(())
    }

    /// Shared tail of replace/merge: new metadata, write hooks, etag,
    /// persist, read redaction.
    async fn commit(
        &self,
        rt: &crate::registry::ResourceType,
        ctx: &OpContext,
        cur: Document,
        prev: Document,
        fields: Map<String, Value>,
    ) -> Result<Document, Error> {
        let mut doc = Document {
            meta: Metadata {
                id: cur.meta.id,
                generation: cur.meta.generation + 1,
                etag: String::new(),
            },
            fields,
        };

        rt.check_update(&doc, &prev, ctx)?;
        doc.refresh_etag()?;

        self.store().write(rt.name(), &doc).await?;
        crate::metrics::record_operation(rt.name(), "update", "success");
        debug!(
            kind = rt.name(),
            id = %doc.meta.id,
            generation = doc.meta.generation,
            "committed"
        );

        rt.check_read(doc, ctx)
    }
}

/// Recursive JSON merge. Delta members overwrite; nested objects merge
/// member-by-member; explicit null removes the member (the validator then
/// restores the type's zero value for it).
pub(crate) fn merge_fields(base: &mut Map<String, Value>, delta: Map<String, Value>) {
    for (key, value) in delta {
        match value {
            Value::Null => {
                base.remove(&key);
            }
            Value::Object(delta_inner) => match base.get_mut(&key) {
                Some(Value::Object(base_inner)) => merge_fields(base_inner, delta_inner),
                _ => {
                    base.insert(key, Value::Object(delta_inner));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::{Hooks, Resource};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct TestType {
        #[serde(flatten)]
        meta: Metadata,
        #[serde(default)]
        text: String,
        #[serde(default)]
        num: i64,
        #[serde(default)]
        nested: Nested,
        #[serde(default)]
        tags: Vec<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Nested {
        #[serde(default)]
        a: i64,
        #[serde(default)]
        b: i64,
    }

    impl Resource for TestType {
        fn metadata(&self) -> &Metadata {
            &self.meta
        }
        fn metadata_mut(&mut self) -> &mut Metadata {
            &mut self.meta
        }
    }

    fn engine() -> Engine {
        let mut engine = Engine::in_memory(ServerConfig::default());
        engine.register::<TestType>().unwrap();
        engine
    }

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_fields_scalar_overwrite() {
        let mut base = map(json!({"a": 1, "b": 2}));
        merge_fields(&mut base, map(json!({"a": 9})));
        assert_eq!(Value::Object(base), json!({"a": 9, "b": 2}));
    }

    #[test]
    fn test_merge_fields_nested_objects() {
        let mut base = map(json!({"nested": {"a": 1, "b": 2}}));
        merge_fields(&mut base, map(json!({"nested": {"a": 9}})));
        assert_eq!(Value::Object(base), json!({"nested": {"a": 9, "b": 2}}));
    }

    #[test]
    fn test_merge_fields_arrays_replace_wholesale() {
        let mut base = map(json!({"tags": ["a", "b"]}));
        merge_fields(&mut base, map(json!({"tags": ["c"]})));
        assert_eq!(Value::Object(base), json!({"tags": ["c"]}));
    }

    #[test]
    fn test_merge_fields_null_clears() {
        let mut base = map(json!({"a": 1, "b": 2}));
        merge_fields(&mut base, map(json!({"a": null})));
        assert_eq!(Value::Object(base), json!({"b": 2}));
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_generation_zero() {
        let engine = engine();
        let doc = engine
            .create(&OpContext::default(), "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        assert!(!doc.meta.id.is_empty());
        assert_eq!(doc.meta.generation, 0);
        assert!(doc.meta.etag.starts_with("etag:"));
        // Absent fields are canonicalized to zero values
        assert_eq!(doc.fields["num"], json!(0));
    }

    #[tokio::test]
    async fn test_create_discards_client_metadata() {
        let engine = engine();
        let doc = engine
            .create(
                &OpContext::default(),
                "testtype",
                json!({"id": "spoofed", "generation": 99, "etag": "etag:x", "text": "foo"}),
            )
            .await
            .unwrap();

        assert_ne!(doc.meta.id, "spoofed");
        assert_eq!(doc.meta.generation, 0);
    }

    #[tokio::test]
    async fn test_mutation_bumps_generation_by_one() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        let merged = engine
            .merge(&ctx, "testtype", &created.meta.id, json!({"num": 1}), None)
            .await
            .unwrap();
        assert_eq!(merged.meta.generation, 1);

        let replaced = engine
            .replace(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"text": "bar"}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(replaced.meta.generation, 2);
    }

    #[tokio::test]
    async fn test_etag_changes_only_with_content() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        let merged = engine
            .merge(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"text": "bar"}),
                None,
            )
            .await
            .unwrap();
        assert_ne!(merged.meta.etag, created.meta.etag);
    }

    #[tokio::test]
    async fn test_replace_not_found() {
        let engine = engine();
        let err = engine
            .replace(
                &OpContext::default(),
                "testtype",
                "missing",
                json!({}),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_if_match_etag_success_and_mismatch() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        // Matching etag succeeds
        let cond = IfMatch::ETag(created.meta.etag.clone());
        engine
            .replace(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"text": "bar"}),
                Some(&cond),
            )
            .await
            .unwrap();

        // Stale etag now fails, and the object is unchanged by the attempt
        let err = engine
            .replace(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"text": "baz"}),
                Some(&cond),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::PRECONDITION_FAILED);
        assert!(err.to_string().contains("etag mismatch"));

        let current = engine
            .get(&ctx, "testtype", &created.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.fields["text"], json!("bar"));
    }

    #[tokio::test]
    async fn test_if_match_generation() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        engine
            .merge(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"num": 1}),
                Some(&IfMatch::Generation(0)),
            )
            .await
            .unwrap();

        let err = engine
            .merge(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"num": 2}),
                Some(&IfMatch::Generation(50)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("generation mismatch"));
    }

    #[tokio::test]
    async fn test_merge_nested_and_null_clear() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(
                &ctx,
                "testtype",
                json!({"text": "foo", "nested": {"a": 1, "b": 2}}),
            )
            .await
            .unwrap();

        let merged = engine
            .merge(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"nested": {"a": 9}, "text": null}),
                None,
            )
            .await
            .unwrap();

        assert_eq!(merged.fields["nested"], json!({"a": 9, "b": 2}));
        // Cleared back to the zero value
        assert_eq!(merged.fields["text"], json!(""));
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        engine
            .delete(&ctx, "testtype", &created.meta.id, None)
            .await
            .unwrap();

        let err = engine
            .delete(&ctx, "testtype", &created.meta.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_if_match_mismatch_preserves_object() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        let err = engine
            .delete(
                &ctx,
                "testtype",
                &created.meta.id,
                Some(&IfMatch::ETag("etag:doesnotmatch".into())),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::PRECONDITION_FAILED);

        assert!(engine
            .get(&ctx, "testtype", &created.meta.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_forbidden_write_hook_blocks_mutation() {
        let mut engine = Engine::in_memory(ServerConfig::default());
        engine
            .register_with::<TestType>(Hooks::new().may_update(|doc, _prev, _ctx| {
                if doc.fields["text"] == json!("blocked") {
                    return Err(Error::forbidden("text is blocked"));
                }
                Ok(())
            }))
            .unwrap();

        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "foo"}))
            .await
            .unwrap();

        let err = engine
            .merge(
                &ctx,
                "testtype",
                &created.meta.id,
                json!({"text": "blocked"}),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);

        // Refusal leaves the stored object untouched
        let current = engine
            .get(&ctx, "testtype", &created.meta.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.fields["text"], json!("foo"));
        assert_eq!(current.meta.generation, 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_commit_order() {
        let engine = engine();
        let ctx = OpContext::default();
        let created = engine
            .create(&ctx, "testtype", json!({"text": "v0"}))
            .await
            .unwrap();

        let mut sub = engine.store().subscribe_key("testtype", &created.meta.id);

        for i in 1..=5 {
            engine
                .merge(
                    &ctx,
                    "testtype",
                    &created.meta.id,
                    json!({"num": i}),
                    None,
                )
                .await
                .unwrap();
        }

        for want in 1..=5u64 {
            match sub.recv().await {
                Some(crate::bus::Change::Put(doc)) => {
                    assert_eq!(doc.meta.generation, want);
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }
}
