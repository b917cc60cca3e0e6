//! Resource type registry.
//!
//! Registration records a type's URL name (defaulting to the Rust type
//! identifier, lowercased), a validator that round-trips field maps through
//! the concrete type (filling zero values and dropping unknown members),
//! the declared time/date field kinds, and the optional authorization
//! hooks. The registry rejects types whose serialized zero value does not
//! embed the [`Metadata`](crate::metadata::Metadata) block.
//!
//! A type is *safe* iff it carries at least one read check and at least one
//! write check. [`Registry::is_safe`] reports violations; [`Registry::check_safe`]
//! is the hard variant that aborts the process.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::document::Document;
use crate::error::Error;
use crate::metadata::{Metadata, METADATA_FIELDS};
use crate::path::{self, FieldKind};

/// A user-declared record servable by the engine.
///
/// Implementors embed a flattened [`Metadata`] block:
///
/// ```
/// use resource_engine::{Metadata, Resource};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Widget {
///     #[serde(flatten)]
///     meta: Metadata,
///     #[serde(default)]
///     text: String,
/// }
///
/// impl Resource for Widget {
///     fn metadata(&self) -> &Metadata { &self.meta }
///     fn metadata_mut(&mut self) -> &mut Metadata { &mut self.meta }
/// }
///
/// assert_eq!(Widget::type_name(), "widget");
/// ```
pub trait Resource:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// URL segment for this type. Defaults to the type identifier,
    /// lowercased.
    fn type_name() -> String {
        let full = std::any::type_name::<Self>();
        let ident = full.rsplit("::").next().unwrap_or(full);
        ident.to_ascii_lowercase()
    }

    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Declared kinds for string fields with time/date semantics, keyed by
    /// dotted path.
    fn field_kinds() -> Vec<(&'static str, FieldKind)> {
        Vec::new()
    }
}

/// Per-request context passed to authorization hooks.
#[derive(Debug, Default, Clone)]
pub struct OpContext {
    pub headers: http::HeaderMap,
}

impl OpContext {
    #[must_use]
    pub fn new(headers: http::HeaderMap) -> Self {
        Self { headers }
    }

    /// The Authorization header, if any.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

type CheckFn = Box<dyn Fn(&Document, Option<&Document>, &OpContext) -> Result<(), Error> + Send + Sync>;
type ReadFn = Box<dyn Fn(Document, &OpContext) -> Result<Document, Error> + Send + Sync>;
type ValidateFn = Box<dyn Fn(&Map<String, Value>) -> Result<Map<String, Value>, Error> + Send + Sync>;

/// Optional authorization capabilities for a registered type.
///
/// Hooks return the taxonomy error they mean: `Unauthorized` for missing
/// credentials, `Forbidden` for a refusal. `may_read` may redact by
/// returning a reduced projection of the document.
#[derive(Default)]
pub struct Hooks {
    may_create: Option<CheckFn>,
    may_read: Option<ReadFn>,
    may_update: Option<CheckFn>,
    may_delete: Option<CheckFn>,
    may_write: Option<CheckFn>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("may_create", &self.may_create.is_some())
            .field("may_read", &self.may_read.is_some())
            .field("may_update", &self.may_update.is_some())
            .field("may_delete", &self.may_delete.is_some())
            .field("may_write", &self.may_write.is_some())
            .finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn may_create(
        mut self,
        f: impl Fn(&Document, &OpContext) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        self.may_create = Some(Box::new(move |doc, _prev, ctx| f(doc, ctx)));
        self
    }

    #[must_use]
    pub fn may_read(
        mut self,
        f: impl Fn(Document, &OpContext) -> Result<Document, Error> + Send + Sync + 'static,
    ) -> Self {
        self.may_read = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn may_update(
        mut self,
        f: impl Fn(&Document, Option<&Document>, &OpContext) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.may_update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn may_delete(
        mut self,
        f: impl Fn(&Document, &OpContext) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        self.may_delete = Some(Box::new(move |doc, _prev, ctx| f(doc, ctx)));
        self
    }

    #[must_use]
    pub fn may_write(
        mut self,
        f: impl Fn(&Document, Option<&Document>, &OpContext) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.may_write = Some(Box::new(f));
        self
    }
}

/// One registered type: name, validator, field kinds, hooks, and the
/// per-type lock that serializes its read-modify-write cycles.
pub struct ResourceType {
    name: String,
    zero: Map<String, Value>,
    field_kinds: HashMap<String, FieldKind>,
    hooks: Hooks,
    validate: ValidateFn,
    pub(crate) lock: RwLock<()>,
}

impl std::fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("zero", &self.zero)
            .field("field_kinds", &self.field_kinds)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ResourceType {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The serialized zero value's field map (metadata stripped). Used for
    /// PUT overlays, path validation, and schema generation.
    #[must_use]
    pub fn zero_fields(&self) -> &Map<String, Value> {
        &self.zero
    }

    #[must_use]
    pub fn field_kind(&self, path: &str) -> Option<FieldKind> {
        self.field_kinds.get(path).copied()
    }

    /// Round-trip a field map through the concrete type: fills zero values
    /// for absent members, drops unknown members, rejects type mismatches.
    pub fn validate_fields(&self, fields: &Map<String, Value>) -> Result<Map<String, Value>, Error> {
        (self.validate)(fields)
    }

    /// Reject paths that do not exist on this type's shape.
    pub fn validate_path(&self, path: &str) -> Result<(), Error> {
        path::validate(&self.zero, path)
    }

    #[must_use]
    pub fn has_read_check(&self) -> bool {
        self.hooks.may_read.is_some()
    }

    #[must_use]
    pub fn has_write_check(&self) -> bool {
        self.hooks.may_create.is_some()
            || self.hooks.may_update.is_some()
            || self.hooks.may_delete.is_some()
            || self.hooks.may_write.is_some()
    }

    pub(crate) fn check_create(&self, doc: &Document, ctx: &OpContext) -> Result<(), Error> {
        if let Some(f) = &self.hooks.may_create {
            f(doc, None, ctx)?;
        }
        if let Some(f) = &self.hooks.may_write {
            f(doc, None, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn check_update(
        &self,
        doc: &Document,
        prev: &Document,
        ctx: &OpContext,
    ) -> Result<(), Error> {
        if let Some(f) = &self.hooks.may_update {
            f(doc, Some(prev), ctx)?;
        }
        if let Some(f) = &self.hooks.may_write {
            f(doc, Some(prev), ctx)?;
        }
        Ok(())
    }

    pub(crate) fn check_delete(&self, doc: &Document, ctx: &OpContext) -> Result<(), Error> {
        if let Some(f) = &self.hooks.may_delete {
            f(doc, None, ctx)?;
        }
        if let Some(f) = &self.hooks.may_write {
            f(doc, None, ctx)?;
        }
        Ok(())
    }

    /// Read check plus redaction: the hook may return a reduced projection.
    pub(crate) fn check_read(&self, doc: Document, ctx: &OpContext) -> Result<Document, Error> {
        match &self.hooks.may_read {
            Some(f) => f(doc, ctx),
            None => Ok(doc),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    types: HashMap<String, Arc<ResourceType>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its default name with no hooks.
    pub fn register<T: Resource>(&mut self) -> Result<(), Error> {
        self.register_named_with::<T>(&T::type_name(), Hooks::default())
    }

    /// Register `T` under its default name with authorization hooks.
    pub fn register_with<T: Resource>(&mut self, hooks: Hooks) -> Result<(), Error> {
        self.register_named_with::<T>(&T::type_name(), hooks)
    }

    /// Register `T` under an explicit URL name.
    pub fn register_named_with<T: Resource>(
        &mut self,
        name: &str,
        hooks: Hooks,
    ) -> Result<(), Error> {
        if name.is_empty() || name.starts_with('_') || name == crate::idempotency::IDEMPOTENCY_KIND {
            return Err(Error::bad_request(format!("invalid type name: {name}")));
        }
        if self.types.contains_key(name) {
            return Err(Error::bad_request(format!("type already registered: {name}")));
        }

        let zero_value = serde_json::to_value(T::default())?;
        let Value::Object(zero_obj) = zero_value else {
            return Err(Error::bad_request(format!(
                "type {name} does not serialize to an object"
            )));
        };
        for field in METADATA_FIELDS {
            if !zero_obj.contains_key(field) {
                return Err(Error::bad_request(format!(
                    "type {name} does not embed metadata (missing {field})"
                )));
            }
        }

        let zero = Document::strip_metadata(Value::Object(zero_obj))?;

        let type_name = name.to_string();
        let validate: ValidateFn = Box::new(move |fields| {
            let typed: T = serde_json::from_value(Value::Object(fields.clone())).map_err(|e| {
                Error::bad_request(format!("parse {type_name} object failed: {e}"))
            })?;
            let back = serde_json::to_value(&typed)?;
            Document::strip_metadata(back)
        });

        let field_kinds = T::field_kinds()
            .into_iter()
            .map(|(p, k)| (p.to_string(), k))
            .collect();

        self.types.insert(
            name.to_string(),
            Arc::new(ResourceType {
                name: name.to_string(),
                zero,
                field_kinds,
                hooks,
                validate,
                lock: RwLock::new(()),
            }),
        );

        Ok(())
    }

    /// Look up a registered type; unknown names are NotFound.
    pub fn get(&self, name: &str) -> Result<Arc<ResourceType>, Error> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown type: {name}")))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn entries(&self) -> Vec<Arc<ResourceType>> {
        self.names()
            .iter()
            .filter_map(|n| self.types.get(n).cloned())
            .collect()
    }

    /// Error if any registered type lacks the required read+write checks.
    pub fn is_safe(&self) -> Result<(), Error> {
        for name in self.names() {
            let rt = self.get(&name)?;
            if !rt.has_read_check() {
                return Err(Error::internal(format!("{name} lacks a read check")));
            }
            if !rt.has_write_check() {
                return Err(Error::internal(format!("{name} lacks a write check")));
            }
        }
        Ok(())
    }

    /// Hard variant of [`is_safe`](Self::is_safe): aborts the process.
    pub fn check_safe(&self) {
        if let Err(err) = self.is_safe() {
            panic!("unsafe registry: {err}");
        }
    }
}
