//! # Resource Engine
//!
//! A generic resource server: register your object types, get a uniform
//! REST-plus-streaming surface (create, read, replace, merge-update,
//! delete, list, watch) over a pluggable persistence layer, with
//! conditional-write, change-notification and idempotency guarantees.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HTTP Surface                          │
//! │  • Idempotency gate (token replay, single-flight)          │
//! │  • Request hook, content negotiation (JSON / SSE)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │  • Registry: type name → validator, hooks, per-type lock   │
//! │  • Mutation pipeline: If-Match, merge/replace, generation  │
//! │  • List engine: filter, sort, paginate, list etags         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Watched Store                          │
//! │  • Storage trait (memory reference backend included)       │
//! │  • Bus: per-key + per-type fan-out, bounded buffers        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_engine::{build_router, Engine, Metadata, Resource, ServerConfig};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Widget {
//!     #[serde(flatten)]
//!     meta: Metadata,
//!     #[serde(default)]
//!     text: String,
//! }
//!
//! impl Resource for Widget {
//!     fn metadata(&self) -> &Metadata { &self.meta }
//!     fn metadata_mut(&mut self) -> &mut Metadata { &mut self.meta }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let addr = config.listen_addr.clone();
//!
//!     let mut engine = Engine::in_memory(config);
//!     engine.register::<Widget>().expect("register");
//!
//!     let app = build_router(Arc::new(engine));
//!     let listener = tokio::net::TcpListener::bind(&addr).await.expect("bind");
//!     axum::serve(listener, app).await.expect("serve");
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Generations**: every successful mutation increments the per-object
//!   generation by exactly one; the per-type writer lock makes this exact
//!   without a transactional backend.
//! - **ETags**: deterministic content digests; `If-Match` accepts both
//!   etag and `generation:N` tokens, `If-None-Match` serves 304s.
//! - **Watch**: subscribers observe every committed mutation of their key,
//!   in commit order, or get killed as slow consumers — writers never
//!   block on readers.
//! - **Idempotency**: `Idempotency-Key` replays are byte-identical;
//!   mismatched re-use of a key is rejected without re-execution.
//!
//! ## Modules
//!
//! - [`engine`]: the [`Engine`] coordinator and operation surface
//! - [`registry`]: type registration, hooks, safety checks
//! - [`storage`]: the [`Store`] trait, memory backend, watched wrapper
//! - [`bus`]: post-commit fan-out with bounded subscriber buffers
//! - [`path`]: dotted-path predicates with typed comparisons
//! - [`http`]: router, handlers, SSE streams, generated clients
//! - [`idempotency`]: the request-replay gate

pub mod bus;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod listopts;
pub mod metadata;
pub mod metrics;
pub mod path;
pub mod registry;
pub mod storage;

pub use bus::{Bus, Change, Subscription};
pub use config::ServerConfig;
pub use document::Document;
pub use engine::{list_etag, Engine};
pub use error::Error;
pub use crate::http::{build_router, build_router_with_hook, serve};
pub use idempotency::IDEMPOTENCY_KIND;
pub use listopts::{Filter, ListOpts, Sort, StreamMode};
pub use metadata::{IfMatch, Metadata};
pub use path::{FieldKind, Op};
pub use registry::{Hooks, OpContext, Registry, Resource};
pub use storage::{MemoryStore, StorageError, Store, WatchedStore};
