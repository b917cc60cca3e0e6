//! Storage abstraction and reference backend.
//!
//! Concrete durable backends (file tree, SQL) live outside this crate and
//! implement [`Store`]. The engine itself only requires per-operation
//! atomicity; cross-operation exclusion comes from the mutation pipeline.

pub mod memory;
pub mod traits;
pub mod watched;

pub use memory::MemoryStore;
pub use traits::{StorageError, Store};
pub use watched::WatchedStore;
