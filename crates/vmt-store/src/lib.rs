//! VMT object store
//!
//! The authoritative store contract the engine consumes, an in-memory
//! implementation, and a best-effort read-through cache.
//!
//! # Core Concepts
//!
//! - [`ObjectStore`]: create/get/patch/delete with duplicate-create rejection
//!   and compare-and-swap patches
//! - [`InMemoryStore`]: `DashMap`-backed store with change events and failure injection
//! - [`ObjectCache`]: moka cache that falls back to the store on miss
//!
//! # Example
//!
//! ```rust,ignore
//! use vmt_store::{InMemoryStore, ObjectCache, ObjectStore};
//!
//! let store = InMemoryStore::new();
//! let cache = ObjectCache::default();
//! let snapshot = cache.get_snapshot(&store, &key).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod error;
mod memory;
mod store;

pub use cache::{CacheStats, ObjectCache};
pub use error::{Resource, StoreError, StoreResult};
pub use memory::{InMemoryStore, Operation, StoreEvent};
pub use store::ObjectStore;

#[cfg(any(test, feature = "mock"))]
pub use store::MockObjectStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
