//! # Connections Module
//!
//! Storage seams of the engine: the payload cache and the version store. The
//! traits and the in-process backends are always available; the Redis backends
//! are compiled with the `connections` feature.

/// Cache contract and the in-memory TTL cache.
pub mod cache;
/// Version store contract with in-memory and JSON-file backends.
pub mod version_store;

/// Redis payload cache.
#[cfg(feature = "connections")]
pub mod cache_redis;
/// Redis version store.
#[cfg(feature = "connections")]
pub mod version_redis;

pub use cache::{CacheWriter, MemoryCache};
pub use version_store::{FileVersionStore, MemoryVersionStore, VersionStore};

#[cfg(feature = "connections")]
pub use cache_redis::RedisCache;
#[cfg(feature = "connections")]
pub use version_redis::RedisVersionStore;
