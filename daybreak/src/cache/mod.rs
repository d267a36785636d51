//! Last-known-good (LKG) cache.
//!
//! Stores the most recent successful payload of each task, keyed by the
//! calendar day it was fetched on. Date-deterministic tasks use it as a
//! primary cache; dynamic tasks only read it as a fallback when a fetch is
//! exhausted.

mod file;
mod store;

pub use file::FileCacheStore;
pub use store::{CacheEntry, InMemoryCacheStore, LkgCacheStore};
