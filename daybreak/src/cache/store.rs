//! Last-known-good cache store trait and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::errors::Result;

/// The last successful payload of one task on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key of the task that produced the payload.
    pub task_key: String,
    /// Local calendar day the payload belongs to.
    pub date: NaiveDate,
    /// The cached payload.
    pub payload: serde_json::Value,
    /// When the payload was stored.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates a new cache entry.
    #[must_use]
    pub fn new(
        task_key: impl Into<String>,
        date: NaiveDate,
        payload: serde_json::Value,
        stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_key: task_key.into(),
            date,
            payload,
            stored_at,
        }
    }
}

/// Storage backend for last-known-good task results.
///
/// Holds at most one entry per `(task_key, date)`. Entries for other days are
/// never returned by [`get`](Self::get); they only serve as a fallback via
/// [`latest`](Self::latest).
#[async_trait]
pub trait LkgCacheStore: Send + Sync + Debug {
    /// Returns the entry for exactly `(task_key, date)`.
    async fn get(&self, task_key: &str, date: NaiveDate) -> Result<Option<CacheEntry>>;

    /// Upserts an entry. The entry is durable once this returns.
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Returns the most recent entry for `task_key`, whatever its date.
    async fn latest(&self, task_key: &str) -> Result<Option<CacheEntry>>;

    /// Discards every entry, returning how many were removed.
    async fn clear_all(&self) -> Result<usize>;

    /// Removes entries dated before `cutoff`, returning how many were removed.
    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize>;
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, BTreeMap<NaiveDate, CacheEntry>>,
}

impl InMemoryCacheStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|days| days.len()).sum()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LkgCacheStore for InMemoryCacheStore {
    async fn get(&self, task_key: &str, date: NaiveDate) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(task_key)
            .and_then(|days| days.get(&date).cloned()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries
            .entry(entry.task_key.clone())
            .or_default()
            .insert(entry.date, entry);
        Ok(())
    }

    async fn latest(&self, task_key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(task_key)
            .and_then(|days| days.values().next_back().cloned()))
    }

    async fn clear_all(&self) -> Result<usize> {
        let removed = self.len();
        self.entries.clear();
        Ok(removed)
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut removed = 0;
        for mut days in self.entries.iter_mut() {
            let before = days.len();
            days.retain(|date, _| *date >= cutoff);
            removed += before - days.len();
        }
        self.entries.retain(|_, days| !days.is_empty());
        Ok(removed)
    }
}
