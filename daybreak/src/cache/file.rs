//! File-backed cache store.
//!
//! Layout: one directory per task key, one JSON file per calendar day.
//!
//! ```text
//! <root>/<task-key>/2024-07-01.json
//! <root>/<task-key>/2024-07-02.json
//! ```
//!
//! Each file is replaced atomically, so readers never observe a partial entry
//! and different keys never contend with each other.

use async_trait::async_trait;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::store::{CacheEntry, LkgCacheStore};
use crate::errors::{DaybreakError, Result};
use crate::utils::io::{read_json, write_json};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Cache store persisting entries under a root directory.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    /// Opens (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| cache_error(&root, &e))?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, task_key: &str) -> PathBuf {
        self.root.join(key_dir_name(task_key))
    }

    fn entry_path(&self, task_key: &str, date: NaiveDate) -> PathBuf {
        self.key_dir(task_key)
            .join(format!("{}.json", date.format(DATE_FORMAT)))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| DaybreakError::Internal(format!("cache worker join error: {e}")))?
    }

    fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        match read_json::<CacheEntry>(path) {
            Ok(entry) => Ok(entry),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // A corrupt entry is as good as a miss; the next success rewrites it.
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                Ok(None)
            }
            Err(e) => Err(cache_error(path, &e)),
        }
    }

    /// Dated entry files for one key directory, oldest first.
    fn dated_files(dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(cache_error(dir, &e)),
        };

        let mut files = Vec::new();
        for item in read_dir {
            let path = item.map_err(|e| cache_error(dir, &e))?.path();
            let date = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|_| path.extension().is_some_and(|ext| ext == "json"))
                .and_then(|stem| NaiveDate::parse_from_str(stem, DATE_FORMAT).ok());
            if let Some(date) = date {
                files.push((date, path));
            }
        }
        files.sort_by_key(|(date, _)| *date);
        Ok(files)
    }

    fn key_dirs(&self) -> Result<Vec<PathBuf>> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| cache_error(&self.root, &e))?;
        let mut dirs = Vec::new();
        for item in read_dir {
            let path = item.map_err(|e| cache_error(&self.root, &e))?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    /// Deletes the dated entry files of one key directory matching `select`.
    ///
    /// Only entry files are touched; the directory itself goes once this call
    /// has emptied it.
    fn remove_entries(dir: &Path, select: impl Fn(NaiveDate) -> bool) -> Result<usize> {
        let mut removed = 0;
        for (date, path) in Self::dated_files(dir)? {
            if select(date) {
                std::fs::remove_file(&path).map_err(|e| cache_error(&path, &e))?;
                removed += 1;
            }
        }
        if removed > 0 && is_empty_dir(dir) {
            if let Err(e) = std::fs::remove_dir(dir) {
                debug!(dir = %dir.display(), error = %e, "Leaving cache directory in place");
            }
        }
        Ok(removed)
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none())
}

#[async_trait]
impl LkgCacheStore for FileCacheStore {
    async fn get(&self, task_key: &str, date: NaiveDate) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(task_key, date);
        self.blocking(move |_| Self::read_entry(&path)).await
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let path = self.entry_path(&entry.task_key, entry.date);
        self.blocking(move |_| {
            write_json(&path, &entry).map_err(|e| cache_error(&path, &e))?;
            debug!(task = %entry.task_key, date = %entry.date, "Stored cache entry");
            Ok(())
        })
        .await
    }

    async fn latest(&self, task_key: &str) -> Result<Option<CacheEntry>> {
        let dir = self.key_dir(task_key);
        self.blocking(move |_| {
            // Newest first; skip over corrupt files to the next most recent.
            for (_, path) in Self::dated_files(&dir)?.into_iter().rev() {
                if let Some(entry) = Self::read_entry(&path)? {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn clear_all(&self) -> Result<usize> {
        self.blocking(|store| {
            let mut removed = 0;
            for dir in store.key_dirs()? {
                removed += Self::remove_entries(&dir, |_| true)?;
            }
            Ok(removed)
        })
        .await
    }

    async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        self.blocking(move |store| {
            let mut removed = 0;
            for dir in store.key_dirs()? {
                removed += Self::remove_entries(&dir, |date| date < cutoff)?;
            }
            Ok(removed)
        })
        .await
    }
}

/// Directory name for a task key.
///
/// Keys made of safe characters are used verbatim; anything else is
/// sanitized and suffixed with a short hash so distinct keys never collide.
fn key_dir_name(task_key: &str) -> String {
    let safe = !task_key.is_empty()
        && task_key.len() <= 64
        && task_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if safe {
        return task_key.to_string();
    }

    let sanitized: String = task_key
        .chars()
        .take(48)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let hash = Sha256::digest(task_key.as_bytes());
    format!("{sanitized}~{}", hex::encode(&hash[..4]))
}

fn cache_error(path: &Path, err: &std::io::Error) -> DaybreakError {
    DaybreakError::Cache(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn entry(key: &str, d: u32, payload: serde_json::Value) -> CacheEntry {
        CacheEntry::new(key, day(d), payload, Utc::now())
    }

    #[tokio::test]
    async fn test_put_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileCacheStore::open(dir.path()).unwrap();
            store.put(entry("peak", 1, json!({"name": "Reynolds"}))).await.unwrap();
        }

        let reopened = FileCacheStore::open(dir.path()).unwrap();
        let hit = reopened.get("peak", day(1)).await.unwrap().unwrap();
        assert_eq!(hit.payload, json!({"name": "Reynolds"}));
        assert!(reopened.get("peak", day(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_skips_corrupt_newest() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::open(dir.path()).unwrap();
        store.put(entry("roads", 1, json!("open"))).await.unwrap();
        store.put(entry("roads", 2, json!("closed"))).await.unwrap();

        std::fs::write(dir.path().join("roads/2024-07-02.json"), b"{broken").unwrap();

        let latest = store.latest("roads").await.unwrap().unwrap();
        assert_eq!(latest.date, day(1));
        assert!(store.get("roads", day(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_all_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::open(dir.path()).unwrap();
        store.put(entry("a", 1, json!(1))).await.unwrap();
        store.put(entry("b", 1, json!(2))).await.unwrap();
        store.put(entry("b", 2, json!(3))).await.unwrap();

        assert_eq!(store.clear_all().await.unwrap(), 3);
        assert!(store.latest("a").await.unwrap().is_none());
        assert!(store.latest("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_before_keeps_recent() {
        let dir = TempDir::new().unwrap();
        let store = FileCacheStore::open(dir.path()).unwrap();
        store.put(entry("a", 1, json!(1))).await.unwrap();
        store.put(entry("a", 4, json!(4))).await.unwrap();
        store.put(entry("b", 2, json!(2))).await.unwrap();

        assert_eq!(store.prune_before(day(3)).await.unwrap(), 2);
        assert_eq!(store.latest("a").await.unwrap().unwrap().date, day(4));
        assert!(store.latest("b").await.unwrap().is_none());
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_clear_and_prune_leave_foreign_files_alone() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        std::fs::write(notes.join("keep.txt"), b"not a cache entry").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let store = FileCacheStore::open(dir.path()).unwrap();
        store.put(entry("a", 1, json!(1))).await.unwrap();
        std::fs::write(dir.path().join("a/README"), b"mixed").unwrap();

        assert_eq!(store.prune_before(day(5)).await.unwrap(), 1);
        assert_eq!(store.clear_all().await.unwrap(), 0);

        assert!(notes.join("keep.txt").exists());
        assert!(dir.path().join("empty").is_dir());
        assert!(dir.path().join("a/README").exists());
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileCacheStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.put(entry(&format!("task-{i}"), 1, json!(i))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            let hit = store.get(&format!("task-{i}"), day(1)).await.unwrap().unwrap();
            assert_eq!(hit.payload, json!(i));
        }
    }

    #[test]
    fn test_key_dir_name() {
        assert_eq!(key_dir_name("image_otd"), "image_otd");
        let odd = key_dir_name("weather/alerts");
        assert!(odd.starts_with("weather_alerts~"));
        assert_ne!(key_dir_name("a/b"), key_dir_name("a?b"));
    }
}
