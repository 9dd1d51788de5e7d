//! File cache - mtime-validated read cache with content hashes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// A cached file entry.
///
/// The mtime is the fast-path validity check; the hash is retained for
/// equality checks and cache-identity telemetry, since mtime resolution is
/// coarse on some filesystems.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub content: String,
    pub hash: String,
    pub mtime: SystemTime,
}

/// Outcome of a cache-routed read
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub content: String,
    /// True when the content came from the cache
    pub cached: bool,
    /// True when the on-disk file differed from a previous cache entry
    pub changed: bool,
}

/// Content-addressed read cache keyed by path + modification time.
///
/// Reads take the shared lock, mutations the exclusive lock; the lock is
/// never held across file I/O.
#[derive(Debug, Default)]
pub struct FileCache {
    entries: RwLock<HashMap<PathBuf, CachedFile>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a read through the cache.
    ///
    /// Missing entry: read from disk, hash, store. Matching mtime: serve
    /// the cached content. Differing mtime: re-read and overwrite.
    pub async fn check_read(&self, path: &Path) -> Result<ReadOutcome> {
        let mtime = tokio::fs::metadata(path).await?.modified()?;

        let existing = self.read_guard().get(path).cloned();
        if let Some(entry) = &existing {
            if entry.mtime == mtime {
                return Ok(ReadOutcome {
                    content: entry.content.clone(),
                    cached: true,
                    changed: false,
                });
            }
        }

        let content = tokio::fs::read_to_string(path).await?;
        let hash = content_hash(&content);
        self.write_guard().insert(
            path.to_path_buf(),
            CachedFile {
                content: content.clone(),
                hash,
                mtime,
            },
        );

        Ok(ReadOutcome {
            content,
            cached: false,
            changed: existing.is_some(),
        })
    }

    /// Populate the entry after a successful write, without re-reading.
    pub async fn update_after_write(&self, path: &Path, content: &str) -> Result<()> {
        let mtime = tokio::fs::metadata(path).await?.modified()?;
        self.write_guard().insert(
            path.to_path_buf(),
            CachedFile {
                content: content.to_string(),
                hash: content_hash(content),
                mtime,
            },
        );
        Ok(())
    }

    /// Cached content iff an entry exists and the on-disk mtime still
    /// matches. Used for the agent's read short-circuit; a miss means the
    /// tool must run.
    pub async fn cached_unchanged(&self, path: &Path) -> Option<String> {
        let entry = self.read_guard().get(path).cloned()?;
        let mtime = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
        if entry.mtime == mtime {
            Some(entry.content)
        } else {
            None
        }
    }

    pub fn invalidate(&self, path: &Path) {
        self.write_guard().remove(path);
    }

    pub fn get(&self, path: &Path) -> Option<CachedFile> {
        self.read_guard().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, CachedFile>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, CachedFile>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "hello").await.unwrap();

        let cache = FileCache::new();
        let first = cache.check_read(&path).await.unwrap();
        assert_eq!(first.content, "hello");
        assert!(!first.cached);
        assert!(!first.changed);

        let second = cache.check_read(&path).await.unwrap();
        assert_eq!(second.content, "hello");
        assert!(second.cached);
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn test_mtime_change_refreshes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "v1").await.unwrap();

        let cache = FileCache::new();
        cache.check_read(&path).await.unwrap();

        // Force a distinct mtime even on coarse filesystems
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::write(&path, "v2").await.unwrap();
        let future = SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options().append(true).open(&path).unwrap();
        file.set_modified(future).unwrap();

        let outcome = cache.check_read(&path).await.unwrap();
        assert_eq!(outcome.content, "v2");
        assert!(!outcome.cached);
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_update_after_write_coherence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "written").await.unwrap();

        let cache = FileCache::new();
        cache.update_after_write(&path, "written").await.unwrap();

        let outcome = cache.check_read(&path).await.unwrap();
        assert_eq!(outcome.content, "written");
        assert!(outcome.cached);
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_cached_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "stable").await.unwrap();

        let cache = FileCache::new();
        assert!(cache.cached_unchanged(&path).await.is_none());

        cache.check_read(&path).await.unwrap();
        assert_eq!(cache.cached_unchanged(&path).await.as_deref(), Some("stable"));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "x").await.unwrap();

        let cache = FileCache::new();
        cache.check_read(&path).await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_hash_is_stable_content_identity() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, "same").await.unwrap();
        tokio::fs::write(&b, "same").await.unwrap();

        let cache = FileCache::new();
        cache.check_read(&a).await.unwrap();
        cache.check_read(&b).await.unwrap();
        assert_eq!(cache.get(&a).unwrap().hash, cache.get(&b).unwrap().hash);
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new();
        assert!(cache.check_read(&dir.path().join("nope.txt")).await.is_err());
    }
}
