//! Focus set - LRU-bounded set of files included verbatim in the prompt

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

/// Default number of focused files
pub const DEFAULT_FOCUS_CAPACITY: usize = 20;

/// Bounded set of focused file paths with recency ordering.
///
/// Each entry carries its estimated token count so the context manager can
/// enforce the prompt budget without re-reading files.
#[derive(Debug)]
pub struct FocusSet {
    inner: LruCache<PathBuf, usize>,
}

impl FocusSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Add or promote a path; returns the evicted path when capacity
    /// overflow pushed out the least-recently-used entry.
    pub fn add(&mut self, path: PathBuf, tokens: usize) -> Option<PathBuf> {
        match self.inner.push(path.clone(), tokens) {
            Some((old, _)) if old != path => Some(old),
            _ => None,
        }
    }

    /// Promote an existing entry; no-op (false) when absent
    pub fn touch(&mut self, path: &Path) -> bool {
        self.inner.get(path).is_some()
    }

    /// Remove and return the least-recently-used entry
    pub fn pop_oldest(&mut self) -> Option<(PathBuf, usize)> {
        self.inner.pop_lru()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.contains(path)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Sum of the per-file token estimates
    pub fn total_tokens(&self) -> usize {
        self.inner.iter().map(|(_, tokens)| tokens).sum()
    }

    /// Paths most-recent first
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.iter().map(|(p, _)| p.clone()).collect()
    }
}
