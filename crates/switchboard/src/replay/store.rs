//! Pluggable storage for replay keys.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde_json::Value;
use thiserror::Error;

/// What is remembered about a replay key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayEntry {
    /// The key was used; no result is kept.
    Seen,
    /// The key's first dispatch succeeded with this value.
    Completed(Value),
}

/// Errors raised by replay stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayStoreError {
    /// The key already has an entry; entries are never overwritten.
    #[error("replay key '{key}' is already recorded")]
    Occupied {
        /// The contested key.
        key: String,
    },
}

/// Key-to-entry storage backing the replay guard.
///
/// [`ReplayStore::set`] must insert atomically and only when the key is
/// absent; a second write for the same key is how duplicates are detected.
pub trait ReplayStore: Send + Sync {
    /// Whether `key` has an entry.
    fn has(&self, key: &str) -> bool;

    /// The entry for `key`, if any.
    fn get(&self, key: &str) -> Option<ReplayEntry>;

    /// Inserts `entry` for `key` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayStoreError::Occupied`] when `key` already has an entry.
    fn set(&self, key: &str, entry: ReplayEntry) -> Result<(), ReplayStoreError>;
}

/// Process-local replay store, optionally bounded with LRU eviction.
///
/// An evicted key can be used again, so bound the store only when the
/// window of protection it still provides is acceptable.
#[derive(Debug)]
pub struct InMemoryReplayStore {
    entries: Mutex<LruCache<String, ReplayEntry>>,
}

impl Default for InMemoryReplayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReplayStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Creates a store that evicts the least recently used key beyond
    /// `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Builds an unbounded store for `None`, or a bounded one otherwise.
    ///
    /// A zero capacity is treated as unbounded.
    #[must_use]
    pub fn from_capacity(capacity: Option<usize>) -> Self {
        capacity
            .and_then(NonZeroUsize::new)
            .map_or_else(Self::new, Self::with_capacity)
    }

    /// Number of remembered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no keys are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, ReplayEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn has(&self, key: &str) -> bool {
        self.entries().contains(key)
    }

    fn get(&self, key: &str) -> Option<ReplayEntry> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, entry: ReplayEntry) -> Result<(), ReplayStoreError> {
        let mut entries = self.entries();
        if entries.contains(key) {
            return Err(ReplayStoreError::Occupied {
                key: key.to_owned(),
            });
        }
        entries.put(key.to_owned(), entry);
        Ok(())
    }
}
