//! Search result cache
//!
//! The dispatcher only sees the [`ResultCache`] capability. The bundled
//! [`BoundedCache`] keeps at most `capacity` entries and simply stops
//! admitting new keys once full; it never evicts.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::SearchResult;

/// Cache key: keyword plus the clamped worker count
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub keyword: String,
    pub workers: usize,
}

impl CacheKey {
    pub fn new(keyword: impl Into<String>, workers: usize) -> Self {
        Self {
            keyword: keyword.into(),
            workers,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Capability interface for a search result cache
pub trait ResultCache: Send + Sync {
    /// Look up a cached result, recording a hit or miss
    fn lookup(&mut self, key: &CacheKey) -> Option<SearchResult>;

    /// Offer a freshly computed result to the cache
    fn record(&mut self, key: CacheKey, result: &SearchResult);

    /// Drop every entry (the catalog changed)
    fn invalidate(&mut self);

    fn stats(&self) -> CacheStats;

    /// Write the cache contents to `path`
    fn export_snapshot(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: CacheKey,
    result: SearchResult,
}

/// On-disk cache snapshot
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    exported_at: DateTime<Utc>,
    stats: CacheStats,
    entries: Vec<SnapshotEntry>,
}

/// Capacity-bounded cache without eviction
///
/// Entries are only dropped by [`ResultCache::invalidate`], which the handler
/// calls on add and remove. Edits to a document's file on disk are not
/// noticed, so a cached search can return stale ids until the next catalog
/// mutation.
#[derive(Debug, Default)]
pub struct BoundedCache {
    entries: HashMap<CacheKey, SearchResult>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl BoundedCache {
    /// Create a cache holding at most `capacity` results. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }
}

impl ResultCache for BoundedCache {
    fn lookup(&mut self, key: &CacheKey) -> Option<SearchResult> {
        if !self.is_enabled() {
            return None;
        }
        match self.entries.get(key) {
            Some(result) => {
                self.hits += 1;
                Some(result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn record(&mut self, key: CacheKey, result: &SearchResult) {
        if self.entries.contains_key(&key) || self.entries.len() < self.capacity {
            self.entries.insert(key, result.clone());
        }
    }

    fn invalidate(&mut self) {
        self.entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            capacity: self.capacity,
        }
    }

    fn export_snapshot(&self, path: &Path) -> Result<()> {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .map(|(key, result)| SnapshotEntry {
                key: key.clone(),
                result: result.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.key.keyword.as_str(), a.key.workers).cmp(&(b.key.keyword.as_str(), b.key.workers))
        });

        let snapshot = CacheSnapshot {
            exported_at: Utc::now(),
            stats: self.stats(),
            entries,
        };

        let data = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write cache snapshot to {}", path.display()))?;

        info!(
            "Exported cache snapshot with {} entries to {}",
            snapshot.entries.len(),
            path.display()
        );
        Ok(())
    }
}
