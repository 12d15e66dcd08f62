//! Request Handler
//!
//! Runs one decoded request to completion against the catalog. The handler is
//! owned by the dispatch loop, so catalog mutations are never concurrent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::index::{DocumentIndex, IndexError};
use crate::search::{clamp_workers, count_lines, SearchDispatcher};
use crate::types::{DocumentId, NewDocument};

use super::metrics::DaemonMetrics;
use super::protocol::{Request, Response};

/// Handles requests for the dispatch loop
pub struct RequestHandler {
    index: DocumentIndex,
    search: SearchDispatcher,
    cache: Box<dyn ResultCache>,
    /// Worker count for searches that do not name one
    default_workers: usize,
    metrics: Arc<DaemonMetrics>,
}

impl RequestHandler {
    pub fn new(
        index: DocumentIndex,
        search: SearchDispatcher,
        cache: Box<dyn ResultCache>,
        default_workers: usize,
        metrics: Arc<DaemonMetrics>,
    ) -> Self {
        Self {
            index,
            search,
            cache,
            default_workers,
            metrics,
        }
    }

    /// Handle a request and return the reply to send
    pub async fn handle(&mut self, request: Request) -> Response {
        debug!("Handling {} request", request.command());

        match request {
            Request::Add(doc) => self.handle_add(doc),
            Request::Query { id } => self.handle_query(id),
            Request::Remove { id } => self.handle_remove(id),
            Request::LineCount { id, keyword } => self.handle_line_count(id, keyword).await,
            Request::Search { keyword, workers } => self.handle_search(keyword, workers).await,
            Request::Shutdown => {
                info!("Shutdown requested");
                Response::ShuttingDown
            }
        }
    }

    // ============ Catalog Handlers ============

    fn handle_add(&mut self, doc: NewDocument) -> Response {
        match self.index.add(doc) {
            Ok(id) => {
                self.metrics.documents_added.inc();
                self.cache.invalidate();
                info!("Document {} indexed", id);
                Response::Indexed(id)
            }
            Err(e) => {
                self.metrics.index_errors.inc();
                error!("Failed to index document: {}", e);
                Response::IndexFailed(e.to_string())
            }
        }
    }

    fn handle_query(&self, id: DocumentId) -> Response {
        match self.index.query(id) {
            Ok(record) => Response::Document(record.clone()),
            Err(_) => Response::NotFound(id),
        }
    }

    fn handle_remove(&mut self, id: DocumentId) -> Response {
        match self.index.remove(id) {
            Ok(_) => {
                self.metrics.documents_removed.inc();
                self.cache.invalidate();
                info!("Document {} removed", id);
                Response::Removed(id)
            }
            Err(IndexError::NotFound(_)) => Response::NotFound(id),
            Err(e) => {
                self.metrics.index_errors.inc();
                error!("Failed to remove document {}: {}", id, e);
                Response::RemoveFailed {
                    id,
                    reason: e.to_string(),
                }
            }
        }
    }

    // ============ Search Handlers ============

    async fn handle_line_count(&self, id: DocumentId, keyword: String) -> Response {
        let path = match self.index.query(id) {
            Ok(record) => self.search.resolve(record),
            Err(_) => return Response::NotFound(id),
        };

        self.metrics.line_counts_total.inc();
        Response::LineCount(count_lines(path, keyword).await)
    }

    async fn handle_search(&mut self, keyword: String, workers: Option<i64>) -> Response {
        let requested = workers.unwrap_or(self.default_workers as i64);
        let workers = clamp_workers(requested, self.search.max_workers());
        let key = CacheKey::new(keyword.as_str(), workers);

        self.metrics.searches_total.inc();
        if let Some(cached) = self.cache.lookup(&key) {
            self.metrics.cache_hits.inc();
            debug!("Serving search '{}' ({} workers) from cache", keyword, workers);
            return Response::search(cached);
        }

        let outcome = self.search.search(self.index.list(), &keyword, workers).await;
        self.metrics.search_latency.observe(outcome.elapsed);
        self.metrics.search_workers_spawned.add(outcome.workers as u64);
        if outcome.failed_workers > 0 {
            self.metrics.search_workers_failed.add(outcome.failed_workers as u64);
            warn!(
                "Search '{}' finished with {} failed workers",
                keyword, outcome.failed_workers
            );
        }

        self.cache.record(key, &outcome.result);
        Response::search(outcome.result)
    }

    // ============ Lifecycle ============

    /// Persist the catalog and export the cache snapshot
    pub fn persist(&self, cache_snapshot: &Path) -> Result<()> {
        self.index.save().context("Failed to save index on shutdown")?;
        info!("Saved {} documents", self.index.len());

        let stats = self.cache.stats();
        info!(
            "Cache: {} hits, {} misses, {}/{} entries",
            stats.hits, stats.misses, stats.entries, stats.capacity
        );
        if stats.capacity > 0 {
            self.cache.export_snapshot(cache_snapshot)?;
        }
        Ok(())
    }

    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<DaemonMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedCache;
    use tempfile::TempDir;

    fn handler(dir: &Path, capacity: usize, cache: usize) -> RequestHandler {
        RequestHandler::new(
            DocumentIndex::in_memory(capacity),
            SearchDispatcher::new(dir, 8),
            Box::new(BoundedCache::new(cache)),
            1,
            DaemonMetrics::shared(),
        )
    }

    fn add(title: &str, path: &str) -> Request {
        Request::Add(NewDocument::new(title, "Author", "2000", path))
    }

    #[tokio::test]
    async fn test_add_query_remove() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(dir.path(), 10, 0);

        assert_eq!(h.handle(add("Intro", "Intro.pdf")).await, Response::Indexed(1));
        match h.handle(Request::Query { id: 1 }).await {
            Response::Document(rec) => assert_eq!(rec.title, "Intro"),
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(h.handle(Request::Remove { id: 1 }).await, Response::Removed(1));
        assert_eq!(h.handle(Request::Query { id: 1 }).await, Response::NotFound(1));
        assert_eq!(h.handle(Request::Remove { id: 1 }).await, Response::NotFound(1));
    }

    #[tokio::test]
    async fn test_add_beyond_capacity() {
        let dir = TempDir::new().unwrap();
        let mut h = handler(dir.path(), 1, 0);

        h.handle(add("a", "a.txt")).await;
        let response = h.handle(add("b", "b.txt")).await;
        assert!(matches!(response, Response::IndexFailed(_)));
        assert_eq!(h.index().len(), 1);
    }

    #[tokio::test]
    async fn test_line_count() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("doc.txt"), "apple\napple\nno\napple\n").unwrap();
        let mut h = handler(dir.path(), 10, 0);
        h.handle(add("doc", "doc.txt")).await;

        let response = h
            .handle(Request::LineCount { id: 1, keyword: "apple".to_string() })
            .await;
        assert_eq!(response, Response::LineCount(3));

        let response = h
            .handle(Request::LineCount { id: 999, keyword: "apple".to_string() })
            .await;
        assert_eq!(response, Response::NotFound(999));
    }

    #[tokio::test]
    async fn test_search_uses_cache_until_catalog_changes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "apple").unwrap();
        std::fs::write(dir.path().join("b.txt"), "apple").unwrap();
        let mut h = handler(dir.path(), 10, 4);
        h.handle(add("a", "a.txt")).await;

        let search = || Request::Search { keyword: "apple".to_string(), workers: None };
        assert_eq!(h.handle(search()).await.to_string(), "[1]");
        assert_eq!(h.handle(search()).await.to_string(), "[1]");
        assert_eq!(h.metrics().cache_hits.get(), 1);

        h.handle(add("b", "b.txt")).await;
        assert_eq!(h.handle(search()).await.to_string(), "[1, 2]");
        assert_eq!(h.metrics().cache_hits.get(), 1);
    }

    #[tokio::test]
    async fn test_cached_search_ignores_file_edits_until_mutation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "apple").unwrap();
        let mut h = handler(dir.path(), 10, 4);
        h.handle(add("a", "a.txt")).await;

        let search = || Request::Search { keyword: "apple".to_string(), workers: None };
        assert_eq!(h.handle(search()).await.to_string(), "[1]");

        std::fs::write(dir.path().join("a.txt"), "pear").unwrap();
        assert_eq!(h.handle(search()).await.to_string(), "[1]");

        h.handle(add("b", "b.txt")).await;
        assert_eq!(h.handle(search()).await, Response::NoMatches);
    }

    #[tokio::test]
    async fn test_search_clamps_workers_and_reports_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "apple").unwrap();
        let mut h = handler(dir.path(), 10, 0);
        h.handle(add("a", "a.txt")).await;

        let response = h
            .handle(Request::Search { keyword: "banana".to_string(), workers: Some(-4) })
            .await;
        assert_eq!(response, Response::NoMatches);

        let response = h
            .handle(Request::Search { keyword: "apple".to_string(), workers: Some(100) })
            .await;
        assert_eq!(response.to_string(), "[1]");
    }

    #[tokio::test]
    async fn test_persist_writes_snapshot_when_enabled() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("cache.json");
        let h = handler(dir.path(), 10, 2);
        h.persist(&snapshot).unwrap();
        assert!(snapshot.exists());

        let disabled = handler(dir.path(), 10, 0);
        let other = dir.path().join("other.json");
        disabled.persist(&other).unwrap();
        assert!(!other.exists());
    }
}
