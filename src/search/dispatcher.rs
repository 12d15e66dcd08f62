//! Fan-out/fan-in keyword search
//!
//! Small requests take a single sequential pass. Otherwise the document list
//! is split into shards, each shard is scanned on its own blocking task, and
//! partial results are concatenated in shard order once every task is done.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

use super::scanner;
use super::shard::{partition, SearchShard};
use crate::types::{DocumentId, DocumentRecord, SearchResult};

/// Clamp a requested worker count into `[1, max_workers]`
pub fn clamp_workers(requested: i64, max_workers: usize) -> usize {
    let max_workers = max_workers.max(1);
    if requested < 1 {
        1
    } else {
        usize::try_from(requested).map_or(max_workers, |n| n.min(max_workers))
    }
}

/// One document to scan, resolved against the document folder
#[derive(Debug, Clone)]
struct ScanTarget {
    id: DocumentId,
    path: PathBuf,
}

/// Result of a single search invocation
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub result: SearchResult,
    /// Number of workers actually used (1 for the sequential path)
    pub workers: usize,
    /// Workers that panicked or could not be joined
    pub failed_workers: usize,
    pub elapsed: Duration,
}

/// Runs keyword searches over a snapshot of the catalog
#[derive(Debug, Clone)]
pub struct SearchDispatcher {
    document_root: PathBuf,
    max_workers: usize,
}

impl SearchDispatcher {
    pub fn new(document_root: impl Into<PathBuf>, max_workers: usize) -> Self {
        Self {
            document_root: document_root.into(),
            max_workers: max_workers.max(1),
        }
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Resolve a document's stored path against the document folder
    pub fn resolve(&self, record: &DocumentRecord) -> PathBuf {
        self.document_root.join(&record.path)
    }

    /// Search `documents` for `keyword` using up to `workers` workers.
    pub async fn search(
        &self,
        documents: &[DocumentRecord],
        keyword: &str,
        workers: usize,
    ) -> SearchOutcome {
        let start = Instant::now();
        let workers = workers.clamp(1, self.max_workers);
        let targets: Arc<[ScanTarget]> = documents
            .iter()
            .map(|record| ScanTarget {
                id: record.id,
                path: self.resolve(record),
            })
            .collect();
        let keyword: Arc<str> = Arc::from(keyword);

        let (parts, used, failed) = if workers <= 1 || targets.len() <= 1 {
            let shard = partition(targets.len(), 1)[0];
            let (parts, failed) = run_workers(&targets, &keyword, vec![shard]).await;
            (parts, 1, failed)
        } else {
            // No point spawning workers for empty shards
            let used = workers.min(targets.len());
            let shards = partition(targets.len(), used);
            let (parts, failed) = run_workers(&targets, &keyword, shards).await;
            (parts, used, failed)
        };

        let result = SearchResult::merge(parts);
        let elapsed = start.elapsed();
        debug!(
            "Search '{}' over {} documents with {} workers: {} matches in {:?}",
            keyword,
            targets.len(),
            used,
            result.len(),
            elapsed
        );

        SearchOutcome {
            result,
            workers: used,
            failed_workers: failed,
            elapsed,
        }
    }
}

/// Scan one shard sequentially, keeping shard-local order.
fn scan_shard(targets: &[ScanTarget], shard: SearchShard, keyword: &str) -> Vec<DocumentId> {
    targets[shard.start..shard.end]
        .iter()
        .filter(|target| scanner::file_contains(&target.path, keyword))
        .map(|target| target.id)
        .collect()
}

/// Spawn one blocking task per shard and wait for all of them.
///
/// Returns partial results in shard order; a task that fails to complete
/// contributes an empty part.
async fn run_workers(
    targets: &Arc<[ScanTarget]>,
    keyword: &Arc<str>,
    shards: Vec<SearchShard>,
) -> (Vec<Vec<DocumentId>>, usize) {
    let handles = shards.into_iter().map(|shard| {
        let targets = Arc::clone(targets);
        let keyword = Arc::clone(keyword);
        tokio::task::spawn_blocking(move || scan_shard(&targets, shard, &keyword))
    });

    let mut failed = 0;
    let parts: Vec<Vec<DocumentId>> = join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(i, joined)| match joined {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Search worker {} failed: {}", i, e);
                failed += 1;
                Vec::new()
            }
        })
        .collect();

    (parts, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewDocument;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn corpus(dir: &Path, files: &[(&str, &str)]) -> Vec<DocumentRecord> {
        files
            .iter()
            .enumerate()
            .map(|(i, (name, content))| {
                std::fs::write(dir.join(name), content).unwrap();
                DocumentRecord::new(
                    i as DocumentId + 1,
                    NewDocument::new(*name, "Author", "2000", *name),
                )
            })
            .collect()
    }

    #[test]
    fn test_clamp_workers() {
        assert_eq!(clamp_workers(-3, 8), 1);
        assert_eq!(clamp_workers(0, 8), 1);
        assert_eq!(clamp_workers(5, 8), 5);
        assert_eq!(clamp_workers(50, 8), 8);
        assert_eq!(clamp_workers(i64::MAX, 8), 8);
    }

    #[tokio::test]
    async fn test_apple_scenario() {
        let dir = TempDir::new().unwrap();
        let docs = corpus(
            dir.path(),
            &[
                ("Intro.pdf", "an apple a day\nkeeps it away\n"),
                ("Notes.pdf", "pears only\n"),
            ],
        );
        let dispatcher = SearchDispatcher::new(dir.path(), 8);

        let seq = dispatcher.search(&docs, "apple", 1).await;
        assert_eq!(seq.result.ids(), &[1]);
        assert_eq!(seq.workers, 1);

        let par = dispatcher.search(&docs, "apple", 4).await;
        assert_eq!(par.result.ids(), &[1]);
        assert_eq!(par.workers, 2);

        assert!(dispatcher.search(&docs, "banana", 1).await.result.is_empty());
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_match_set() {
        let dir = TempDir::new().unwrap();
        let files: Vec<(String, String)> = (0..23)
            .map(|i| {
                let body = if i % 3 == 0 { "has keyword\n" } else { "plain\n" };
                (format!("doc{}.txt", i), body.to_string())
            })
            .collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
        let docs = corpus(dir.path(), &refs);
        let dispatcher = SearchDispatcher::new(dir.path(), 8);

        let baseline: BTreeSet<DocumentId> = dispatcher
            .search(&docs, "keyword", 1)
            .await
            .result
            .ids()
            .iter()
            .copied()
            .collect();
        assert_eq!(baseline.len(), 8);

        for workers in 2..=8 {
            let outcome = dispatcher.search(&docs, "keyword", workers).await;
            let set: BTreeSet<DocumentId> = outcome.result.ids().iter().copied().collect();
            assert_eq!(set, baseline, "workers={}", workers);
            assert_eq!(outcome.failed_workers, 0);
        }
    }

    #[tokio::test]
    async fn test_results_follow_index_order_not_id_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "match").unwrap();
        std::fs::write(dir.path().join("b.txt"), "match").unwrap();
        std::fs::write(dir.path().join("c.txt"), "match").unwrap();
        let docs = vec![
            DocumentRecord::new(9, NewDocument::new("a", "x", "2000", "a.txt")),
            DocumentRecord::new(2, NewDocument::new("b", "x", "2000", "b.txt")),
            DocumentRecord::new(5, NewDocument::new("c", "x", "2000", "c.txt")),
        ];
        let dispatcher = SearchDispatcher::new(dir.path(), 8);

        for workers in [1, 2, 3] {
            let outcome = dispatcher.search(&docs, "match", workers).await;
            assert_eq!(outcome.result.ids(), &[9, 2, 5]);
        }
    }

    #[tokio::test]
    async fn test_unreadable_documents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut docs = corpus(dir.path(), &[("present.txt", "apple")]);
        docs.push(DocumentRecord::new(
            2,
            NewDocument::new("gone", "x", "2000", "gone.txt"),
        ));
        let dispatcher = SearchDispatcher::new(dir.path(), 8);

        let outcome = dispatcher.search(&docs, "apple", 2).await;
        assert_eq!(outcome.result.ids(), &[1]);
    }

    #[tokio::test]
    async fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let dispatcher = SearchDispatcher::new(dir.path(), 8);
        let outcome = dispatcher.search(&[], "apple", 4).await;
        assert!(outcome.result.is_empty());
        assert_eq!(outcome.workers, 1);
    }
}
