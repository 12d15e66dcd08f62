//! Shard partitioning for concurrent search

/// A contiguous range `[start, end)` of the document list scanned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchShard {
    /// Position of this shard in the merge order
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl SearchShard {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `[0, total)` into `workers` contiguous shards.
///
/// The first `total % workers` shards get one extra document. A worker count
/// of zero is treated as one. When `workers > total` the trailing shards are
/// empty.
pub fn partition(total: usize, workers: usize) -> Vec<SearchShard> {
    let workers = workers.max(1);
    let base = total / workers;
    let extra = total % workers;

    let mut shards = Vec::with_capacity(workers);
    let mut start = 0;
    for index in 0..workers {
        let len = base + usize::from(index < extra);
        shards.push(SearchShard {
            index,
            start,
            end: start + len,
        });
        start += len;
    }
    shards
}
