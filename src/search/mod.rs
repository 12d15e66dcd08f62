//! Keyword search over document files
//!
//! - Contiguous shard partitioning of the catalog
//! - Concurrent per-shard scanning with an order-stable merge
//! - Single-document line counting

mod dispatcher;
mod line_count;
pub mod scanner;
mod shard;

pub use dispatcher::{clamp_workers, SearchDispatcher, SearchOutcome};
pub use line_count::count_lines;
pub use shard::{partition, SearchShard};
