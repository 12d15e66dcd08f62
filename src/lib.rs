//! docindex: Local Document Catalog Daemon
//!
//! A single-process catalog of document metadata served over named pipes:
//! - Bounded, id-keyed document index persisted to a flat file
//! - Fixed-size request envelopes on one shared FIFO, replies on per-client FIFOs
//! - Parallel sharded keyword search with order-stable merging
//! - Per-document matching line counts
//! - Optional search result cache

pub mod cache;
pub mod client;
pub mod config;
pub mod daemon;
pub mod index;
pub mod search;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
