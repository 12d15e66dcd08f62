//! Server, index, search and cache configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Well-known FIFO every client writes requests into
    pub request_channel: PathBuf,
    /// Directory where clients create their private reply FIFOs
    pub reply_dir: PathBuf,
    /// Directory holding the PID lock file
    pub data_dir: PathBuf,
    /// Root folder that document paths are relative to
    pub document_folder: PathBuf,
    /// How long to wait for a client to open its reply FIFO (0 = forever)
    pub reply_timeout_ms: u64,
}

impl ServerConfig {
    /// Reply delivery timeout, `None` when waiting indefinitely
    pub fn reply_timeout(&self) -> Option<Duration> {
        match self.reply_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_channel: PathBuf::from("/tmp/dserver_fifo"),
            reply_dir: PathBuf::from("/tmp"),
            data_dir: PathBuf::from("."),
            document_folder: PathBuf::from("documents"),
            reply_timeout_ms: 5000,
        }
    }
}

/// Document index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Flat file the catalog is persisted to
    pub file: PathBuf,
    /// Maximum number of live documents
    pub capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("meta_data.txt"),
            capacity: 100,
        }
    }
}

/// Keyword search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on concurrent shard workers per search
    pub max_workers: usize,
    /// Worker count used when a request does not name one
    pub default_workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            default_workers: 1,
        }
    }
}

/// Search result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached searches (0 disables the cache)
    pub capacity: usize,
    /// Where the cache snapshot is written on shutdown
    pub snapshot_file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            snapshot_file: PathBuf::from("cache_snapshot.json"),
        }
    }
}
