//! Configuration for the docindex daemon and client

mod logging;
mod server;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use server::{CacheConfig, IndexConfig, SearchConfig, ServerConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hard ceiling for `search.max_workers`
pub const WORKER_LIMIT: usize = 64;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon process configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Document index configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Keyword search configuration
    #[serde(default)]
    pub search: SearchConfig,
    /// Search result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration fields.
    ///
    /// Every problem is collected and reported in a single error.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.request_channel.as_os_str().is_empty() {
            errors.push("request_channel must not be empty".to_string());
        }
        if self.server.reply_dir.as_os_str().is_empty() {
            errors.push("reply_dir must not be empty".to_string());
        }
        if self.server.document_folder.as_os_str().is_empty() {
            errors.push("document_folder must not be empty".to_string());
        }

        if self.index.file.as_os_str().is_empty() {
            errors.push("index file must not be empty".to_string());
        }
        if self.index.capacity == 0 {
            errors.push("index capacity must be positive".to_string());
        }

        if self.search.max_workers == 0 {
            errors.push("max_workers must be positive".to_string());
        }
        if self.search.max_workers > WORKER_LIMIT {
            errors.push(format!("max_workers must be <= {}", WORKER_LIMIT));
        }
        if self.search.default_workers == 0 {
            errors.push("default_workers must be positive".to_string());
        }
        if self.search.default_workers > self.search.max_workers {
            errors.push("default_workers must not exceed max_workers".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
