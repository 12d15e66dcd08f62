//! In-memory document catalog
//!
//! The catalog has a single owner (the request dispatcher), so it needs no
//! interior locking. Every mutation is flushed to the backing file before
//! it is acknowledged; a failed flush rolls the mutation back.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::persistence;
use crate::types::{DocumentId, DocumentRecord, NewDocument};

/// Errors returned by catalog operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Document {0} not found")]
    NotFound(DocumentId),
    #[error("Index is full ({0} documents)")]
    CapacityExceeded(usize),
    #[error("No document ids left to assign")]
    IdsExhausted,
    #[error("Failed to save index: {0}")]
    Persist(#[from] std::io::Error),
}

/// Catalog of live documents, kept in insertion order
#[derive(Debug)]
pub struct DocumentIndex {
    records: Vec<DocumentRecord>,
    next_id: DocumentId,
    capacity: usize,
    /// Backing file; `None` keeps the catalog purely in memory
    store: Option<PathBuf>,
}

impl DocumentIndex {
    /// Create an empty catalog that is never persisted
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
            capacity,
            store: None,
        }
    }

    /// Open the catalog backed by `path`.
    ///
    /// A missing or unreadable file yields an empty catalog. Malformed lines,
    /// duplicate ids and records beyond `capacity` are dropped.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut index = Self {
            store: Some(path.clone()),
            ..Self::in_memory(capacity)
        };

        let loaded = match persistence::load_file(&path) {
            Ok(loaded) => loaded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No index file at {}, starting empty", path.display());
                return index;
            }
            Err(e) => {
                warn!("Failed to read index file {}: {}. Starting empty", path.display(), e);
                return index;
            }
        };

        if loaded.skipped > 0 {
            warn!("Skipped {} malformed lines in {}", loaded.skipped, path.display());
        }

        for record in loaded.records {
            if index.records.len() >= capacity {
                warn!("Index file holds more than {} documents, ignoring the rest", capacity);
                break;
            }
            if index.position(record.id).is_some() {
                warn!("Duplicate document id {} in index file, keeping the first", record.id);
                continue;
            }
            let Some(after) = record.id.checked_add(1) else {
                warn!("Document id {} is out of range, skipping it", record.id);
                continue;
            };
            index.next_id = index.next_id.max(after);
            index.records.push(record);
        }

        info!("Loaded {} documents from {}", index.records.len(), path.display());
        index
    }

    /// Add a document under the next unused id.
    pub fn add(&mut self, doc: NewDocument) -> Result<DocumentId, IndexError> {
        if self.records.len() >= self.capacity {
            return Err(IndexError::CapacityExceeded(self.capacity));
        }

        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(IndexError::IdsExhausted)?;
        self.records.push(DocumentRecord::new(id, doc));

        if let Err(e) = self.flush() {
            self.records.pop();
            return Err(e.into());
        }

        debug!("Added document {}", id);
        Ok(id)
    }

    /// Look up a document by id
    pub fn query(&self, id: DocumentId) -> Result<&DocumentRecord, IndexError> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .ok_or(IndexError::NotFound(id))
    }

    /// Remove a document. Surviving documents keep their ids.
    pub fn remove(&mut self, id: DocumentId) -> Result<DocumentRecord, IndexError> {
        let pos = self.position(id).ok_or(IndexError::NotFound(id))?;
        let removed = self.records.remove(pos);

        if let Err(e) = self.flush() {
            self.records.insert(pos, removed);
            return Err(e.into());
        }

        debug!("Removed document {}", id);
        Ok(removed)
    }

    /// Live documents in storage order
    pub fn list(&self) -> &[DocumentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id the next successful add will receive
    pub fn next_id(&self) -> DocumentId {
        self.next_id
    }

    /// Write the full live set to the backing file, if any.
    pub fn save(&self) -> std::io::Result<()> {
        self.flush()
    }

    fn flush(&self) -> std::io::Result<()> {
        match &self.store {
            Some(path) => persistence::save_file(path, &self.records),
            None => Ok(()),
        }
    }

    fn position(&self, id: DocumentId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}
