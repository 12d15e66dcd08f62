//! Core types for the document catalog

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::truncate_str;

/// Unique identifier for a document. Assigned from 1 upwards, never reused.
pub type DocumentId = u32;

/// Maximum stored title length in bytes
pub const MAX_TITLE: usize = 200;
/// Maximum stored authors length in bytes
pub const MAX_AUTHORS: usize = 200;
/// Maximum stored year length in bytes
pub const MAX_YEAR: usize = 4;
/// Maximum stored path length in bytes
pub const MAX_PATH: usize = 64;

// ============================================================================
// Documents
// ============================================================================

/// Metadata supplied when adding a document, before an id is assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub authors: String,
    pub year: String,
    /// Path relative to the configured document folder
    pub path: String,
}

impl NewDocument {
    pub fn new(
        title: impl Into<String>,
        authors: impl Into<String>,
        year: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            authors: authors.into(),
            year: year.into(),
            path: path.into(),
        }
    }
}

/// A live catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub title: String,
    pub authors: String,
    pub year: String,
    pub path: String,
}

impl DocumentRecord {
    /// Build a record, truncating every field to its bound.
    pub fn new(id: DocumentId, doc: NewDocument) -> Self {
        Self {
            id,
            title: truncate_str(&doc.title, MAX_TITLE),
            authors: truncate_str(&doc.authors, MAX_AUTHORS),
            year: truncate_str(&doc.year, MAX_YEAR),
            path: truncate_str(&doc.path, MAX_PATH),
        }
    }
}

impl fmt::Display for DocumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Title: {}\nAuthors: {}\nYear: {}\nPath: {}",
            self.title, self.authors, self.year, self.path
        )
    }
}

// ============================================================================
// Search Results
// ============================================================================

/// Ids of documents that matched a keyword search.
///
/// Ordered by shard, then by position in the index at scan time. The order is
/// part of the wire contract and is never re-sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    ids: Vec<DocumentId>,
}

impl SearchResult {
    pub fn new(ids: Vec<DocumentId>) -> Self {
        Self { ids }
    }

    /// Concatenate partial results in the order given
    pub fn merge(parts: impl IntoIterator<Item = Vec<DocumentId>>) -> Self {
        Self {
            ids: parts.into_iter().flatten().collect(),
        }
    }

    pub fn ids(&self) -> &[DocumentId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str("]")
    }
}
