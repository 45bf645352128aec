//! document index layer for revstore
//!
//! The revision core stores everything (branches, commits, revisions) as
//! opaque JSON documents in a `DocumentIndex`. This module defines that
//! boundary and ships two backends. The upper layers only use the traits
//! below and never touch git2 or the in-memory maps directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Index                               │
//! │        (scoped read(fn) / write(fn) over any backend)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │ MemoryIndex │               │  GitIndex   │
//!        │ (BTreeMaps) │               │ (git2 repo) │
//!        └─────────────┘               └─────────────┘
//!                                             │
//!                       ┌─────────────┬───────┴─────┬─────────────┐
//!                       ▼             ▼             ▼             ▼
//!                 ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐
//!                 │   tree   │  │   blob   │  │  commit  │  │   refs   │
//!                 │ (types)  │  │  (docs)  │  │(batches) │  │  (CAS)   │
//!                 └──────────┘  └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use revstore::index::{Index, MemoryIndex, Query, Filter};
//!
//! let index = Index::new(MemoryIndex::new());
//!
//! // writes are buffered and flushed atomically when the closure succeeds
//! index.write(|w| w.put("branch", "MAIN", json!({"path": "MAIN"})))?;
//!
//! let hits = index.read(|r| r.search(&Query::new("branch").filter(Filter::prefix("path", "MAIN"))))?;
//! ```

mod batch;
mod blob;
mod commit;
pub mod document;
mod error;
mod git;
mod memory;
mod query;
mod refs;
mod tree;
mod types;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use document::Document;
pub use error::{IndexError, IndexResult};
pub use git::{GitIndex, IndexStats};
pub use memory::MemoryIndex;
pub use query::{Filter, Hit, Query, Sort};
pub use types::{DocKey, DocPath, DocType, InvalidNameError};

/// Read-only access to committed documents.
pub trait IndexReader {
    /// point lookup
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>>;

    /// all documents of `query.doc_type` matching every filter
    fn search(&self, query: &Query) -> IndexResult<Vec<Hit>>;
}

/// A write batch. Nothing is visible to readers until `commit()`;
/// dropping the writer discards the batch.
pub trait IndexWriter {
    /// point lookup that sees this batch's own pending writes
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>>;

    fn put(&mut self, doc_type: &str, key: &str, doc: Value) -> IndexResult<()>;

    /// removing an absent document is not an error
    fn remove(&mut self, doc_type: &str, key: &str) -> IndexResult<()>;

    /// durably apply the whole batch, all or nothing
    fn commit(self: Box<Self>) -> IndexResult<()>;
}

/// A pluggable document store.
///
/// Writers are exclusive: opening a writer blocks until the previous one is
/// committed or dropped. Readers never wait for a writer's batch.
pub trait DocumentIndex: Send + Sync {
    fn reader(&self) -> IndexResult<Box<dyn IndexReader + '_>>;

    fn writer(&self) -> IndexResult<Box<dyn IndexWriter + '_>>;
}

/// Shared handle to a document index.
#[derive(Clone)]
pub struct Index {
    inner: Arc<dyn DocumentIndex>,
}

impl Index {
    pub fn new(index: impl DocumentIndex + 'static) -> Self {
        Self {
            inner: Arc::new(index),
        }
    }

    /// Execute a function with read access to the index.
    pub fn read<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn IndexReader) -> Result<T, E>,
        E: From<IndexError>,
    {
        let reader = self.inner.reader()?;
        f(&*reader)
    }

    /// Execute a function with a write batch.
    ///
    /// The batch is committed if the function returns `Ok`, and discarded
    /// otherwise.
    pub fn write<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn IndexWriter) -> Result<T, E>,
        E: From<IndexError>,
    {
        let mut writer = self.inner.writer()?;
        let value = f(&mut *writer)?;
        writer.commit()?;
        Ok(value)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_commits_on_ok() {
        let index = Index::new(MemoryIndex::new());
        index
            .write(|w| w.put("branch", "MAIN", json!({"path": "MAIN"})))
            .unwrap();

        let doc = index.read(|r| r.get("branch", "MAIN")).unwrap();
        assert_eq!(doc, Some(json!({"path": "MAIN"})));
    }

    #[test]
    fn test_write_discards_on_error() {
        let index = Index::new(MemoryIndex::new());
        let result: IndexResult<()> = index.write(|w| {
            w.put("branch", "MAIN", json!({"path": "MAIN"}))?;
            Err(IndexError::Internal("boom".to_string()))
        });
        assert!(result.is_err());

        let doc = index.read(|r| r.get("branch", "MAIN")).unwrap();
        assert!(doc.is_none());
    }
}
