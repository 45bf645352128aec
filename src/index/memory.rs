//! In-memory document index.
//!
//! Documents live in nested `BTreeMap`s guarded by a `parking_lot` lock. A
//! writer buffers its batch and applies it under a single write lock, so
//! readers observe either none or all of a batch.

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;

use crate::index::batch::Batch;
use crate::index::error::IndexResult;
use crate::index::query::{self, Hit, Query};
use crate::index::types::DocPath;
use crate::index::{DocumentIndex, IndexReader, IndexWriter};

type Documents = BTreeMap<String, BTreeMap<String, Value>>;

/// Volatile index, the default backend for tests and embedded use.
#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<Documents>,
    write_lock: Mutex<()>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of stored documents of one type
    pub fn count(&self, doc_type: &str) -> usize {
        self.docs.read().get(doc_type).map_or(0, BTreeMap::len)
    }

    fn get_committed(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        DocPath::new(doc_type, key)?;
        Ok(self
            .docs
            .read()
            .get(doc_type)
            .and_then(|docs| docs.get(key))
            .cloned())
    }
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let docs = self.docs.read();
        f.debug_struct("MemoryIndex")
            .field("doc_types", &docs.len())
            .field("documents", &docs.values().map(BTreeMap::len).sum::<usize>())
            .finish()
    }
}

impl DocumentIndex for MemoryIndex {
    fn reader(&self) -> IndexResult<Box<dyn IndexReader + '_>> {
        Ok(Box::new(MemoryReader { index: self }))
    }

    fn writer(&self) -> IndexResult<Box<dyn IndexWriter + '_>> {
        Ok(Box::new(MemoryWriter {
            _guard: self.write_lock.lock(),
            index: self,
            batch: Batch::default(),
        }))
    }
}

struct MemoryReader<'a> {
    index: &'a MemoryIndex,
}

impl IndexReader for MemoryReader<'_> {
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        self.index.get_committed(doc_type, key)
    }

    fn search(&self, query: &Query) -> IndexResult<Vec<Hit>> {
        let docs = self.index.docs.read();
        let candidates = docs
            .get(&query.doc_type)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, doc)| query.matches(doc))
            .map(|(key, doc)| (key.clone(), doc.clone()));
        Ok(query::execute(query, candidates))
    }
}

struct MemoryWriter<'a> {
    _guard: MutexGuard<'a, ()>,
    index: &'a MemoryIndex,
    batch: Batch,
}

impl IndexWriter for MemoryWriter<'_> {
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        match self.batch.pending(doc_type, key) {
            Some(pending) => Ok(pending.cloned()),
            None => self.index.get_committed(doc_type, key),
        }
    }

    fn put(&mut self, doc_type: &str, key: &str, doc: Value) -> IndexResult<()> {
        DocPath::new(doc_type, key)?;
        self.batch.put(doc_type, key, doc);
        Ok(())
    }

    fn remove(&mut self, doc_type: &str, key: &str) -> IndexResult<()> {
        DocPath::new(doc_type, key)?;
        self.batch.remove(doc_type, key);
        Ok(())
    }

    fn commit(self: Box<Self>) -> IndexResult<()> {
        let MemoryWriter { _guard, index, batch } = *self;
        if batch.is_empty() {
            return Ok(());
        }

        let mut docs = index.docs.write();
        for ((doc_type, key), op) in batch.into_ops() {
            match op {
                Some(doc) => {
                    docs.entry(doc_type).or_default().insert(key, doc);
                }
                None => {
                    if let Some(typed) = docs.get_mut(&doc_type) {
                        typed.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
