//! pending writes of an index writer.

use std::collections::BTreeMap;

use serde_json::Value;

/// Writes buffered by a writer until `commit()`.
///
/// The last operation on a `(doc_type, key)` pair wins. `None` marks a removal.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    ops: BTreeMap<(String, String), Option<Value>>,
}

impl Batch {
    pub fn put(&mut self, doc_type: &str, key: &str, doc: Value) {
        self.ops.insert((doc_type.to_string(), key.to_string()), Some(doc));
    }

    pub fn remove(&mut self, doc_type: &str, key: &str) {
        self.ops.insert((doc_type.to_string(), key.to_string()), None);
    }

    /// `Some(None)` when the batch removes the document,
    /// `None` when the batch does not touch it.
    pub fn pending(&self, doc_type: &str, key: &str) -> Option<Option<&Value>> {
        self.ops
            .get(&(doc_type.to_string(), key.to_string()))
            .map(Option::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// (puts, removes)
    pub fn counts(&self) -> (usize, usize) {
        let puts = self.ops.values().filter(|op| op.is_some()).count();
        (puts, self.ops.len() - puts)
    }

    pub fn into_ops(self) -> impl Iterator<Item = ((String, String), Option<Value>)> {
        self.ops.into_iter()
    }
}
