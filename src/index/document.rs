//! typed documents on top of the untyped index API.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::index::error::{IndexError, IndexResult};
use crate::index::query::Query;
use crate::index::{IndexReader, IndexWriter};

/// A record stored in the index under a fixed document type.
pub trait Document: Serialize + DeserializeOwned {
    /// document type all records of this kind are stored under
    const TYPE: &'static str;

    /// key of this record within its document type
    fn doc_key(&self) -> String;
}

fn decode<D: Document>(key: &str, doc: Value) -> IndexResult<D> {
    serde_json::from_value(doc).map_err(|e| {
        IndexError::corrupted(format!("{}/{}", D::TYPE, key), e.to_string())
    })
}

/// read one document through a reader
pub fn read<D: Document>(reader: &dyn IndexReader, key: &str) -> IndexResult<Option<D>> {
    reader
        .get(D::TYPE, key)?
        .map(|doc| decode(key, doc))
        .transpose()
}

/// read one document through a writer, seeing its pending writes
pub fn read_pending<D: Document>(writer: &dyn IndexWriter, key: &str) -> IndexResult<Option<D>> {
    writer
        .get(D::TYPE, key)?
        .map(|doc| decode(key, doc))
        .transpose()
}

/// run a query and decode every hit; the query's document type is replaced with `D::TYPE`
pub fn search<D: Document>(reader: &dyn IndexReader, mut query: Query) -> IndexResult<Vec<D>> {
    query.doc_type = D::TYPE.to_string();
    reader
        .search(&query)?
        .into_iter()
        .map(|hit| decode(&hit.key, hit.doc))
        .collect()
}

/// stage a document for writing
pub fn write<D: Document>(writer: &mut dyn IndexWriter, doc: &D) -> IndexResult<()> {
    let value = serde_json::to_value(doc)?;
    writer.put(D::TYPE, &doc.doc_key(), value)
}
