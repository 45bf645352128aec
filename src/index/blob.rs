//!  Blob operations for document storage.
//!
//! Each document is stored as a separate JSON file with a small envelope:
//! the `_key` field repeats the document key so that a blob can be checked
//! against the file name it was found under.
//!
//! ```text
//! {
//!   "_key": "MAIN/a",
//!   "path": "MAIN/a",
//!   "parentPath": "MAIN",
//!   ...
//! }
//! ```

use std::collections::BTreeMap;

use git2::{Oid, Repository};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::error::{IndexError, IndexResult};
use crate::index::types::DocPath;

const KEY_FIELD: &str = "_key";

/// internal format for JSON serialization
#[derive(Serialize, Deserialize)]
struct DocumentJson {
    #[serde(rename = "_key")]
    key: String,
    #[serde(flatten)]
    body: BTreeMap<String, Value>,
}

/// serialize a document to JSON bytes
///
/// uses BTreeMap for consistent key ordering (identical documents share a blob)
pub fn encode_document(path: &DocPath, doc: Value) -> IndexResult<Vec<u8>> {
    let body: BTreeMap<String, Value> = match doc {
        Value::Object(map) => map.into_iter().collect(),
        _ => {
            return Err(IndexError::NotAnObject {
                path: path.to_string(),
            })
        }
    };

    if body.contains_key(KEY_FIELD) {
        return Err(IndexError::ReservedField {
            path: path.to_string(),
            field: KEY_FIELD,
        });
    }

    let json = DocumentJson {
        key: path.key.as_str().to_string(),
        body,
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize a document from JSON bytes
///
/// validates that the key in the JSON matches the key the blob was found under
pub fn decode_document(bytes: &[u8], path: &DocPath) -> IndexResult<Value> {
    let json: DocumentJson = serde_json::from_slice(bytes)?;

    if json.key != path.key.as_str() {
        return Err(IndexError::corrupted(
            path,
            format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                path.key, json.key
            ),
        ));
    }

    Ok(Value::Object(json.body.into_iter().collect()))
}

pub fn write_blob(repo: &Repository, bytes: &[u8]) -> IndexResult<Oid> {
    Ok(repo.blob(bytes)?)
}

pub fn read_blob(repo: &Repository, id: Oid) -> IndexResult<Vec<u8>> {
    let blob = repo.find_blob(id)?;
    Ok(blob.content().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn path(key: &str) -> DocPath {
        DocPath::new("branch", key).unwrap()
    }

    #[test]
    fn test_envelope_carries_key() {
        let bytes = encode_document(&path("MAIN/a"), json!({"state": "ACTIVE"})).unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["_key"], json!("MAIN/a"));

        let doc = decode_document(&bytes, &path("MAIN/a")).unwrap();
        assert_eq!(doc, json!({"state": "ACTIVE"}));
    }

    #[test]
    fn test_key_mismatch_detected() {
        let bytes = encode_document(&path("MAIN/a"), json!({})).unwrap();
        let result = decode_document(&bytes, &path("MAIN/b"));
        assert!(matches!(result, Err(IndexError::CorruptedData { .. })));
    }

    #[test]
    fn test_rejects_non_objects_and_reserved_field() {
        assert!(matches!(
            encode_document(&path("MAIN"), json!([1, 2])),
            Err(IndexError::NotAnObject { .. })
        ));
        assert!(matches!(
            encode_document(&path("MAIN"), json!({"_key": "x"})),
            Err(IndexError::ReservedField { .. })
        ));
    }

    #[test]
    fn test_identical_documents_share_a_blob() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let a = encode_document(&path("MAIN"), json!({"b": 1, "a": 2})).unwrap();
        let b = encode_document(&path("MAIN"), json!({"a": 2, "b": 1})).unwrap();
        let id_a = write_blob(&repo, &a).unwrap();
        let id_b = write_blob(&repo, &b).unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(read_blob(&repo, id_a).unwrap(), a);
    }
}
