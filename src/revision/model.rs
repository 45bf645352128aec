//! Revision and commit records.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::branch::BranchPath;
use crate::clock::Timestamp;
use crate::index::Document;

/// Identity of a logical object across all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionKey {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
}

impl RevisionKey {
    /// Longest `{type}:{id}` (type escaped) that fits a revision's index key
    /// next to a branch path of `BranchPath::MAX_LEN`.
    pub const MAX_LEN: usize = 230;

    pub fn new(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: id.into(),
        }
    }

    /// `{type}:{id}` with `%` and `:` escaped in the type, so the first `:`
    /// always ends the type
    fn storage_prefix(&self) -> String {
        let doc_type = self.doc_type.replace('%', "%25").replace(':', "%3A");
        format!("{}:{}", doc_type, self.id)
    }

    /// Reason this key cannot be stored, if any.
    pub(crate) fn invalid_reason(&self) -> Option<&'static str> {
        if self.doc_type.is_empty() || self.id.is_empty() {
            return Some("type and id must not be empty");
        }
        if self.storage_prefix().len() > Self::MAX_LEN {
            return Some("type and id are too long");
        }
        None
    }
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_type, self.id)
    }
}

/// Identity of one version: the segment it lives on and when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId {
    pub branch: BranchPath,
    pub created: Timestamp,
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.created)
    }
}

/// One immutable version of a stored object.
///
/// Visible on its own segment from `created` (inclusive) until `revised`
/// (exclusive); `revised` is `None` while the version is current. A
/// tombstone marks the object removed on that segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
    pub branch_path: BranchPath,
    pub created: Timestamp,
    pub revised: Option<Timestamp>,
    #[serde(default)]
    pub tombstone: bool,
    #[serde(default)]
    pub payload: Value,
}

impl Revision {
    pub fn key(&self) -> RevisionKey {
        RevisionKey::new(self.doc_type.clone(), self.id.clone())
    }

    pub fn revision_id(&self) -> RevisionId {
        RevisionId {
            branch: self.branch_path.clone(),
            created: self.created,
        }
    }

    pub fn is_current(&self) -> bool {
        self.revised.is_none()
    }

    pub fn is_visible_at(&self, at: Timestamp) -> bool {
        self.created <= at && self.revised.map_or(true, |revised| revised > at)
    }

    /// index key of a version: `{type}:{id}@{branch}@{created}`
    pub(crate) fn storage_key(key: &RevisionKey, branch: &BranchPath, created: Timestamp) -> String {
        format!("{}@{}@{:020}", key.storage_prefix(), branch, created)
    }
}

impl Document for Revision {
    const TYPE: &'static str = "revision";

    fn doc_key(&self) -> String {
        Self::storage_key(&self.key(), &self.branch_path, self.created)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    New,
    Changed,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::New => "NEW",
            ChangeKind::Changed => "CHANGED",
            ChangeKind::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// A top-level payload field that differs between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub name: String,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

/// Field-by-field difference of two payloads.
///
/// Non-object payloads are compared as a whole and reported under an empty
/// property name.
pub fn diff_properties(before: &Value, after: &Value) -> Vec<PropertyChange> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
            names
                .into_iter()
                .filter(|name| old.get(*name) != new.get(*name))
                .map(|name| PropertyChange {
                    name: name.clone(),
                    from: old.get(name).cloned(),
                    to: new.get(name).cloned(),
                })
                .collect()
        }
        _ if before == after => Vec::new(),
        _ => vec![PropertyChange {
            name: String::new(),
            from: Some(before.clone()),
            to: Some(after.clone()),
        }],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitChange {
    pub key: RevisionKey,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyChange>,
}

/// Where a merge commit took its changes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSource {
    pub path: BranchPath,
    pub timestamp: Timestamp,
}

/// An atomic, timestamped batch of changes applied to one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub branch_path: BranchPath,
    pub timestamp: Timestamp,
    pub previous_timestamp: Timestamp,
    pub author: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_source: Option<MergeSource>,
    pub changes: Vec<CommitChange>,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.merge_source.is_some()
    }

    /// first line of the comment
    pub fn summary(&self) -> &str {
        self.comment.lines().next().unwrap_or(&self.comment)
    }

    pub fn change(&self, key: &RevisionKey) -> Option<&CommitChange> {
        self.changes.iter().find(|c| &c.key == key)
    }
}

impl Document for Commit {
    const TYPE: &'static str = "commit";

    fn doc_key(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revision(created: Timestamp, revised: Option<Timestamp>) -> Revision {
        Revision {
            doc_type: "concept".into(),
            id: "X".into(),
            branch_path: BranchPath::main(),
            created,
            revised,
            tombstone: false,
            payload: json!({"v": 1}),
        }
    }

    #[test]
    fn test_visibility_interval() {
        let closed = revision(10, Some(20));
        assert!(!closed.is_visible_at(9));
        assert!(closed.is_visible_at(10));
        assert!(closed.is_visible_at(19));
        assert!(!closed.is_visible_at(20));
        assert!(revision(10, None).is_visible_at(u64::MAX));
    }

    #[test]
    fn test_storage_key_orders_by_created() {
        let early = revision(9, None).doc_key();
        let late = revision(10, None).doc_key();
        assert_eq!(early, "concept:X@MAIN@00000000000000000009");
        assert!(early < late);
    }

    #[test]
    fn test_storage_key_separates_type_from_id() {
        let main = BranchPath::main();
        let a = Revision::storage_key(&RevisionKey::new("a:b", "c"), &main, 1);
        let b = Revision::storage_key(&RevisionKey::new("a", "b:c"), &main, 1);
        assert_ne!(a, b);
        assert!(a.starts_with("a%3Ab:c@"));

        assert_eq!(RevisionKey::new("concept", "1").invalid_reason(), None);
        assert!(RevisionKey::new("", "1").invalid_reason().is_some());
        assert!(RevisionKey::new("concept", "x".repeat(300)).invalid_reason().is_some());
    }

    #[test]
    fn test_revision_document_shape() {
        let value = serde_json::to_value(revision(10, None)).unwrap();
        assert_eq!(value["type"], json!("concept"));
        assert_eq!(value["branchPath"], json!("MAIN"));
        assert_eq!(value["revised"], Value::Null);
    }

    #[test]
    fn test_diff_properties() {
        let changes = diff_properties(
            &json!({"a": 1, "b": 2, "c": 3}),
            &json!({"a": 1, "b": 5, "d": 4}),
        );
        let names: Vec<_> = changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
        assert_eq!(changes[1].to, None);
        assert_eq!(changes[2].from, None);

        assert!(diff_properties(&json!(1), &json!(1)).is_empty());
        assert_eq!(diff_properties(&json!(1), &json!(2))[0].name, "");
    }
}
