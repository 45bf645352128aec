//! Branch records as stored in the index.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::branch::path::BranchPath;
use crate::clock::Timestamp;
use crate::index::Document;

/// Lifecycle state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    Active,
    /// the parent was rebased underneath this branch
    Stale,
    Deleted,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchState::Active => "ACTIVE",
            BranchState::Stale => "STALE",
            BranchState::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// One completed rebase: at `timestamp` the base moved from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rebase {
    pub timestamp: Timestamp,
    pub from: Timestamp,
    pub to: Timestamp,
}

/// A merge received by a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePoint {
    pub source: BranchPath,
    /// head of the source branch that was merged
    pub source_timestamp: Timestamp,
    /// timestamp of the merge commit on the receiving branch
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionBranch {
    pub path: BranchPath,
    pub parent_path: Option<BranchPath>,
    pub base_timestamp: Timestamp,
    pub head_timestamp: Timestamp,
    pub state: BranchState,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub rebases: Vec<Rebase>,
    #[serde(default)]
    pub merge_sources: Vec<MergePoint>,
    /// Revisions on this path created at or before this timestamp belong to
    /// an earlier, deleted branch of the same name.
    #[serde(default)]
    pub segment_start: Timestamp,
    /// bumped on every write of the branch document
    #[serde(default)]
    pub version: u64,
}

impl RevisionBranch {
    /// `MAIN` with base and head at zero
    pub fn root() -> Self {
        Self {
            path: BranchPath::main(),
            parent_path: None,
            base_timestamp: 0,
            head_timestamp: 0,
            state: BranchState::Active,
            metadata: BTreeMap::new(),
            rebases: Vec::new(),
            merge_sources: Vec::new(),
            segment_start: 0,
            version: 0,
        }
    }

    /// a new branch forked from `parent` at its current head
    pub fn fork(parent: &RevisionBranch, path: BranchPath, metadata: BTreeMap<String, Value>) -> Self {
        Self {
            path,
            parent_path: Some(parent.path.clone()),
            base_timestamp: parent.head_timestamp,
            head_timestamp: parent.head_timestamp,
            state: BranchState::Active,
            metadata,
            rebases: Vec::new(),
            merge_sources: Vec::new(),
            segment_start: 0,
            version: 0,
        }
    }

    /// A fresh branch at the path of the deleted branch `previous`.
    ///
    /// Nothing written by `previous` is visible on the new branch.
    pub fn reopen(
        previous: &RevisionBranch,
        parent: &RevisionBranch,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        let mut branch = Self::fork(parent, previous.path.clone(), metadata);
        branch.segment_start = previous.head_timestamp.max(previous.segment_start);
        branch.version = previous.version;
        branch
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn is_root(&self) -> bool {
        self.parent_path.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.state == BranchState::Active
    }

    pub fn is_stale(&self) -> bool {
        self.state == BranchState::Stale
    }

    pub fn is_deleted(&self) -> bool {
        self.state == BranchState::Deleted
    }

    /// The base timestamp that was in effect at time `at`.
    ///
    /// Reads before a rebase keep seeing the parent as it was before the
    /// rebase moved the base forward.
    pub fn base_at(&self, at: Timestamp) -> Timestamp {
        match self.rebases.iter().rev().find(|r| r.timestamp <= at) {
            Some(rebase) => rebase.to,
            None => self
                .rebases
                .first()
                .map_or(self.base_timestamp, |first| first.from),
        }
    }

    /// most recent merge this branch received from `source`
    pub fn last_merge_from(&self, source: &BranchPath) -> Option<&MergePoint> {
        self.merge_sources
            .iter()
            .filter(|m| &m.source == source)
            .max_by_key(|m| m.timestamp)
    }
}

impl Document for RevisionBranch {
    const TYPE: &'static str = "branch";

    fn doc_key(&self) -> String {
        self.path.to_string()
    }
}

/// How two branches relate since their merge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Divergence {
    /// no changes on either side
    UpToDate,
    /// only the first branch has changes
    Forward,
    /// only the second branch has changes
    Behind,
    /// both sides have changes
    Diverged,
}

impl Divergence {
    pub(crate) fn from_changes(left_changed: bool, right_changed: bool) -> Self {
        match (left_changed, right_changed) {
            (false, false) => Divergence::UpToDate,
            (true, false) => Divergence::Forward,
            (false, true) => Divergence::Behind,
            (true, true) => Divergence::Diverged,
        }
    }
}
