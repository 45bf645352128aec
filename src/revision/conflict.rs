//! Conflict reports for commits, merges and rebases.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::revision::model::{RevisionId, RevisionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// the staged base revision is no longer the visible one
    StaleBase,
    AddedInSourceAndTarget,
    ChangedInSourceAndTarget,
    ChangedInSourceRemovedInTarget,
    RemovedInSourceChangedInTarget,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictKind::StaleBase => "stale base revision",
            ConflictKind::AddedInSourceAndTarget => "added in source and target",
            ConflictKind::ChangedInSourceAndTarget => "changed in source and target",
            ConflictKind::ChangedInSourceRemovedInTarget => "changed in source, removed in target",
            ConflictKind::RemovedInSourceChangedInTarget => "removed in source, changed in target",
        };
        f.write_str(text)
    }
}

/// One offending key, with the revision the operation expected and the one
/// it actually found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub key: RevisionKey,
    pub kind: ConflictKind,
    pub expected: Option<RevisionId>,
    pub actual: Option<RevisionId>,
}

impl Conflict {
    pub fn new(key: RevisionKey, kind: ConflictKind) -> Self {
        Self {
            key,
            kind,
            expected: None,
            actual: None,
        }
    }

    pub fn expected(mut self, id: Option<RevisionId>) -> Self {
        self.expected = id;
        self
    }

    pub fn actual(mut self, id: Option<RevisionId>) -> Self {
        self.actual = id;
        self
    }
}

fn id_or_none(id: &Option<RevisionId>) -> String {
    id.as_ref().map_or_else(|| "none".to_string(), |id| id.to_string())
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.kind)?;
        if self.expected.is_some() || self.actual.is_some() {
            write!(
                f,
                " expected {}, found {}",
                id_or_none(&self.expected),
                id_or_none(&self.actual)
            )?;
        }
        Ok(())
    }
}
