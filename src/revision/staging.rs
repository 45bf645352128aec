//! Staging Area: pending changes for one branch.
//!
//! Staging is purely in memory. Nothing is validated against the branch
//! until commit time; dropping a staging area discards it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::branch::BranchPath;
use crate::error::{RevisionError, RevisionResult};
use crate::revision::conflict::{Conflict, ConflictKind};
use crate::revision::model::{ChangeKind, Commit, Revision, RevisionId, RevisionKey};
use crate::revision::pipeline::{CommitOptions, CommitPipeline, CommitPlan};

/// One staged change and the revision it was based on.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    New { payload: Value },
    Changed { expected: RevisionId, payload: Value },
    Removed { expected: RevisionId },
}

impl StagedChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            StagedChange::New { .. } => ChangeKind::New,
            StagedChange::Changed { .. } => ChangeKind::Changed,
            StagedChange::Removed { .. } => ChangeKind::Removed,
        }
    }

    /// payload written by this change; `None` for removals
    pub fn payload(&self) -> Option<&Value> {
        match self {
            StagedChange::New { payload } | StagedChange::Changed { payload, .. } => Some(payload),
            StagedChange::Removed { .. } => None,
        }
    }

    pub fn expected(&self) -> Option<&RevisionId> {
        match self {
            StagedChange::New { .. } => None,
            StagedChange::Changed { expected, .. } | StagedChange::Removed { expected } => Some(expected),
        }
    }

    /// Compare-and-swap check against the revision currently visible for
    /// `key`: new keys must still be absent, changed and removed keys must
    /// still resolve to the revision they were staged against.
    pub fn check(&self, key: &RevisionKey, current: Option<&Revision>) -> Result<(), Conflict> {
        let actual = current.map(Revision::revision_id);
        if actual.as_ref() == self.expected() {
            return Ok(());
        }
        Err(Conflict::new(key.clone(), ConflictKind::StaleBase)
            .expected(self.expected().cloned())
            .actual(actual))
    }
}

/// Accumulates changes for one target branch and commits them as one unit.
#[derive(Debug)]
pub struct StagingArea {
    pipeline: CommitPipeline,
    branch: BranchPath,
    changes: BTreeMap<RevisionKey, StagedChange>,
}

impl StagingArea {
    pub(crate) fn new(pipeline: CommitPipeline, branch: BranchPath) -> Self {
        Self {
            pipeline,
            branch,
            changes: BTreeMap::new(),
        }
    }

    pub fn branch(&self) -> &BranchPath {
        &self.branch
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, key: &RevisionKey) -> Option<&StagedChange> {
        self.changes.get(key)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&RevisionKey, &StagedChange)> {
        self.changes.iter()
    }

    fn stage(&mut self, key: RevisionKey, change: StagedChange) -> RevisionResult<()> {
        if let Some(reason) = key.invalid_reason() {
            return Err(RevisionError::bad_request(format!("invalid key '{}': {}", key, reason)));
        }
        if self.changes.contains_key(&key) {
            return Err(RevisionError::AlreadyStaged(key));
        }
        self.changes.insert(key, change);
        Ok(())
    }

    /// Stage an object that must not exist on the branch yet.
    pub fn stage_new(&mut self, key: RevisionKey, payload: Value) -> RevisionResult<()> {
        self.stage(key, StagedChange::New { payload })
    }

    /// Stage a new payload for the object `old` was read from.
    pub fn stage_change(&mut self, old: &Revision, payload: Value) -> RevisionResult<()> {
        self.stage(
            old.key(),
            StagedChange::Changed {
                expected: old.revision_id(),
                payload,
            },
        )
    }

    /// Stage the removal of the object `old` was read from.
    pub fn stage_remove(&mut self, old: &Revision) -> RevisionResult<()> {
        self.stage(
            old.key(),
            StagedChange::Removed {
                expected: old.revision_id(),
            },
        )
    }

    /// Drop a staged change. Returns whether the key was staged.
    pub fn unstage(&mut self, key: &RevisionKey) -> bool {
        self.changes.remove(key).is_some()
    }

    pub fn commit(self, author: impl Into<String>, comment: impl Into<String>) -> RevisionResult<Commit> {
        self.commit_with(CommitOptions::new(author, comment))
    }

    pub fn commit_with(self, options: CommitOptions) -> RevisionResult<Commit> {
        let StagingArea {
            pipeline,
            branch,
            changes,
        } = self;
        pipeline.commit(CommitPlan::new(branch, changes, options))
    }
}
