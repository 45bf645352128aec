//! Merge/Rebase Engine.
//!
//! Both operations are commits produced by the commit pipeline while the
//! branch being written to is locked:
//! - merge folds the changes a source branch made since the merge base into
//!   the target branch
//! - rebase moves a branch's base forward in its parent's history, resolving
//!   keys both sides touched in between
//!
//! Keys changed on both sides go through a [`ConflictProcessor`]; anything it
//! cannot reconcile fails the whole operation with a `Conflict`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::branch::{BranchPath, Divergence, RevisionBranching};
use crate::clock::Timestamp;
use crate::error::{RevisionError, RevisionResult};
use crate::revision::conflict::{Conflict, ConflictKind};
use crate::revision::model::{Commit, Revision, RevisionKey};
use crate::revision::pipeline::{CommitOptions, CommitPipeline, CommitPlan};
use crate::revision::resolve::{RevisionChange, RevisionResolver};
use crate::revision::staging::StagedChange;
use crate::revision::view::BranchView;

/// Reconciles a key both sides changed.
///
/// Returns the payload to keep, or `None` when the two versions conflict.
pub trait ConflictProcessor: Send + Sync + fmt::Debug {
    fn merge(&self, key: &RevisionKey, base: Option<&Value>, source: &Value, target: &Value) -> Option<Value>;
}

/// Accepts a key changed on both sides only when both payloads are equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictEquality;

impl ConflictProcessor for StrictEquality {
    fn merge(&self, _key: &RevisionKey, _base: Option<&Value>, source: &Value, target: &Value) -> Option<Value> {
        (source == target).then(|| source.clone())
    }
}

/// Three-way merge of top-level payload properties.
///
/// A property changed on one side only takes that side's value; a property
/// changed on both sides must end up equal. Non-object payloads fall back to
/// plain equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyMerge;

impl ConflictProcessor for PropertyMerge {
    fn merge(&self, key: &RevisionKey, base: Option<&Value>, source: &Value, target: &Value) -> Option<Value> {
        let empty = Map::new();
        let base = match base {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return StrictEquality.merge(key, base, source, target),
        };
        let (Value::Object(ours), Value::Object(theirs)) = (source, target) else {
            return StrictEquality.merge(key, None, source, target);
        };

        let names: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
        let mut merged = Map::new();
        for name in names {
            let (b, s, t) = (base.get(name), ours.get(name), theirs.get(name));
            let value = if s == t || s == b {
                t
            } else if t == b {
                s
            } else {
                return None;
            };
            if let Some(value) = value {
                merged.insert(name.clone(), value.clone());
            }
        }
        Some(Value::Object(merged))
    }
}

/// Parameters of one merge.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source: BranchPath,
    pub target: BranchPath,
    pub author: Option<String>,
    pub comment: Option<String>,
    /// keys left out of the merge
    pub exclusions: BTreeSet<RevisionKey>,
    /// overrides the engine's conflict processor
    pub processor: Option<Arc<dyn ConflictProcessor>>,
    pub timeout: Option<Duration>,
}

impl MergeRequest {
    pub fn new(source: BranchPath, target: BranchPath) -> Self {
        Self {
            source,
            target,
            author: None,
            comment: None,
            exclusions: BTreeSet::new(),
            processor: None,
            timeout: None,
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn exclude(mut self, key: RevisionKey) -> Self {
        self.exclusions.insert(key);
        self
    }

    pub fn processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Parameters of one rebase.
#[derive(Debug, Clone)]
pub struct RebaseRequest {
    pub branch: BranchPath,
    /// new base timestamp; defaults to the parent's head
    pub onto: Option<Timestamp>,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub processor: Option<Arc<dyn ConflictProcessor>>,
    pub timeout: Option<Duration>,
}

impl RebaseRequest {
    pub fn new(branch: BranchPath) -> Self {
        Self {
            branch,
            onto: None,
            author: None,
            comment: None,
            processor: None,
            timeout: None,
        }
    }

    pub fn onto(mut self, timestamp: Timestamp) -> Self {
        self.onto = Some(timestamp);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
pub struct MergeEngine {
    pipeline: CommitPipeline,
    default_author: String,
    processor: Arc<dyn ConflictProcessor>,
}

impl MergeEngine {
    pub fn new(pipeline: CommitPipeline, default_author: impl Into<String>) -> Self {
        Self {
            pipeline,
            default_author: default_author.into(),
            processor: Arc::new(StrictEquality),
        }
    }

    /// Use `processor` for requests that do not bring their own.
    pub fn with_processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    fn branching(&self) -> &RevisionBranching {
        self.pipeline.branching()
    }

    fn resolver(&self) -> &RevisionResolver {
        self.pipeline.resolver()
    }

    /// The snapshot both branches last agreed on.
    ///
    /// Candidates are the fork point of the closest common ancestor and the
    /// most recent merge in either direction; the latest one wins.
    pub fn merge_base(&self, left: &BranchPath, right: &BranchPath) -> RevisionResult<BranchView> {
        let left_chain = self.branching().ancestry_chain(left)?;
        let right_chain = self.branching().ancestry_chain(right)?;
        let left_view = BranchView::new(&left_chain, None)
            .ok_or_else(|| RevisionError::BranchNotFound(left.clone()))?;
        let right_view = BranchView::new(&right_chain, None)
            .ok_or_else(|| RevisionError::BranchNotFound(right.clone()))?;

        let common = left_chain
            .iter()
            .find(|b| right_view.bound_for(&b.path).is_some())
            .map(|b| b.path.clone())
            .ok_or_else(|| RevisionError::Internal(format!("{} and {} share no ancestor", left, right)))?;
        let fork = match (left_view.bound_for(&common), right_view.bound_for(&common)) {
            (Some(a), Some(b)) => a.min(b),
            _ => return Err(RevisionError::Internal(format!("no bound for {}", common))),
        };

        // (rank, branch, as_of)
        let mut best = (fork, common, fork);
        let (left_branch, right_branch) = (&left_chain[0], &right_chain[0]);
        if let Some(point) = right_branch.last_merge_from(left) {
            if point.timestamp > best.0 {
                best = (point.timestamp, left.clone(), point.source_timestamp);
            }
        }
        if let Some(point) = left_branch.last_merge_from(right) {
            if point.source_timestamp > best.0 {
                best = (point.source_timestamp, right.clone(), point.source_timestamp);
            }
        }

        let (_, path, as_of) = best;
        self.resolver().view(&path, Some(as_of))
    }

    /// How `left` and `right` relate since their merge base.
    pub fn divergence(&self, left: &BranchPath, right: &BranchPath) -> RevisionResult<Divergence> {
        let base = self.merge_base(left, right)?;
        let changed = |path: &BranchPath| -> RevisionResult<bool> {
            let view = self.resolver().view(path, None)?;
            Ok(self
                .resolver()
                .compare(&base, &view)?
                .iter()
                .any(RevisionChange::changes_payload))
        };
        Ok(Divergence::from_changes(changed(left)?, changed(right)?))
    }

    /// Merge `request.source` into `request.target`.
    ///
    /// Returns `None` when the target already has everything the source
    /// changed since the merge base.
    pub fn merge(&self, request: MergeRequest) -> RevisionResult<Option<Commit>> {
        let MergeRequest {
            source,
            target,
            author,
            comment,
            exclusions,
            processor,
            timeout,
        } = request;
        if source == target {
            return Err(RevisionError::bad_request(format!("cannot merge {} into itself", source)));
        }
        let processor = processor.unwrap_or_else(|| self.processor.clone());
        let timeout = timeout.unwrap_or_else(|| self.pipeline.default_timeout());
        let started = Instant::now();
        let _lock = self.branching().lock(&target, timeout)?;

        let source_branch = self.branching().get(&source)?;
        let target_branch = self.branching().get(&target)?;
        for branch in [&source_branch, &target_branch] {
            if branch.is_deleted() {
                return Err(RevisionError::BranchDeleted(branch.path.clone()));
            }
        }

        let base = self.merge_base(&source, &target)?;
        let source_view = self.resolver().view(&source, None)?;
        let target_view = self.resolver().view(&target, None)?;

        let source_changes: Vec<RevisionChange> = self
            .resolver()
            .compare(&base, &source_view)?
            .into_iter()
            .filter(|c| c.changes_payload() && !exclusions.contains(&c.key))
            .collect();
        if source_changes.is_empty() {
            debug!(target: "revstore::merge", source = %source, target = %target, "nothing to merge");
            return Ok(None);
        }
        let target_changes = payload_changes(self.resolver().compare(&base, &target_view)?);

        let mut staged = BTreeMap::new();
        let mut conflicts = Vec::new();
        for change in source_changes {
            let key = change.key.clone();
            match target_changes.get(&key) {
                Some(theirs) => match (&change.after, &theirs.after) {
                    (None, None) => {}
                    (Some(ours), Some(current)) => {
                        let base_payload = change.before.as_ref().map(|r| &r.payload);
                        match processor.merge(&key, base_payload, &ours.payload, &current.payload) {
                            Some(payload) if payload == current.payload => {}
                            Some(payload) => {
                                staged.insert(
                                    key,
                                    StagedChange::Changed {
                                        expected: current.revision_id(),
                                        payload,
                                    },
                                );
                            }
                            None => {
                                let kind = if change.before.is_none() {
                                    ConflictKind::AddedInSourceAndTarget
                                } else {
                                    ConflictKind::ChangedInSourceAndTarget
                                };
                                conflicts.push(both_sides(key, kind, &change.after, &theirs.after));
                            }
                        }
                    }
                    (Some(_), None) => conflicts.push(both_sides(
                        key,
                        ConflictKind::ChangedInSourceRemovedInTarget,
                        &change.after,
                        &theirs.after,
                    )),
                    (None, Some(_)) => conflicts.push(both_sides(
                        key,
                        ConflictKind::RemovedInSourceChangedInTarget,
                        &change.after,
                        &theirs.after,
                    )),
                },
                None => {
                    let current = self.resolver().resolve(&target_view, &key)?;
                    if let Some(staged_change) = apply_onto(change.after.as_ref(), current.as_ref()) {
                        staged.insert(key, staged_change);
                    }
                }
            }
        }

        if !conflicts.is_empty() {
            info!(
                target: "revstore::merge",
                source = %source,
                target = %target,
                conflicts = conflicts.len(),
                "merge conflict"
            );
            return Err(RevisionError::Conflict { conflicts });
        }
        if staged.is_empty() {
            debug!(target: "revstore::merge", source = %source, target = %target, "target already up to date");
            return Ok(None);
        }

        let comment = comment.unwrap_or_else(|| format!("Merge {} into {}", source, target));
        let options = CommitOptions {
            author: author.unwrap_or_else(|| self.default_author.clone()),
            comment,
            timestamp: None,
            timeout: Some(timeout),
        };
        let mut plan = CommitPlan::new(target.clone(), staged, options);
        plan.merge_from = Some((source.clone(), source_branch.head_timestamp));
        let commit = self.pipeline.commit_locked(plan, started)?;

        info!(
            target: "revstore::merge",
            source = %source,
            target = %target,
            commit = %commit.id,
            changes = commit.changes.len(),
            "merged"
        );
        Ok(Some(commit))
    }

    /// Move the base of `request.branch` forward in its parent's history.
    ///
    /// Returns `None` when the branch is active and already at the requested
    /// base. A rebase that applies no resolved changes still records a commit.
    pub fn rebase(&self, request: RebaseRequest) -> RevisionResult<Option<Commit>> {
        let RebaseRequest {
            branch: path,
            onto,
            author,
            comment,
            processor,
            timeout,
        } = request;
        if path.is_root() {
            return Err(RevisionError::bad_request("the root branch cannot be rebased"));
        }
        let processor = processor.unwrap_or_else(|| self.processor.clone());
        let timeout = timeout.unwrap_or_else(|| self.pipeline.default_timeout());
        let started = Instant::now();
        let _lock = self.branching().lock(&path, timeout)?;
        let _children = self.branching().lock_children(&path, timeout)?;

        let branch = self.branching().get(&path)?;
        if branch.is_deleted() {
            return Err(RevisionError::BranchDeleted(path));
        }
        let parent_path = branch
            .parent_path
            .clone()
            .ok_or_else(|| RevisionError::Internal(format!("{} has no parent", path)))?;
        let parent = self.branching().get(&parent_path)?;
        if parent.is_deleted() {
            return Err(RevisionError::BranchDeleted(parent_path));
        }

        let new_base = onto.unwrap_or(parent.head_timestamp);
        if new_base < branch.base_timestamp || new_base > parent.head_timestamp {
            return Err(RevisionError::bad_request(format!(
                "cannot rebase {} onto {}: must lie between {} and {}",
                path, new_base, branch.base_timestamp, parent.head_timestamp
            )));
        }
        if new_base == branch.base_timestamp && branch.is_active() {
            debug!(target: "revstore::merge", branch = %path, base = new_base, "already at base");
            return Ok(None);
        }

        // parent changes merged into the branch since its base are already
        // part of it; diff both sides from the latest merged parent head
        let synced = branch
            .last_merge_from(&parent_path)
            .map_or(branch.base_timestamp, |m| m.source_timestamp.max(branch.base_timestamp))
            .min(new_base);
        let old_parent = self.resolver().view(&parent_path, Some(synced))?;
        let new_parent = self.resolver().view(&parent_path, Some(new_base))?;
        let local = self.resolver().view(&path, None)?;

        let parent_changes = payload_changes(self.resolver().compare(&old_parent, &new_parent)?);
        let local_changes = payload_changes(self.resolver().compare(&old_parent, &local)?);

        let mut staged = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (key, theirs) in &parent_changes {
            if local_changes.contains_key(key) {
                continue;
            }
            // untouched locally, but a merged copy on the branch would hide
            // the parent's newer version after the rebase
            let found = self
                .branching()
                .index()
                .read(|r| self.resolver().lookup(r, &local, key))?;
            let Some(own) = found.filter(|rev| rev.branch_path == path) else {
                continue;
            };
            let visible = Some(&own).filter(|rev| !rev.tombstone);
            if let Some(change) = apply_onto(theirs.after.as_ref(), visible) {
                staged.insert(key.clone(), change);
            }
        }

        for (key, mine) in local_changes {
            let Some(theirs) = parent_changes.get(&key) else {
                continue;
            };
            match (&theirs.after, &mine.after) {
                (None, None) => {}
                (Some(incoming), Some(own)) => {
                    let base_payload = mine.before.as_ref().map(|r| &r.payload);
                    match processor.merge(&key, base_payload, &incoming.payload, &own.payload) {
                        Some(payload) if payload == own.payload => {}
                        Some(payload) => {
                            staged.insert(
                                key,
                                StagedChange::Changed {
                                    expected: own.revision_id(),
                                    payload,
                                },
                            );
                        }
                        None => {
                            let kind = if mine.before.is_none() {
                                ConflictKind::AddedInSourceAndTarget
                            } else {
                                ConflictKind::ChangedInSourceAndTarget
                            };
                            conflicts.push(both_sides(key, kind, &theirs.after, &mine.after));
                        }
                    }
                }
                (Some(_), None) => conflicts.push(both_sides(
                    key,
                    ConflictKind::ChangedInSourceRemovedInTarget,
                    &theirs.after,
                    &mine.after,
                )),
                (None, Some(_)) => conflicts.push(both_sides(
                    key,
                    ConflictKind::RemovedInSourceChangedInTarget,
                    &theirs.after,
                    &mine.after,
                )),
            }
        }
        if !conflicts.is_empty() {
            info!(
                target: "revstore::merge",
                branch = %path,
                onto = new_base,
                conflicts = conflicts.len(),
                "rebase conflict"
            );
            return Err(RevisionError::Conflict { conflicts });
        }

        let comment = comment.unwrap_or_else(|| format!("Rebase {} onto {}", path, new_base));
        let options = CommitOptions {
            author: author.unwrap_or_else(|| self.default_author.clone()),
            comment,
            timestamp: None,
            timeout: Some(timeout),
        };
        let mut plan = CommitPlan::new(path.clone(), staged, options);
        plan.rebase_to = Some(new_base);
        plan.allow_empty = true;
        let commit = self.pipeline.commit_locked(plan, started)?;

        info!(
            target: "revstore::merge",
            branch = %path,
            from = branch.base_timestamp,
            onto = new_base,
            commit = %commit.id,
            "rebased"
        );
        Ok(Some(commit))
    }
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("default_author", &self.default_author)
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

fn payload_changes(changes: Vec<RevisionChange>) -> BTreeMap<RevisionKey, RevisionChange> {
    changes
        .into_iter()
        .filter(RevisionChange::changes_payload)
        .map(|c| (c.key.clone(), c))
        .collect()
}

fn both_sides(key: RevisionKey, kind: ConflictKind, source: &Option<Revision>, target: &Option<Revision>) -> Conflict {
    Conflict::new(key, kind)
        .expected(source.as_ref().map(Revision::revision_id))
        .actual(target.as_ref().map(Revision::revision_id))
}

/// The staged change that makes the target match `wanted`.
fn apply_onto(wanted: Option<&Revision>, current: Option<&Revision>) -> Option<StagedChange> {
    match (wanted, current) {
        (None, None) => None,
        (Some(rev), None) => Some(StagedChange::New {
            payload: rev.payload.clone(),
        }),
        (Some(rev), Some(cur)) if rev.payload == cur.payload => None,
        (Some(rev), Some(cur)) => Some(StagedChange::Changed {
            expected: cur.revision_id(),
            payload: rev.payload.clone(),
        }),
        (None, Some(cur)) => Some(StagedChange::Removed {
            expected: cur.revision_id(),
        }),
    }
}
