//! Commit Pipeline: turns a staged change set into one atomic commit.
//!
//! A commit runs with the target branch locked:
//!
//! 1. branch checks (exists, not deleted, not stale)
//! 2. compare-and-swap of every staged key against the branch head
//! 3. pre-commit hooks
//! 4. timestamp assignment
//! 5. one index batch: close superseded revisions, write new revisions,
//!    write the commit document, advance the branch head
//!
//! Any failure before the batch commits leaves the index untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use ulid::Ulid;

use crate::branch::{BranchPath, HeadUpdate, RevisionBranching};
use crate::clock::{Timestamp, TimestampSource};
use crate::error::{RevisionError, RevisionResult};
use crate::index::{document, Index};
use crate::revision::hooks::{Hooks, PendingCommit};
use crate::revision::model::{
    diff_properties, Commit, CommitChange, MergeSource, Revision, RevisionKey,
};
use crate::revision::resolve::RevisionResolver;
use crate::revision::staging::{StagedChange, StagingArea};

/// Caller-controlled settings of one commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub author: String,
    pub comment: String,
    /// explicit commit timestamp; must be later than every issued timestamp
    pub timestamp: Option<Timestamp>,
    /// overrides the store's commit timeout
    pub timeout: Option<Duration>,
}

impl CommitOptions {
    pub fn new(author: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            comment: comment.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Everything the pipeline needs to apply one commit.
#[derive(Debug)]
pub(crate) struct CommitPlan {
    pub branch: BranchPath,
    pub changes: BTreeMap<RevisionKey, StagedChange>,
    pub options: CommitOptions,
    pub rebase_to: Option<Timestamp>,
    pub merge_from: Option<(BranchPath, Timestamp)>,
    pub allow_empty: bool,
}

impl CommitPlan {
    pub fn new(branch: BranchPath, changes: BTreeMap<RevisionKey, StagedChange>, options: CommitOptions) -> Self {
        Self {
            branch,
            changes,
            options,
            rebase_to: None,
            merge_from: None,
            allow_empty: false,
        }
    }
}

/// What the compare-and-swap pass found for the staged keys.
struct Validated {
    /// own-segment revisions to close at the commit timestamp
    closing: Vec<Revision>,
    /// visible revision per key before the commit
    before: HashMap<RevisionKey, Revision>,
}

#[derive(Clone)]
pub struct CommitPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    index: Index,
    branching: RevisionBranching,
    resolver: RevisionResolver,
    clock: Arc<dyn TimestampSource>,
    hooks: Hooks,
    default_timeout: Duration,
}

impl CommitPipeline {
    pub fn new(
        index: Index,
        branching: RevisionBranching,
        clock: Arc<dyn TimestampSource>,
        default_timeout: Duration,
    ) -> Self {
        let resolver = RevisionResolver::new(index.clone(), branching.clone());
        Self {
            inner: Arc::new(PipelineInner {
                index,
                branching,
                resolver,
                clock,
                hooks: Hooks::default(),
                default_timeout,
            }),
        }
    }

    pub fn branching(&self) -> &RevisionBranching {
        &self.inner.branching
    }

    pub fn resolver(&self) -> &RevisionResolver {
        &self.inner.resolver
    }

    pub fn clock(&self) -> &Arc<dyn TimestampSource> {
        &self.inner.clock
    }

    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Open a staging area for `path`.
    pub fn staging(&self, path: &BranchPath) -> RevisionResult<StagingArea> {
        self.inner.branching.get(path)?;
        Ok(StagingArea::new(self.clone(), path.clone()))
    }

    /// Lock the target branch and apply `plan`.
    pub(crate) fn commit(&self, plan: CommitPlan) -> RevisionResult<Commit> {
        let started = Instant::now();
        let timeout = plan.options.timeout.unwrap_or(self.inner.default_timeout);
        let _lock = self.inner.branching.lock(&plan.branch, timeout)?;
        self.commit_locked(plan, started)
    }

    /// Apply `plan`; the caller holds the lock on `plan.branch`.
    pub(crate) fn commit_locked(&self, plan: CommitPlan, started: Instant) -> RevisionResult<Commit> {
        let CommitPlan {
            branch: path,
            changes,
            options,
            rebase_to,
            merge_from,
            allow_empty,
        } = plan;
        let timeout = options.timeout.unwrap_or(self.inner.default_timeout);

        let branch = self.inner.branching.get(&path)?;
        if branch.is_deleted() {
            return Err(RevisionError::BranchDeleted(path));
        }
        if branch.is_stale() && rebase_to.is_none() {
            return Err(RevisionError::BranchStale(path));
        }
        if changes.is_empty() && !allow_empty {
            return Err(RevisionError::bad_request(format!("nothing staged for {}", path)));
        }

        let validated = self.validate(&path, &changes)?;

        self.inner.hooks.run_pre_commit(&PendingCommit {
            branch: &path,
            author: &options.author,
            comment: &options.comment,
            changes: &changes,
        })?;

        let timestamp = self.assign_timestamp(options.timestamp)?;

        let elapsed = started.elapsed();
        if elapsed > timeout {
            return Err(RevisionError::Timeout {
                what: format!("commit on {}", path),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let commit = Commit {
            id: Ulid::new().to_string().to_lowercase(),
            branch_path: path.clone(),
            timestamp,
            previous_timestamp: branch.head_timestamp,
            author: options.author,
            comment: options.comment,
            created_at: Utc::now(),
            merge_source: merge_from.as_ref().map(|(source, at)| MergeSource {
                path: source.clone(),
                timestamp: *at,
            }),
            changes: commit_changes(&changes, &validated.before),
        };
        let update = HeadUpdate {
            expected_head: branch.head_timestamp,
            timestamp,
            rebase_to,
            merge_from,
        };

        let updated = self.inner.index.write(|w| {
            for rev in &validated.closing {
                let mut closed = rev.clone();
                closed.revised = Some(timestamp);
                document::write(w, &closed)?;
            }
            for (key, change) in &changes {
                let rev = Revision {
                    doc_type: key.doc_type.clone(),
                    id: key.id.clone(),
                    branch_path: path.clone(),
                    created: timestamp,
                    revised: None,
                    tombstone: change.payload().is_none(),
                    payload: change.payload().cloned().unwrap_or(Value::Null),
                };
                document::write(w, &rev)?;
            }
            document::write(w, &commit)?;
            self.inner.branching.stage_update(w, &path, &update)
        })?;
        self.inner.branching.publish(updated);

        info!(
            target: "revstore::commit",
            branch = %path,
            commit = %commit.id,
            timestamp,
            changes = commit.changes.len(),
            "committed"
        );
        self.inner.hooks.run_post_commit(&commit);
        Ok(commit)
    }

    /// Compare-and-swap every staged key against the current branch head.
    fn validate(
        &self,
        path: &BranchPath,
        changes: &BTreeMap<RevisionKey, StagedChange>,
    ) -> RevisionResult<Validated> {
        let view = self.inner.resolver.view(path, None)?;
        self.inner.index.read(|r| {
            let mut conflicts = Vec::new();
            let mut validated = Validated {
                closing: Vec::new(),
                before: HashMap::new(),
            };

            for (key, change) in changes {
                let found = self.inner.resolver.lookup(r, &view, key)?;
                let visible = found.as_ref().filter(|rev| !rev.tombstone);
                if let Err(conflict) = change.check(key, visible) {
                    conflicts.push(conflict);
                    continue;
                }
                if let Some(rev) = visible {
                    validated.before.insert(key.clone(), rev.clone());
                }
                // tombstones on the branch's own segment are closed as well
                if let Some(rev) = found.filter(|rev| &rev.branch_path == path) {
                    validated.closing.push(rev);
                }
            }

            if !conflicts.is_empty() {
                debug!(
                    target: "revstore::commit",
                    branch = %path,
                    conflicts = conflicts.len(),
                    "commit rejected"
                );
                return Err(RevisionError::Conflict { conflicts });
            }
            Ok(validated)
        })
    }

    fn assign_timestamp(&self, requested: Option<Timestamp>) -> RevisionResult<Timestamp> {
        let clock = &self.inner.clock;
        match requested {
            Some(timestamp) => {
                if !clock.claim(timestamp) {
                    return Err(RevisionError::bad_request(format!(
                        "commit timestamp {} is not after {}",
                        timestamp,
                        clock.current()
                    )));
                }
                Ok(timestamp)
            }
            None => Ok(clock.next()),
        }
    }
}

fn commit_changes(
    changes: &BTreeMap<RevisionKey, StagedChange>,
    before: &HashMap<RevisionKey, Revision>,
) -> Vec<CommitChange> {
    changes
        .iter()
        .map(|(key, change)| {
            let properties = match (change, before.get(key)) {
                (StagedChange::Changed { payload, .. }, Some(old)) => diff_properties(&old.payload, payload),
                _ => Vec::new(),
            };
            CommitChange {
                key: key.clone(),
                kind: change.kind(),
                properties,
            }
        })
        .collect()
}

impl std::fmt::Debug for CommitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitPipeline")
            .field("hooks", &self.inner.hooks)
            .field("default_timeout", &self.inner.default_timeout)
            .finish_non_exhaustive()
    }
}
