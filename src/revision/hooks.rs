//! Commit hooks.
//!
//! Pre-commit hooks run in registration order while the target branch is
//! locked and may veto the commit by returning an error. Post-commit hooks
//! run once the commit is durable; their errors are logged and otherwise
//! ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::branch::BranchPath;
use crate::error::RevisionResult;
use crate::revision::model::{Commit, RevisionKey};
use crate::revision::staging::StagedChange;

/// The change set a pre-commit hook gets to inspect.
#[derive(Debug, Clone, Copy)]
pub struct PendingCommit<'a> {
    pub branch: &'a BranchPath,
    pub author: &'a str,
    pub comment: &'a str,
    pub changes: &'a BTreeMap<RevisionKey, StagedChange>,
}

impl PendingCommit<'_> {
    pub fn keys(&self) -> impl Iterator<Item = &RevisionKey> {
        self.changes.keys()
    }

    /// staged changes for one document type
    pub fn of_type<'s>(&'s self, doc_type: &'s str) -> impl Iterator<Item = (&'s RevisionKey, &'s StagedChange)> + 's {
        self.changes.iter().filter(move |(key, _)| key.doc_type == doc_type)
    }
}

pub trait PreCommitHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before_commit(&self, pending: &PendingCommit<'_>) -> RevisionResult<()>;
}

impl<F> PreCommitHook for F
where
    F: Fn(&PendingCommit<'_>) -> RevisionResult<()> + Send + Sync,
{
    fn before_commit(&self, pending: &PendingCommit<'_>) -> RevisionResult<()> {
        self(pending)
    }
}

pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn after_commit(&self, commit: &Commit) -> RevisionResult<()>;
}

impl<F> PostCommitHook for F
where
    F: Fn(&Commit) -> RevisionResult<()> + Send + Sync,
{
    fn after_commit(&self, commit: &Commit) -> RevisionResult<()> {
        self(commit)
    }
}

/// Registered hooks, in registration order.
#[derive(Default)]
pub struct Hooks {
    pre: RwLock<Vec<Arc<dyn PreCommitHook>>>,
    post: RwLock<Vec<Arc<dyn PostCommitHook>>>,
}

impl Hooks {
    pub fn add_pre_commit(&self, hook: impl PreCommitHook + 'static) {
        self.pre.write().push(Arc::new(hook));
    }

    pub fn add_post_commit(&self, hook: impl PostCommitHook + 'static) {
        self.post.write().push(Arc::new(hook));
    }

    /// first error aborts
    pub(crate) fn run_pre_commit(&self, pending: &PendingCommit<'_>) -> RevisionResult<()> {
        let hooks = self.pre.read().clone();
        for hook in hooks {
            hook.before_commit(pending)?;
        }
        Ok(())
    }

    pub(crate) fn run_post_commit(&self, commit: &Commit) {
        let hooks = self.post.read().clone();
        for hook in hooks {
            if let Err(e) = hook.after_commit(commit) {
                warn!(
                    target: "revstore::commit",
                    hook = hook.name(),
                    commit = %commit.id,
                    error = %e,
                    "post-commit hook failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_commit", &self.pre.read().len())
            .field("post_commit", &self.post.read().len())
            .finish()
    }
}
