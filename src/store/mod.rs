//! Revision store API - high-level interface for revstore.
//!
//! `RevisionStore` wires the layers together (index, branching, resolver,
//! commit pipeline, merge engine, history) and takes branch paths as plain
//! strings.
//!
//! # Example
//!
//! ```no_run
//! use revstore::{RevisionKey, RevisionStore};
//! use serde_json::json;
//!
//! let store = RevisionStore::open("./my_store").unwrap();
//! let task = store.create_branch("MAIN", "task-1", Default::default()).unwrap();
//!
//! let mut staging = store.staging(task.path.as_str()).unwrap();
//! staging.stage_new(RevisionKey::new("concept", "123"), json!({"term": "heart"})).unwrap();
//! staging.commit("alice", "add heart").unwrap();
//!
//! store.merge_branches("MAIN/task-1", "MAIN", "alice").unwrap();
//! ```

mod config;

pub use config::{IndexBackend, StoreConfig};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::branch::{BranchListener, BranchPath, Divergence, RevisionBranch, RevisionBranching};
use crate::clock::{MonotonicClock, Timestamp, TimestampSource};
use crate::error::{RevisionError, RevisionResult};
use crate::index::{GitIndex, Index, IndexStats, MemoryIndex};
use crate::revision::{
    BranchView, Commit, CommitHistory, CommitPipeline, CommitQuery, Hooks, MergeEngine, MergeRequest,
    RebaseRequest, Revision, RevisionChange, RevisionKey, RevisionQuery, RevisionResolver, StagingArea,
};

/// The main store handle.
#[derive(Clone)]
pub struct RevisionStore {
    config: StoreConfig,
    index: Index,
    git: Option<GitIndex>,
    pipeline: CommitPipeline,
    merges: MergeEngine,
    history: CommitHistory,
}

impl RevisionStore {
    /// Open or create a git-backed store at the given path.
    pub fn open(path: impl AsRef<Path>) -> RevisionResult<Self> {
        Self::open_with_config(StoreConfig::new(path.as_ref()))
    }

    /// Open or create a store with custom configuration.
    pub fn open_with_config(config: StoreConfig) -> RevisionResult<Self> {
        match config.backend {
            IndexBackend::Memory => Self::with_index(Index::new(MemoryIndex::new()), None, config),
            IndexBackend::Git => {
                let git = if config.create_if_missing {
                    GitIndex::open_or_init(&config.path)?
                } else if config.path.exists() {
                    GitIndex::open(&config.path)?
                } else {
                    return Err(RevisionError::StoreNotFound(config.path.clone()));
                };
                Self::with_index(Index::new(git.clone()), Some(git), config)
            }
        }
    }

    /// Create a new in-memory store.
    pub fn in_memory() -> RevisionResult<Self> {
        Self::open_with_config(StoreConfig::memory())
    }

    /// Build a store on top of an arbitrary document index.
    pub fn with_index(index: Index, git: Option<GitIndex>, config: StoreConfig) -> RevisionResult<Self> {
        let branching = RevisionBranching::open(index.clone(), config.commit_timeout)?;

        let clock: Arc<dyn TimestampSource> = match &config.clock {
            Some(clock) => clock.clone(),
            None => Arc::new(MonotonicClock::new()),
        };
        clock.observe(branching.store().max_timestamp());

        let pipeline = CommitPipeline::new(index.clone(), branching.clone(), clock, config.commit_timeout);
        let merges = MergeEngine::new(pipeline.clone(), config.default_author.clone());
        let history = CommitHistory::new(index.clone());

        info!(
            target: "revstore::store",
            backend = %config.backend,
            branches = branching.branches().len(),
            "opened store"
        );
        Ok(Self {
            config,
            index,
            git,
            pipeline,
            merges,
            history,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn branching(&self) -> &RevisionBranching {
        self.pipeline.branching()
    }

    pub fn resolver(&self) -> &RevisionResolver {
        self.pipeline.resolver()
    }

    pub fn pipeline(&self) -> &CommitPipeline {
        &self.pipeline
    }

    pub fn merge_engine(&self) -> &MergeEngine {
        &self.merges
    }

    /// Registered commit hooks.
    pub fn hooks(&self) -> &Hooks {
        self.pipeline.hooks()
    }

    /// Get index statistics (git backend only).
    pub fn stats(&self) -> RevisionResult<Option<IndexStats>> {
        match &self.git {
            Some(git) => Ok(Some(git.stats()?)),
            None => Ok(None),
        }
    }

    // ==================== Branches ====================

    pub fn create_branch(
        &self,
        parent: &str,
        name: &str,
        metadata: BTreeMap<String, Value>,
    ) -> RevisionResult<RevisionBranch> {
        self.branching().create(&BranchPath::new(parent)?, name, metadata)
    }

    pub fn branch(&self, path: &str) -> RevisionResult<RevisionBranch> {
        self.branching().get(&BranchPath::new(path)?)
    }

    /// List all branches, deleted ones included.
    pub fn branches(&self) -> Vec<RevisionBranch> {
        self.branching().branches()
    }

    pub fn children(&self, path: &str) -> RevisionResult<Vec<RevisionBranch>> {
        self.branching().children(&BranchPath::new(path)?)
    }

    pub fn delete_branch(&self, path: &str) -> RevisionResult<()> {
        self.branching().delete(&BranchPath::new(path)?)
    }

    pub fn update_metadata(&self, path: &str, metadata: BTreeMap<String, Value>) -> RevisionResult<RevisionBranch> {
        self.branching().update_metadata(&BranchPath::new(path)?, metadata)
    }

    /// How `left` relates to `right` since their merge base.
    pub fn branch_state(&self, left: &str, right: &str) -> RevisionResult<Divergence> {
        self.merges
            .divergence(&BranchPath::new(left)?, &BranchPath::new(right)?)
    }

    pub fn add_listener(&self, listener: impl BranchListener + 'static) {
        self.branching().add_listener(listener);
    }

    // ==================== Reads ====================

    /// View of a branch as of `as_of` (default: its head).
    pub fn view(&self, branch: &str, as_of: Option<Timestamp>) -> RevisionResult<BranchView> {
        self.resolver().view(&BranchPath::new(branch)?, as_of)
    }

    /// The visible revision of `key`, or `None` when absent or removed.
    pub fn resolve(&self, branch: &str, key: &RevisionKey, as_of: Option<Timestamp>) -> RevisionResult<Option<Revision>> {
        let view = self.view(branch, as_of)?;
        self.resolver().resolve(&view, key)
    }

    /// Like [`resolve`](Self::resolve), but fails with `NotFound`.
    pub fn get(&self, branch: &str, key: &RevisionKey, as_of: Option<Timestamp>) -> RevisionResult<Revision> {
        let view = self.view(branch, as_of)?;
        self.resolver().get(&view, key)
    }

    pub fn search(&self, branch: &str, query: &RevisionQuery, as_of: Option<Timestamp>) -> RevisionResult<Vec<Revision>> {
        let view = self.view(branch, as_of)?;
        self.resolver().search(&view, query)
    }

    /// Keys whose visible revision differs between two views.
    pub fn compare(&self, base: &BranchView, compare: &BranchView) -> RevisionResult<Vec<RevisionChange>> {
        self.resolver().compare(base, compare)
    }

    // ==================== Writes ====================

    /// Open a staging area on `branch`.
    pub fn staging(&self, branch: &str) -> RevisionResult<StagingArea> {
        self.pipeline.staging(&BranchPath::new(branch)?)
    }

    pub fn merge(&self, request: MergeRequest) -> RevisionResult<Option<Commit>> {
        self.merges.merge(request)
    }

    /// Merge `source` into `target` with default settings.
    pub fn merge_branches(&self, source: &str, target: &str, author: &str) -> RevisionResult<Option<Commit>> {
        let request = MergeRequest::new(BranchPath::new(source)?, BranchPath::new(target)?).author(author);
        self.merges.merge(request)
    }

    pub fn rebase(&self, request: RebaseRequest) -> RevisionResult<Option<Commit>> {
        self.merges.rebase(request)
    }

    /// Rebase `branch` onto its parent's head.
    pub fn rebase_branch(&self, branch: &str, author: &str) -> RevisionResult<Option<Commit>> {
        self.merges
            .rebase(RebaseRequest::new(BranchPath::new(branch)?).author(author))
    }

    // ==================== History ====================

    pub fn commit(&self, id: &str) -> RevisionResult<Commit> {
        self.history.get(id)
    }

    /// Commits matching `query`, newest first.
    pub fn commits(&self, query: &CommitQuery) -> RevisionResult<Vec<Commit>> {
        self.history.search(query)
    }
}

impl std::fmt::Debug for RevisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionStore")
            .field("backend", &self.config.backend)
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}
