//! Revisions, commits and everything that reads or writes them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ StagingArea  │   │ MergeEngine  │
//! │ (per branch) │   │ merge/rebase │
//! └──────┬───────┘   └──────┬───────┘
//!        │                  │
//!        ▼                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CommitPipeline                         │
//! │     (lock, CAS check, hooks, timestamp, one index batch)    │
//! └─────────────────────────────────────────────────────────────┘
//!        │                  │
//!        ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Resolver    │   │  Branching   │   │CommitHistory │
//! │ (BranchView) │   │ (head CAS)   │   │  (queries)   │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Revisions are immutable except for their `revised` timestamp, which is set
//! once when a later commit on the same segment supersedes them.

mod conflict;
mod history;
mod hooks;
mod merge;
mod model;
mod pipeline;
mod resolve;
mod staging;
mod view;

pub use conflict::{Conflict, ConflictKind};
pub use history::{CommitHistory, CommitQuery};
pub use hooks::{Hooks, PendingCommit, PostCommitHook, PreCommitHook};
pub use merge::{ConflictProcessor, MergeEngine, MergeRequest, PropertyMerge, RebaseRequest, StrictEquality};
pub use model::{
    diff_properties, ChangeKind, Commit, CommitChange, MergeSource, PropertyChange, Revision, RevisionId,
    RevisionKey,
};
pub use pipeline::{CommitOptions, CommitPipeline};
pub use resolve::{RevisionChange, RevisionQuery, RevisionResolver};
pub use staging::{StagedChange, StagingArea};
pub use view::{BranchView, Segment};
