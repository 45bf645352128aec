//! revstore - a revision-controlled document store
//!
//! Documents live on branches that form a tree rooted at `MAIN`. Every
//! change is part of an atomic, timestamped commit; every version ever
//! written stays readable, so any branch can be read as of any point in
//! time. Child branches inherit their parent's history up to their fork
//! point, and changes move between branches through merges and rebases.
//!
//! Storage is a pluggable document index: an in-memory one for tests and
//! a git repository (one git commit per write batch) for durability.
//!
//! # Example
//!
//! ```no_run
//! use revstore::{RevisionKey, RevisionStore};
//! use serde_json::json;
//!
//! let store = RevisionStore::open("./my_store").unwrap();
//! let mut staging = store.staging("MAIN").unwrap();
//! staging.stage_new(RevisionKey::new("concept", "1"), json!({"term": "heart"})).unwrap();
//! let commit = staging.commit("alice", "add heart").unwrap();
//!
//! let old = store.resolve("MAIN", &RevisionKey::new("concept", "1"), Some(commit.timestamp - 1)).unwrap();
//! assert!(old.is_none());
//! ```

pub mod branch;
pub mod clock;
pub mod error;
pub mod index;
pub mod revision;
pub mod store;

pub use branch::{BranchPath, BranchState, Divergence, RevisionBranch, RevisionBranching};
pub use clock::{MonotonicClock, SequenceClock, Timestamp, TimestampSource};
pub use error::{ErrorKind, RevisionError, RevisionResult};
pub use revision::{
    ChangeKind, Commit, CommitOptions, CommitQuery, Conflict, ConflictKind, ConflictProcessor, MergeRequest,
    PropertyMerge, RebaseRequest, Revision, RevisionKey, RevisionQuery, StagingArea, StrictEquality,
};
pub use store::{IndexBackend, RevisionStore, StoreConfig};
