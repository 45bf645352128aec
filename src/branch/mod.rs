//! Branch hierarchy for revstore
//!
//! Branches form a tree rooted at `MAIN`. Each branch owns one segment of
//! history and inherits its parent's history up to its base timestamp.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RevisionBranching                        │
//! │   (create / delete / metadata / head CAS / locks / events)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BranchStore                           │
//! │         (branch documents + cached BranchArena)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                        document index
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let branching = RevisionBranching::open(index, Duration::from_secs(60))?;
//! let task = branching.create(&BranchPath::main(), "task-1", BTreeMap::new())?;
//! let chain = branching.ancestry_chain(&task.path)?; // [MAIN/task-1, MAIN]
//! ```

mod arena;
mod branching;
mod model;
mod path;
mod store;

pub use branching::{BranchListener, BranchLock, RevisionBranching};
pub(crate) use branching::HeadUpdate;
pub use model::{BranchState, Divergence, MergePoint, Rebase, RevisionBranch};
pub use path::{BranchPath, InvalidPathError};
pub use store::BranchStore;
