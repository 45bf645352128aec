//! Revision store error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::branch::{BranchPath, InvalidPathError};
use crate::clock::Timestamp;
use crate::index::IndexError;
use crate::revision::{Conflict, RevisionKey};

/// Result type for revision store operations.
pub type RevisionResult<T> = Result<T, RevisionError>;

/// Coarse classification of every failure, for callers that map errors onto
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    BadRequest,
    Conflict,
    Timeout,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during revision store operations.
#[derive(Debug, Error)]
pub enum RevisionError {
    /// Document index failure. Always surfaced unchanged.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("invalid branch path: {0}")]
    InvalidPath(#[from] InvalidPathError),

    #[error("store not found at {0}")]
    StoreNotFound(PathBuf),

    #[error("branch not found: {0}")]
    BranchNotFound(BranchPath),

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(BranchPath),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("revision {key} not found on {branch}")]
    RevisionNotFound { key: RevisionKey, branch: BranchPath },

    #[error("branch {0} is deleted")]
    BranchDeleted(BranchPath),

    /// The branch must be rebased before it accepts commits again.
    #[error("branch {0} is stale and needs a rebase")]
    BranchStale(BranchPath),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0} is already staged")]
    AlreadyStaged(RevisionKey),

    /// A pre-commit hook rejected the change set.
    #[error("commit rejected by {hook}: {reason}")]
    HookVeto { hook: String, reason: String },

    #[error("{} conflict(s): {}", .conflicts.len(), conflicts_display(.conflicts))]
    Conflict { conflicts: Vec<Conflict> },

    /// Head advancement lost a race or was applied out of order.
    #[error("cannot move head of {branch} from {head} to {attempted}")]
    StaleHead {
        branch: BranchPath,
        head: Timestamp,
        attempted: Timestamp,
    },

    #[error("{what} timed out after {elapsed_ms}ms")]
    Timeout { what: String, elapsed_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

fn conflicts_display(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RevisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RevisionError::StoreNotFound(_)
            | RevisionError::BranchNotFound(_)
            | RevisionError::CommitNotFound(_)
            | RevisionError::RevisionNotFound { .. } => ErrorKind::NotFound,
            RevisionError::BranchAlreadyExists(_) => ErrorKind::AlreadyExists,
            RevisionError::InvalidPath(_)
            | RevisionError::BranchDeleted(_)
            | RevisionError::BranchStale(_)
            | RevisionError::BadRequest(_)
            | RevisionError::AlreadyStaged(_)
            | RevisionError::HookVeto { .. } => ErrorKind::BadRequest,
            RevisionError::Conflict { .. } | RevisionError::StaleHead { .. } => ErrorKind::Conflict,
            RevisionError::Timeout { .. } => ErrorKind::Timeout,
            RevisionError::Index(_) | RevisionError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if repeating the operation with fresh data may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RevisionError::Index(e) => e.is_retriable(),
            other => matches!(other.kind(), ErrorKind::Conflict | ErrorKind::Timeout),
        }
    }

    /// The conflicting keys, if this is a conflict error.
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            RevisionError::Conflict { conflicts } => conflicts,
            _ => &[],
        }
    }

    /// Error for a pre-commit hook that rejects a change set.
    pub fn veto(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        RevisionError::HookVeto {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        RevisionError::BadRequest(message.into())
    }
}
