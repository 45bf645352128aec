//! the index ref
//!
//! the git backend keeps a single branch, `refs/heads/index`, pointing at
//! the commit of the latest applied batch. HEAD is attached to it so that
//! ordinary git tooling shows the current documents.

use git2::{ErrorCode, Oid, Repository};

use crate::index::error::{IndexError, IndexResult};

pub const INDEX_REF: &str = "refs/heads/index";

pub struct RefManager;

impl RefManager {
    /// commit the index ref currently points at
    pub fn resolve(repo: &Repository) -> IndexResult<Oid> {
        let reference = repo.find_reference(INDEX_REF).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                IndexError::NotInitialized(repo.path().to_path_buf())
            } else {
                IndexError::Git(e)
            }
        })?;
        Ok(reference.peel_to_commit()?.id())
    }

    /// move the index ref only if it still points at `expected`
    pub fn update_if_unchanged(repo: &Repository, expected: Oid, target: Oid) -> IndexResult<()> {
        repo.reference_matching(INDEX_REF, target, true, expected, "revstore: apply batch")
            .map_err(|e| match e.code() {
                ErrorCode::Modified | ErrorCode::NotFound => IndexError::ConcurrentModification {
                    reference: INDEX_REF.to_string(),
                },
                _ => IndexError::Git(e),
            })?;
        Ok(())
    }

    /// create the index ref at `initial` (if missing) and attach HEAD to it
    pub fn init(repo: &Repository, initial: Oid) -> IndexResult<()> {
        if repo.find_reference(INDEX_REF).is_err() {
            repo.reference(INDEX_REF, initial, false, "revstore: init index")?;
        }
        repo.set_head(INDEX_REF)?;
        Ok(())
    }
}
