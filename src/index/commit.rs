//! git commits for index batches
//!
//! every committed batch of the git backend becomes one git commit on the
//! index ref, so the repository history doubles as a write log.

use git2::{Oid, Repository, Sort};

use crate::index::error::{IndexError, IndexResult};
use crate::index::tree::TreeMutator;

/// author/committer identity for index commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn revstore() -> Self {
        Self::new("revstore", "revstore@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::revstore()
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree: Option<Oid>,
    parents: Vec<Oid>,
    message: String,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::revstore(),
        }
    }

    pub fn tree(mut self, tree: Oid) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn parent(mut self, parent: Oid) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn commit(self) -> IndexResult<Oid> {
        let tree_id = self
            .tree
            .ok_or_else(|| IndexError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature.to_git2_signature()?;

        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(*id))
            .collect::<Result<_, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            None,
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;
        Ok(oid)
    }
}

/// commit an empty tree without touching any ref
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> IndexResult<Oid> {
    let tree = TreeMutator::empty(repo)?.write()?;
    CommitBuilder::new(repo)
        .tree(tree)
        .message("[revstore] initialize index")
        .signature(signature.clone())
        .commit()
}

/// number of commits reachable from `head`
pub fn count_commits(repo: &Repository, head: Oid) -> IndexResult<usize> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL)?;
    walk.push(head)?;
    let mut count = 0;
    for oid in walk {
        oid?;
        count += 1;
    }
    Ok(count)
}

/// commit message for one batch
pub fn batch_message(puts: usize, removes: usize) -> String {
    format!("[revstore] batch: {} put, {} removed", puts, removes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_chain() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let root = create_initial_commit(&repo, &GitSignature::default()).unwrap();
        let tree = repo.find_commit(root).unwrap().tree_id();
        let next = CommitBuilder::new(&repo)
            .tree(tree)
            .parent(root)
            .message(batch_message(1, 0))
            .commit()
            .unwrap();

        assert_eq!(count_commits(&repo, next).unwrap(), 2);
        let commit = repo.find_commit(next).unwrap();
        assert_eq!(commit.message(), Some("[revstore] batch: 1 put, 0 removed"));
        assert_eq!(commit.author().name(), Some("revstore"));
    }

    #[test]
    fn test_commit_without_tree_fails() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(matches!(
            CommitBuilder::new(&repo).commit(),
            Err(IndexError::Internal(_))
        ));
    }
}
