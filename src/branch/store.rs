//! Branch Store: branch documents in the index plus a cached arena.
//!
//! The index is the source of truth. Every mutation is first staged into an
//! index write batch and only published to the arena after that batch has
//! been committed, so the cache never shows a branch the index does not have.

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::branch::arena::BranchArena;
use crate::branch::model::RevisionBranch;
use crate::branch::path::BranchPath;
use crate::clock::Timestamp;
use crate::error::{RevisionError, RevisionResult};
use crate::index::{document, Document, Index, IndexResult, IndexWriter, Query};

pub struct BranchStore {
    index: Index,
    arena: RwLock<BranchArena>,
}

impl BranchStore {
    /// Load every branch document, creating `MAIN` on first use.
    pub fn open(index: Index) -> RevisionResult<Self> {
        let mut branches: Vec<RevisionBranch> =
            index.read(|r| document::search(r, Query::new(RevisionBranch::TYPE)))?;

        if !branches.iter().any(|b| b.path.is_root()) {
            let mut root = RevisionBranch::root();
            index.write(|w| stage_branch(w, &mut root))?;
            info!(target: "revstore::branch", path = %root.path, "created root branch");
            branches.push(root);
        }

        // parents sort before children
        branches.sort_by_key(|b| b.path.depth());
        let mut arena = BranchArena::new();
        for branch in branches {
            let path = branch.path.clone();
            if !arena.upsert(branch) {
                warn!(target: "revstore::branch", path = %path, "skipping branch with unknown parent");
            }
        }

        Ok(Self {
            index,
            arena: RwLock::new(arena),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn find(&self, path: &BranchPath) -> Option<RevisionBranch> {
        self.arena.read().get(path).cloned()
    }

    pub fn get(&self, path: &BranchPath) -> RevisionResult<RevisionBranch> {
        self.find(path)
            .ok_or_else(|| RevisionError::BranchNotFound(path.clone()))
    }

    pub fn contains(&self, path: &BranchPath) -> bool {
        self.arena.read().contains(path)
    }

    /// every branch, ordered by path
    pub fn list(&self) -> Vec<RevisionBranch> {
        let mut branches: Vec<_> = self.arena.read().iter().cloned().collect();
        branches.sort_by(|a, b| a.path.cmp(&b.path));
        branches
    }

    /// the branch followed by its ancestors up to `MAIN`
    pub fn ancestry(&self, path: &BranchPath) -> RevisionResult<Vec<RevisionBranch>> {
        self.arena
            .read()
            .ancestry(path)
            .map(|chain| chain.into_iter().cloned().collect())
            .ok_or_else(|| RevisionError::BranchNotFound(path.clone()))
    }

    pub fn children(&self, path: &BranchPath) -> Vec<RevisionBranch> {
        self.arena.read().children(path).into_iter().cloned().collect()
    }

    pub fn descendants(&self, path: &BranchPath) -> Vec<RevisionBranch> {
        self.arena.read().descendants(path).into_iter().cloned().collect()
    }

    /// Stage a branch document into a pending batch, bumping its version past
    /// the one the batch sees.
    pub fn stage(&self, writer: &mut dyn IndexWriter, branch: &mut RevisionBranch) -> IndexResult<()> {
        stage_branch(writer, branch)
    }

    /// Read a branch as the pending batch sees it.
    pub fn read_pending(&self, writer: &dyn IndexWriter, path: &BranchPath) -> RevisionResult<RevisionBranch> {
        self.find_pending(writer, path)?
            .ok_or_else(|| RevisionError::BranchNotFound(path.clone()))
    }

    pub fn find_pending(&self, writer: &dyn IndexWriter, path: &BranchPath) -> IndexResult<Option<RevisionBranch>> {
        document::read_pending(writer, path.as_str())
    }

    /// Make committed branch documents visible through the cache.
    ///
    /// Batches commit in index order but may publish in any order; a document
    /// older than the cached one is ignored.
    pub fn publish(&self, branches: impl IntoIterator<Item = RevisionBranch>) {
        let mut arena = self.arena.write();
        for branch in branches {
            let path = branch.path.clone();
            if !arena.upsert(branch) {
                warn!(target: "revstore::branch", path = %path, "published branch has unknown parent");
            }
        }
    }

    /// Largest timestamp recorded by any branch, used to seed the clock.
    pub fn max_timestamp(&self) -> Timestamp {
        self.arena
            .read()
            .iter()
            .flat_map(|b| {
                let rebases = b.rebases.iter().map(|r| r.timestamp);
                let merges = b.merge_sources.iter().map(|m| m.timestamp);
                std::iter::once(b.head_timestamp).chain(rebases).chain(merges)
            })
            .max()
            .unwrap_or(0)
    }
}

fn stage_branch(writer: &mut dyn IndexWriter, branch: &mut RevisionBranch) -> IndexResult<()> {
    let stored = document::read_pending::<RevisionBranch>(writer, branch.path.as_str())?;
    branch.version = stored.map_or(0, |b| b.version) + 1;
    document::write(writer, &*branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{GitIndex, MemoryIndex};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> BranchStore {
        BranchStore::open(Index::new(MemoryIndex::new())).unwrap()
    }

    #[test]
    fn test_open_creates_main() {
        let store = setup();
        let main = store.get(&BranchPath::main()).unwrap();
        assert_eq!(main.base_timestamp, 0);
        assert_eq!(main.head_timestamp, 0);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_stage_then_publish() {
        let store = setup();
        let main = store.get(&BranchPath::main()).unwrap();
        let mut child = RevisionBranch::fork(&main, BranchPath::new("MAIN/a").unwrap(), BTreeMap::new());

        store
            .index()
            .write(|w| store.stage(w, &mut child))
            .unwrap();
        assert_eq!(child.version, 1);
        // the cache only changes on publish
        assert!(!store.contains(&child.path));

        store.publish([child.clone()]);
        let chain = store.ancestry(&child.path).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(store.children(&BranchPath::main()), vec![child]);
    }

    #[test]
    fn test_reload_from_git_index() {
        let dir = TempDir::new().unwrap();
        {
            let store = BranchStore::open(Index::new(GitIndex::init(dir.path()).unwrap())).unwrap();
            let mut main = store.get(&BranchPath::main()).unwrap();
            main.head_timestamp = 7;
            let mut child = RevisionBranch::fork(&main, BranchPath::new("MAIN/a").unwrap(), BTreeMap::new());
            store
                .index()
                .write(|w| {
                    store.stage(w, &mut main)?;
                    store.stage(w, &mut child)
                })
                .unwrap();
        }

        let store = BranchStore::open(Index::new(GitIndex::open(dir.path()).unwrap())).unwrap();
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.max_timestamp(), 7);
        assert_eq!(store.get(&BranchPath::new("MAIN/a").unwrap()).unwrap().base_timestamp, 7);
        assert_eq!(store.get(&BranchPath::main()).unwrap().version, 2);
    }

    #[test]
    fn test_publish_ignores_older_versions() {
        let store = setup();
        let mut main = store.get(&BranchPath::main()).unwrap();

        main.head_timestamp = 10;
        let mut first = main.clone();
        store.index().write(|w| store.stage(w, &mut first)).unwrap();
        let mut second = first.clone();
        second.head_timestamp = 20;
        store.index().write(|w| store.stage(w, &mut second)).unwrap();
        assert_eq!((first.version, second.version), (2, 3));

        // the later batch publishes first
        store.publish([second]);
        store.publish([first]);
        let cached = store.get(&BranchPath::main()).unwrap();
        assert_eq!(cached.head_timestamp, 20);
        assert_eq!(cached.version, 3);
    }
}
