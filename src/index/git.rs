//! Git-backed document index.
//!
//! Wraps a `git2::Repository`. Each document is a JSON blob at
//! `{type}/{key}.json` in the tree of the index ref, and each committed batch
//! is one git commit, so the index survives restarts and its history can be
//! inspected with plain git.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Oid, Repository};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tracing::debug;

use crate::index::batch::Batch;
use crate::index::blob;
use crate::index::commit::{self, CommitBuilder, GitSignature};
use crate::index::error::{IndexError, IndexResult};
use crate::index::query::{self, Hit, Query};
use crate::index::refs::RefManager;
use crate::index::tree::{TreeHandle, TreeMutator};
use crate::index::types::DocPath;
use crate::index::{DocumentIndex, IndexReader, IndexWriter};

/// Persistent index stored in a git repository.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitIndex {
    inner: Arc<GitIndexInner>,
}

struct GitIndexInner {
    // git2 repositories are Send but not Sync
    repo: Mutex<Repository>,
    write_lock: Mutex<()>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitIndex {
    /// Open an existing index repository.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| IndexError::NotInitialized(path.to_path_buf()))?;
        RefManager::resolve(&repo)?;

        Ok(Self::from_repo(repo, path))
    }

    /// Initialize a new index repository with an empty first batch.
    pub fn init(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let index = Self::from_repo(repo, path);

        index.with_repo(|repo| {
            let initial = commit::create_initial_commit(repo, &index.inner.signature)?;
            RefManager::init(repo, initial)
        })?;
        debug!(target: "revstore::index", path = %path.display(), "initialized git index");

        Ok(index)
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn from_repo(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitIndexInner {
                repo: Mutex::new(repo),
                write_lock: Mutex::new(()),
                path: path.to_path_buf(),
                signature: GitSignature::revstore(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> IndexResult<T>
    where
        F: FnOnce(&Repository) -> IndexResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// number of applied batches, including the initial empty one
    pub fn batch_count(&self) -> IndexResult<usize> {
        self.with_repo(|repo| {
            let head = RefManager::resolve(repo)?;
            commit::count_commits(repo, head)
        })
    }

    pub fn stats(&self) -> IndexResult<IndexStats> {
        let batches = self.batch_count()?;
        self.with_repo(|repo| {
            let tree = head_tree(repo)?;
            Ok(IndexStats {
                doc_types: tree.doc_types().len(),
                documents: tree.count_documents(repo)?,
                batches,
            })
        })
    }

    fn get_committed(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        let path = DocPath::new(doc_type, key)?;
        self.with_repo(|repo| {
            let tree = head_tree(repo)?;
            match tree.blob_for(repo, &path)? {
                Some(id) => {
                    let bytes = blob::read_blob(repo, id)?;
                    Ok(Some(blob::decode_document(&bytes, &path)?))
                }
                None => Ok(None),
            }
        })
    }
}

impl fmt::Debug for GitIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitIndex").field("path", &self.inner.path).finish()
    }
}

fn head_tree(repo: &Repository) -> IndexResult<TreeHandle<'_>> {
    let head = RefManager::resolve(repo)?;
    let tree = repo.find_commit(head)?.tree()?;
    Ok(TreeHandle::new(tree))
}

impl DocumentIndex for GitIndex {
    fn reader(&self) -> IndexResult<Box<dyn IndexReader + '_>> {
        Ok(Box::new(GitReader { index: self }))
    }

    fn writer(&self) -> IndexResult<Box<dyn IndexWriter + '_>> {
        Ok(Box::new(GitWriter {
            _guard: self.inner.write_lock.lock(),
            index: self,
            batch: Batch::default(),
        }))
    }
}

struct GitReader<'a> {
    index: &'a GitIndex,
}

impl IndexReader for GitReader<'_> {
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        self.index.get_committed(doc_type, key)
    }

    fn search(&self, query: &Query) -> IndexResult<Vec<Hit>> {
        self.index.with_repo(|repo| {
            let tree = head_tree(repo)?;
            let mut candidates = Vec::new();
            for (key, id) in tree.entries(repo, &query.doc_type)? {
                let path = DocPath::new(&query.doc_type, key.as_str())?;
                let doc = blob::decode_document(&blob::read_blob(repo, id)?, &path)?;
                if query.matches(&doc) {
                    candidates.push((key.into_string(), doc));
                }
            }
            Ok(query::execute(query, candidates))
        })
    }
}

struct GitWriter<'a> {
    _guard: MutexGuard<'a, ()>,
    index: &'a GitIndex,
    batch: Batch,
}

impl IndexWriter for GitWriter<'_> {
    fn get(&self, doc_type: &str, key: &str) -> IndexResult<Option<Value>> {
        match self.batch.pending(doc_type, key) {
            Some(pending) => Ok(pending.cloned()),
            None => self.index.get_committed(doc_type, key),
        }
    }

    fn put(&mut self, doc_type: &str, key: &str, doc: Value) -> IndexResult<()> {
        DocPath::new(doc_type, key)?;
        self.batch.put(doc_type, key, doc);
        Ok(())
    }

    fn remove(&mut self, doc_type: &str, key: &str) -> IndexResult<()> {
        DocPath::new(doc_type, key)?;
        self.batch.remove(doc_type, key);
        Ok(())
    }

    fn commit(self: Box<Self>) -> IndexResult<()> {
        let GitWriter { _guard, index, batch } = *self;
        if batch.is_empty() {
            return Ok(());
        }
        let (puts, removes) = batch.counts();

        let commit_id = index.with_repo(|repo| {
            let head = RefManager::resolve(repo)?;
            let tree = TreeHandle::new(repo.find_commit(head)?.tree()?);
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;

            for ((doc_type, key), op) in batch.into_ops() {
                let path = DocPath::new(&doc_type, &key)?;
                match op {
                    Some(doc) => {
                        let bytes = blob::encode_document(&path, doc)?;
                        mutator.upsert(&path, blob::write_blob(repo, &bytes)?)?;
                    }
                    None => {
                        mutator.remove(&path)?;
                    }
                }
            }

            let new_tree = mutator.write()?;
            let commit_id: Oid = CommitBuilder::new(repo)
                .tree(new_tree)
                .parent(head)
                .message(commit::batch_message(puts, removes))
                .signature(index.inner.signature.clone())
                .commit()?;
            RefManager::update_if_unchanged(repo, head, commit_id)?;
            Ok(commit_id)
        })?;

        debug!(target: "revstore::index", commit = %commit_id, puts, removes, "applied batch");
        Ok(())
    }
}

/// Statistics about a git index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub doc_types: usize,
    pub documents: usize,
    pub batches: usize,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index Statistics:")?;
        writeln!(f, "  Document Types: {}", self.doc_types)?;
        writeln!(f, "  Documents: {}", self.documents)?;
        writeln!(f, "  Batches: {}", self.batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Filter, Index};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitIndex) {
        let dir = TempDir::new().unwrap();
        let index = GitIndex::init(dir.path()).unwrap();
        (dir, index)
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let index = Index::new(GitIndex::init(dir.path()).unwrap());
        index
            .write(|w| w.put("branch", "MAIN", json!({"path": "MAIN"})))
            .unwrap();
        drop(index);

        let reopened = GitIndex::open(dir.path()).unwrap();
        let doc = reopened.reader().unwrap().get("branch", "MAIN").unwrap();
        assert_eq!(doc, Some(json!({"path": "MAIN"})));
    }

    #[test]
    fn test_open_missing_repository_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            GitIndex::open(dir.path().join("nope")),
            Err(IndexError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_open_or_init() {
        let dir = TempDir::new().unwrap();
        let first = GitIndex::open_or_init(dir.path()).unwrap();
        assert_eq!(first.batch_count().unwrap(), 1);
        drop(first);

        let second = GitIndex::open_or_init(dir.path()).unwrap();
        assert_eq!(second.batch_count().unwrap(), 1);
    }

    #[test]
    fn test_one_commit_per_batch() {
        let (_dir, git) = setup();
        let index = Index::new(git.clone());

        index
            .write(|w| {
                w.put("revision", "a", json!({"created": 1}))?;
                w.put("revision", "b", json!({"created": 2}))?;
                w.put("commit", "c1", json!({"timestamp": 2}))
            })
            .unwrap();
        index.write(|w| w.remove("revision", "a")).unwrap();
        // empty batches do not create commits
        index.write(|_| Ok::<_, IndexError>(())).unwrap();

        let stats = git.stats().unwrap();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.doc_types, 2);
    }

    #[test]
    fn test_unsorted_search_is_key_ordered() {
        let (_dir, git) = setup();
        let index = Index::new(git);
        index
            .write(|w| {
                w.put("branch", "MAIN/b", json!({"n": 3}))?;
                w.put("branch", "MAIN", json!({"n": 1}))?;
                w.put("branch", "MAIN/a", json!({"n": 2}))
            })
            .unwrap();

        let hits = index
            .read(|r| r.search(&Query::new("branch").limit(2)))
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["MAIN", "MAIN/a"]);
    }

    #[test]
    fn test_search_with_filters() {
        let (_dir, git) = setup();
        let index = Index::new(git);
        index
            .write(|w| {
                for i in 0..4u64 {
                    w.put("revision", &format!("k{}", i), json!({"created": i, "branchPath": "MAIN"}))?;
                }
                Ok::<_, IndexError>(())
            })
            .unwrap();

        let hits = index
            .read(|r| {
                r.search(
                    &Query::new("revision")
                        .filter(Filter::eq("branchPath", "MAIN"))
                        .filter(Filter::after("created", 1))
                        .sort_by("created", true),
                )
            })
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["k3", "k2"]);
    }

    #[test]
    fn test_keys_with_slashes_survive() {
        let (_dir, git) = setup();
        let index = Index::new(git);
        index
            .write(|w| w.put("branch", "MAIN/a/b", json!({"path": "MAIN/a/b"})))
            .unwrap();

        let hits = index.read(|r| r.search(&Query::new("branch"))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "MAIN/a/b");
    }

    #[test]
    fn test_writer_sees_pending_but_readers_do_not() {
        let (_dir, git) = setup();
        let mut writer = git.writer().unwrap();
        writer.put("branch", "MAIN", json!({"head": 0})).unwrap();
        assert_eq!(writer.get("branch", "MAIN").unwrap(), Some(json!({"head": 0})));
        assert_eq!(git.reader().unwrap().get("branch", "MAIN").unwrap(), None);

        writer.commit().unwrap();
        assert_eq!(
            git.reader().unwrap().get("branch", "MAIN").unwrap(),
            Some(json!({"head": 0}))
        );
    }
}
