//! Revision Branching - branch lifecycle on top of the Branch Store.
//!
//! Every mutation of a branch goes through here:
//! - fork (create), delete, metadata updates
//! - head advancement, rebase and merge-point bookkeeping for the commit pipeline
//! - per-path locks that serialize those mutations
//! - change notification for registered listeners

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use crate::branch::model::{BranchState, MergePoint, Rebase, RevisionBranch};
use crate::branch::path::BranchPath;
use crate::branch::store::BranchStore;
use crate::clock::Timestamp;
use crate::error::{RevisionError, RevisionResult};
use crate::index::{Index, IndexWriter};

/// Notified after every successful branch mutation.
pub trait BranchListener: Send + Sync {
    fn on_branch_changed(&self, branch: &RevisionBranch);
}

impl<F> BranchListener for F
where
    F: Fn(&RevisionBranch) + Send + Sync,
{
    fn on_branch_changed(&self, branch: &RevisionBranch) {
        self(branch)
    }
}

/// Exclusive hold on one branch path. Released on drop.
pub struct BranchLock {
    path: BranchPath,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl BranchLock {
    pub fn path(&self) -> &BranchPath {
        &self.path
    }
}

impl std::fmt::Debug for BranchLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchLock").field("path", &self.path).finish()
    }
}

/// A head move staged by the commit pipeline.
#[derive(Debug, Clone)]
pub(crate) struct HeadUpdate {
    /// head the committer based its work on
    pub expected_head: Timestamp,
    pub timestamp: Timestamp,
    /// move the base to this timestamp (rebase)
    pub rebase_to: Option<Timestamp>,
    /// record a merge received from this source at the given source head
    pub merge_from: Option<(BranchPath, Timestamp)>,
}

impl HeadUpdate {
    pub fn advance(expected_head: Timestamp, timestamp: Timestamp) -> Self {
        Self {
            expected_head,
            timestamp,
            rebase_to: None,
            merge_from: None,
        }
    }
}

#[derive(Clone)]
pub struct RevisionBranching {
    inner: Arc<BranchingInner>,
}

struct BranchingInner {
    store: BranchStore,
    locks: Mutex<HashMap<BranchPath, Arc<Mutex<()>>>>,
    listeners: RwLock<Vec<Arc<dyn BranchListener>>>,
    lock_timeout: Duration,
}

impl RevisionBranching {
    pub fn open(index: Index, lock_timeout: Duration) -> RevisionResult<Self> {
        Ok(Self {
            inner: Arc::new(BranchingInner {
                store: BranchStore::open(index)?,
                locks: Mutex::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                lock_timeout,
            }),
        })
    }

    pub fn store(&self) -> &BranchStore {
        &self.inner.store
    }

    pub fn index(&self) -> &Index {
        self.inner.store.index()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout
    }

    // ==================== Queries ====================

    pub fn get(&self, path: &BranchPath) -> RevisionResult<RevisionBranch> {
        self.inner.store.get(path)
    }

    pub fn exists(&self, path: &BranchPath) -> bool {
        self.inner.store.contains(path)
    }

    pub fn branches(&self) -> Vec<RevisionBranch> {
        self.inner.store.list()
    }

    pub fn children(&self, path: &BranchPath) -> RevisionResult<Vec<RevisionBranch>> {
        self.get(path)?;
        Ok(self.inner.store.children(path))
    }

    pub fn descendants(&self, path: &BranchPath) -> RevisionResult<Vec<RevisionBranch>> {
        self.get(path)?;
        Ok(self.inner.store.descendants(path))
    }

    /// the branch itself first, `MAIN` last
    pub fn ancestry_chain(&self, path: &BranchPath) -> RevisionResult<Vec<RevisionBranch>> {
        self.inner.store.ancestry(path)
    }

    // ==================== Locking ====================

    /// Lock a branch path, waiting at most `timeout`.
    pub fn lock(&self, path: &BranchPath, timeout: Duration) -> RevisionResult<BranchLock> {
        let mutex = {
            let mut locks = self.inner.locks.lock();
            locks.entry(path.clone()).or_default().clone()
        };

        let started = Instant::now();
        match mutex.try_lock_arc_for(timeout) {
            Some(guard) => {
                debug!(target: "revstore::branch", path = %path, "acquired branch lock");
                Ok(BranchLock {
                    path: path.clone(),
                    _guard: guard,
                })
            }
            None => Err(RevisionError::Timeout {
                what: format!("lock on {}", path),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Lock every live direct child of `path`, e.g. before a rebase marks
    /// them stale.
    pub fn lock_children(&self, path: &BranchPath, timeout: Duration) -> RevisionResult<Vec<BranchLock>> {
        self.inner
            .store
            .children(path)
            .iter()
            .filter(|child| !child.is_deleted())
            .map(|child| self.lock(&child.path, timeout))
            .collect()
    }

    // ==================== Lifecycle ====================

    /// Fork a new branch from `parent` at the parent's current head.
    ///
    /// The path of a deleted branch can be used again; the new branch starts
    /// empty and sees none of the deleted branch's revisions.
    pub fn create(
        &self,
        parent: &BranchPath,
        name: &str,
        metadata: BTreeMap<String, Value>,
    ) -> RevisionResult<RevisionBranch> {
        let path = parent.child(name)?;
        let _lock = self.lock(parent, self.inner.lock_timeout)?;

        let parent_branch = self.get(parent)?;
        if parent_branch.is_deleted() {
            return Err(RevisionError::BranchNotFound(parent.clone()));
        }
        let previous = self.inner.store.find(&path);
        if previous.as_ref().is_some_and(|b| !b.is_deleted()) {
            return Err(RevisionError::BranchAlreadyExists(path));
        }

        let branch = self.index().write(|w| {
            let mut branch = match self.inner.store.find_pending(w, &path)? {
                Some(deleted) if deleted.is_deleted() => {
                    RevisionBranch::reopen(&deleted, &parent_branch, metadata)
                }
                Some(_) => return Err(RevisionError::BranchAlreadyExists(path.clone())),
                None => RevisionBranch::fork(&parent_branch, path.clone(), metadata),
            };
            self.inner.store.stage(w, &mut branch)?;
            Ok::<_, RevisionError>(branch)
        })?;
        self.publish(vec![branch.clone()]);

        info!(
            target: "revstore::branch",
            path = %branch.path,
            base = branch.base_timestamp,
            reopened = previous.is_some(),
            "created branch"
        );
        Ok(branch)
    }

    /// Soft-delete a branch and all of its descendants.
    pub fn delete(&self, path: &BranchPath) -> RevisionResult<()> {
        if path.is_root() {
            return Err(RevisionError::bad_request("the root branch cannot be deleted"));
        }
        let _lock = self.lock(path, self.inner.lock_timeout)?;

        let branch = self.get(path)?;
        if branch.is_deleted() {
            return Ok(());
        }

        let mut doomed = vec![branch];
        doomed.extend(
            self.inner
                .store
                .descendants(path)
                .into_iter()
                .filter(|b| !b.is_deleted()),
        );
        // parents before children, the same order every multi-lock holder uses
        let _descendant_locks = doomed[1..]
            .iter()
            .map(|b| self.lock(&b.path, self.inner.lock_timeout))
            .collect::<RevisionResult<Vec<_>>>()?;

        let deleted = self.index().write(|w| {
            let mut deleted = Vec::with_capacity(doomed.len());
            for branch in &doomed {
                let mut current = self.inner.store.read_pending(w, &branch.path)?;
                current.state = BranchState::Deleted;
                self.inner.store.stage(w, &mut current)?;
                deleted.push(current);
            }
            Ok::<_, RevisionError>(deleted)
        })?;

        info!(target: "revstore::branch", path = %path, count = deleted.len(), "deleted branch");
        self.publish(deleted);
        Ok(())
    }

    /// Replace the metadata map of a branch.
    pub fn update_metadata(
        &self,
        path: &BranchPath,
        metadata: BTreeMap<String, Value>,
    ) -> RevisionResult<RevisionBranch> {
        let _lock = self.lock(path, self.inner.lock_timeout)?;

        let updated = self.index().write(|w| {
            let mut branch = self.inner.store.read_pending(w, path)?;
            if branch.is_deleted() {
                return Err(RevisionError::BranchDeleted(path.clone()));
            }
            branch.metadata = metadata;
            self.inner.store.stage(w, &mut branch)?;
            Ok(branch)
        })?;

        debug!(target: "revstore::branch", path = %path, "updated branch metadata");
        self.publish(vec![updated.clone()]);
        Ok(updated)
    }

    /// Move the head of a branch forward to `timestamp`.
    ///
    /// Fails with a conflict when `timestamp` is not after the current head.
    pub fn advance_head(&self, path: &BranchPath, timestamp: Timestamp) -> RevisionResult<RevisionBranch> {
        let _lock = self.lock(path, self.inner.lock_timeout)?;
        let expected = self.get(path)?.head_timestamp;

        let updated = self
            .index()
            .write(|w| self.stage_update(w, path, &HeadUpdate::advance(expected, timestamp)))?;
        let branch = updated
            .first()
            .cloned()
            .ok_or_else(|| RevisionError::Internal(format!("no update staged for {}", path)))?;
        self.publish(updated);
        Ok(branch)
    }

    /// Stage a head move into a pending batch.
    ///
    /// Compare-and-set against the branch document as the batch sees it: the
    /// head must still be `expected_head` and must grow. Rebases also move the
    /// base, reactivate the branch and mark its direct children stale.
    /// Returns every branch document written, the updated branch first.
    pub(crate) fn stage_update(
        &self,
        writer: &mut dyn IndexWriter,
        path: &BranchPath,
        update: &HeadUpdate,
    ) -> RevisionResult<Vec<RevisionBranch>> {
        let store = &self.inner.store;
        let mut branch = store.read_pending(writer, path)?;

        if branch.is_deleted() {
            return Err(RevisionError::BranchDeleted(path.clone()));
        }
        if branch.is_stale() && update.rebase_to.is_none() {
            return Err(RevisionError::BranchStale(path.clone()));
        }
        if branch.head_timestamp != update.expected_head || update.timestamp <= branch.head_timestamp {
            return Err(RevisionError::StaleHead {
                branch: path.clone(),
                head: branch.head_timestamp,
                attempted: update.timestamp,
            });
        }

        branch.head_timestamp = update.timestamp;
        if let Some((source, source_timestamp)) = &update.merge_from {
            branch.merge_sources.push(MergePoint {
                source: source.clone(),
                source_timestamp: *source_timestamp,
                timestamp: update.timestamp,
            });
        }

        let mut written = Vec::new();
        if let Some(to) = update.rebase_to {
            branch.rebases.push(Rebase {
                timestamp: update.timestamp,
                from: branch.base_timestamp,
                to,
            });
            branch.base_timestamp = to;
            branch.state = BranchState::Active;

            for child in store.children(path) {
                let mut child = store.read_pending(writer, &child.path)?;
                if child.is_deleted() {
                    continue;
                }
                child.state = BranchState::Stale;
                store.stage(writer, &mut child)?;
                written.push(child);
            }
        }

        store.stage(writer, &mut branch)?;
        written.insert(0, branch);
        Ok(written)
    }

    // ==================== Notification ====================

    pub fn add_listener(&self, listener: impl BranchListener + 'static) {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Publish committed branch documents and notify listeners.
    pub(crate) fn publish(&self, branches: Vec<RevisionBranch>) {
        self.inner.store.publish(branches.iter().cloned());

        let listeners = self.inner.listeners.read().clone();
        for branch in &branches {
            for listener in &listeners {
                listener.on_branch_changed(branch);
            }
        }
    }
}

impl std::fmt::Debug for RevisionBranching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionBranching")
            .field("lock_timeout", &self.inner.lock_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::index::MemoryIndex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> RevisionBranching {
        RevisionBranching::open(Index::new(MemoryIndex::new()), Duration::from_secs(1)).unwrap()
    }

    fn path(p: &str) -> BranchPath {
        BranchPath::new(p).unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let branching = setup();
        let mut metadata = BTreeMap::new();
        metadata.insert("task".to_string(), json!("T-1"));

        let a = branching.create(&BranchPath::main(), "a", metadata).unwrap();
        assert_eq!(a.path, path("MAIN/a"));
        assert_eq!(a.metadata["task"], json!("T-1"));
        assert_eq!(branching.get(&a.path).unwrap(), a);

        let chain = branching.ancestry_chain(&a.path).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].path, BranchPath::main());
    }

    #[test]
    fn test_create_failures() {
        let branching = setup();
        branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();

        let dup = branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::AlreadyExists);

        let missing = branching.create(&path("MAIN/x"), "y", BTreeMap::new()).unwrap_err();
        assert!(missing.is_not_found());

        let invalid = branching.create(&BranchPath::main(), "bad name", BTreeMap::new()).unwrap_err();
        assert_eq!(invalid.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_delete_cascades() {
        let branching = setup();
        branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();
        branching.create(&path("MAIN/a"), "b", BTreeMap::new()).unwrap();

        branching.delete(&path("MAIN/a")).unwrap();
        assert!(branching.get(&path("MAIN/a")).unwrap().is_deleted());
        assert!(branching.get(&path("MAIN/a/b")).unwrap().is_deleted());

        // deleting again is a no-op
        branching.delete(&path("MAIN/a")).unwrap();

        let err = branching.create(&path("MAIN/a"), "c", BTreeMap::new()).unwrap_err();
        assert!(err.is_not_found());

        let err = branching.delete(&BranchPath::main()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_reopen_deleted_path() {
        let branching = setup();
        let a = branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();
        branching.create(&a.path, "b", BTreeMap::new()).unwrap();
        branching.advance_head(&a.path, 10).unwrap();
        branching.delete(&a.path).unwrap();

        let reopened = branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();
        assert!(reopened.is_active());
        assert_eq!(reopened.base_timestamp, 0);
        assert_eq!(reopened.head_timestamp, 0);
        assert_eq!(reopened.segment_start, 10);
        assert_eq!(reopened.version, 4);
        assert_eq!(branching.get(&a.path).unwrap(), reopened);

        let dup = branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::AlreadyExists);

        // the old child stays deleted until it is created again
        assert!(branching.get(&path("MAIN/a/b")).unwrap().is_deleted());
        assert!(branching.create(&a.path, "b", BTreeMap::new()).unwrap().is_active());
    }

    #[test]
    fn test_late_publish_keeps_newer_state() {
        let branching = setup();
        branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();
        branching.create(&path("MAIN/a"), "b", BTreeMap::new()).unwrap();
        let b = path("MAIN/a/b");

        // a commit on b lands in the index, then a delete overtakes its publish
        let committed = branching
            .index()
            .write(|w| branching.stage_update(w, &b, &HeadUpdate::advance(0, 10)))
            .unwrap();
        branching.delete(&path("MAIN/a")).unwrap();
        branching.publish(committed);

        let cached = branching.get(&b).unwrap();
        assert!(cached.is_deleted());
        assert_eq!(cached.head_timestamp, 10);
        let err = branching.create(&b, "c", BTreeMap::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_lock_children_skips_deleted() {
        let branching = setup();
        let main = BranchPath::main();
        branching.create(&main, "a", BTreeMap::new()).unwrap();
        branching.create(&main, "b", BTreeMap::new()).unwrap();
        branching.delete(&path("MAIN/b")).unwrap();

        let held = branching.lock_children(&main, Duration::from_millis(10)).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].path(), &path("MAIN/a"));

        let other = branching.clone();
        let result = std::thread::spawn(move || {
            other
                .lock(&BranchPath::new("MAIN/a").unwrap(), Duration::from_millis(20))
                .map(|_| ())
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(RevisionError::Timeout { .. })));
    }

    #[test]
    fn test_advance_head_is_compare_and_set() {
        let branching = setup();
        let main = BranchPath::main();

        assert_eq!(branching.advance_head(&main, 10).unwrap().head_timestamp, 10);
        let err = branching.advance_head(&main, 10).unwrap_err();
        assert!(err.is_conflict());
        let err = branching.advance_head(&main, 5).unwrap_err();
        assert!(matches!(err, RevisionError::StaleHead { head: 10, attempted: 5, .. }));
    }

    #[test]
    fn test_rebase_update_marks_children_stale() {
        let branching = setup();
        let main = BranchPath::main();
        branching.create(&main, "a", BTreeMap::new()).unwrap();
        branching.create(&path("MAIN/a"), "b", BTreeMap::new()).unwrap();
        branching.advance_head(&main, 10).unwrap();

        let a = path("MAIN/a");
        let update = HeadUpdate {
            expected_head: 0,
            timestamp: 20,
            rebase_to: Some(10),
            merge_from: None,
        };
        let written = branching
            .index()
            .write(|w| branching.stage_update(w, &a, &update))
            .unwrap();
        branching.publish(written);

        let rebased = branching.get(&a).unwrap();
        assert_eq!(rebased.base_timestamp, 10);
        assert_eq!(rebased.head_timestamp, 20);
        assert_eq!(rebased.base_at(19), 0);
        assert!(branching.get(&path("MAIN/a/b")).unwrap().is_stale());

        let err = branching.advance_head(&path("MAIN/a/b"), 30).unwrap_err();
        assert!(matches!(err, RevisionError::BranchStale(_)));
    }

    #[test]
    fn test_listeners_and_metadata() {
        let branching = setup();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        branching.add_listener(move |_: &RevisionBranch| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        branching.create(&BranchPath::main(), "a", BTreeMap::new()).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("owner".to_string(), json!("x"));
        let updated = branching.update_metadata(&path("MAIN/a"), metadata).unwrap();
        assert_eq!(updated.metadata["owner"], json!("x"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lock_times_out() {
        let branching = setup();
        let main = BranchPath::main();
        let held = branching.lock(&main, Duration::from_millis(10)).unwrap();
        assert_eq!(held.path(), &main);

        let other = branching.clone();
        let result = std::thread::spawn(move || {
            other
                .lock(&BranchPath::main(), Duration::from_millis(20))
                .map(|_| ())
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(RevisionError::Timeout { .. })));
    }
}
