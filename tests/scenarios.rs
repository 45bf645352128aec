//! End-to-end branch, commit and merge scenarios against both backends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use revstore::{
    BranchPath, ConflictKind, Divergence, ErrorKind, MergeRequest, RebaseRequest, RevisionBranch, RevisionError,
    RevisionKey, RevisionQuery, RevisionStore, SequenceClock, StoreConfig,
};
use revstore::index::Filter;
use serde_json::{json, Value};
use tempfile::TempDir;

fn memory_store() -> RevisionStore {
    RevisionStore::open_with_config(StoreConfig::memory().clock(SequenceClock::with_step(0, 10))).unwrap()
}

fn git_store() -> (TempDir, RevisionStore) {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path()).clock(SequenceClock::with_step(0, 10));
    let store = RevisionStore::open_with_config(config).unwrap();
    (dir, store)
}

fn key(id: &str) -> RevisionKey {
    RevisionKey::new("concept", id)
}

fn payload(store: &RevisionStore, branch: &str, id: &str, as_of: Option<u64>) -> Option<Value> {
    store
        .resolve(branch, &key(id), as_of)
        .unwrap()
        .map(|rev| rev.payload)
}

/// write `value` to `id` on `branch`, based on whatever is visible now
fn set(store: &RevisionStore, branch: &str, id: &str, value: Value) -> u64 {
    let mut staging = store.staging(branch).unwrap();
    match store.resolve(branch, &key(id), None).unwrap() {
        Some(old) => staging.stage_change(&old, value).unwrap(),
        None => staging.stage_new(key(id), value).unwrap(),
    }
    staging.commit("tester", format!("set {}", id)).unwrap().timestamp
}

fn fork(store: &RevisionStore, parent: &str, name: &str) -> RevisionBranch {
    store.create_branch(parent, name, BTreeMap::new()).unwrap()
}

fn run_documented_scenarios(store: &RevisionStore) {
    // 1. a branch forked before a commit never sees it
    let a = fork(store, "MAIN", "a");
    assert_eq!(a.base_timestamp, 0);
    assert_eq!(set(store, "MAIN", "X", json!({"v": 1})), 10);
    assert_eq!(payload(store, "MAIN/a", "X", None), None);

    // 2. a branch forked afterwards inherits it
    let b = fork(store, "MAIN", "b");
    assert_eq!(b.base_timestamp, 10);
    assert_eq!(payload(store, "MAIN/b", "X", None), Some(json!({"v": 1})));

    // 3. child changes and time travel
    assert_eq!(set(store, "MAIN/b", "X", json!({"v": 2})), 20);
    assert_eq!(payload(store, "MAIN/b", "X", Some(20)), Some(json!({"v": 2})));
    assert_eq!(payload(store, "MAIN/b", "X", Some(15)), Some(json!({"v": 1})));
    assert_eq!(payload(store, "MAIN", "X", Some(20)), Some(json!({"v": 1})));

    // 4. optimistic concurrency on the same key
    set(store, "MAIN", "Y", json!({"v": 1}));
    let ra = store.get("MAIN", &key("Y"), None).unwrap();
    let mut s1 = store.staging("MAIN").unwrap();
    let mut s2 = store.staging("MAIN").unwrap();
    s1.stage_change(&ra, json!({"v": "s1"})).unwrap();
    s2.stage_change(&ra, json!({"v": "s2"})).unwrap();
    s1.commit("one", "first").unwrap();
    let err = s2.commit("two", "second").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.conflicts()[0].key, key("Y"));
    assert_eq!(payload(store, "MAIN", "Y", None), Some(json!({"v": "s1"})));

    // 5. both sides changed Z since the fork
    set(store, "MAIN", "Z", json!({"v": 1}));
    fork(store, "MAIN", "c");
    set(store, "MAIN/c", "Z", json!({"v": 2}));
    set(store, "MAIN", "Z", json!({"v": 3}));
    let head = store.branch("MAIN").unwrap().head_timestamp;
    let err = store.merge_branches("MAIN/c", "MAIN", "merger").unwrap_err();
    assert!(err.is_conflict());
    let conflicting: Vec<_> = err.conflicts().iter().map(|c| c.key.id.clone()).collect();
    assert_eq!(conflicting, vec!["Z".to_string()]);
    assert_eq!(store.branch("MAIN").unwrap().head_timestamp, head);
}

#[test]
fn test_documented_scenarios_in_memory() {
    run_documented_scenarios(&memory_store());
}

#[test]
fn test_documented_scenarios_on_git() {
    let (_dir, store) = git_store();
    run_documented_scenarios(&store);
}

#[test]
fn test_sibling_isolation() {
    let store = memory_store();
    fork(&store, "MAIN", "left");
    fork(&store, "MAIN", "right");
    set(&store, "MAIN/left", "X", json!("left"));
    assert_eq!(payload(&store, "MAIN/right", "X", None), None);
    assert_eq!(payload(&store, "MAIN", "X", None), None);
}

#[test]
fn test_failed_commit_writes_nothing() {
    let (_dir, store) = git_store();
    set(&store, "MAIN", "X", json!(1));
    let before = store.stats().unwrap().unwrap();

    let stale = store.get("MAIN", &key("X"), None).unwrap();
    set(&store, "MAIN", "X", json!(2));
    let after_second = store.stats().unwrap().unwrap();
    assert_eq!(after_second.batches, before.batches + 1);

    let mut staging = store.staging("MAIN").unwrap();
    staging.stage_change(&stale, json!(3)).unwrap();
    staging.stage_new(key("W"), json!(1)).unwrap();
    assert!(staging.commit("tester", "stale").is_err());

    let after_failure = store.stats().unwrap().unwrap();
    assert_eq!(after_failure, after_second);
    assert_eq!(payload(&store, "MAIN", "W", None), None);
    let commits = store.commits(&revstore::CommitQuery::new().comment_contains("stale")).unwrap();
    assert!(commits.is_empty());
}

#[test]
fn test_branch_search() {
    let store = memory_store();
    set(&store, "MAIN", "1", json!({"term": "heart", "active": true}));
    set(&store, "MAIN", "2", json!({"term": "lung", "active": true}));
    fork(&store, "MAIN", "task");
    set(&store, "MAIN/task", "2", json!({"term": "lung", "active": false}));
    set(&store, "MAIN/task", "3", json!({"term": "liver", "active": true}));

    let active = RevisionQuery::new("concept").filter(Filter::eq("active", true));
    let ids = |branch: &str, as_of: Option<u64>| -> Vec<String> {
        store
            .search(branch, &active, as_of)
            .unwrap()
            .into_iter()
            .map(|rev| rev.id)
            .collect()
    };
    assert_eq!(ids("MAIN/task", None), vec!["1", "3"]);
    assert_eq!(ids("MAIN", None), vec!["1", "2"]);
    assert_eq!(ids("MAIN/task", Some(20)), vec!["1", "2"]);
}

#[test]
fn test_task_workflow_merge_and_rebase() {
    let store = memory_store();
    set(&store, "MAIN", "1", json!({"term": "heart"}));
    fork(&store, "MAIN", "project");
    fork(&store, "MAIN/project", "task");

    set(&store, "MAIN/project/task", "2", json!({"term": "lung"}));
    assert_eq!(store.branch_state("MAIN/project/task", "MAIN/project").unwrap(), Divergence::Forward);

    let commit = store
        .merge_branches("MAIN/project/task", "MAIN/project", "alice")
        .unwrap()
        .unwrap();
    assert_eq!(commit.comment, "Merge MAIN/project/task into MAIN/project");
    assert_eq!(payload(&store, "MAIN/project", "2", None), Some(json!({"term": "lung"})));
    assert_eq!(store.branch_state("MAIN/project/task", "MAIN/project").unwrap(), Divergence::UpToDate);

    // MAIN moves on; the project picks it up with a rebase
    set(&store, "MAIN", "1", json!({"term": "Heart"}));
    assert_eq!(payload(&store, "MAIN/project", "1", None), Some(json!({"term": "heart"})));
    store.rebase_branch("MAIN/project", "alice").unwrap().unwrap();
    assert_eq!(payload(&store, "MAIN/project", "1", None), Some(json!({"term": "Heart"})));

    // the task is stale until it is rebased too
    assert!(store.branch("MAIN/project/task").unwrap().is_stale());
    let mut staging = store.staging("MAIN/project/task").unwrap();
    staging.stage_new(key("3"), json!({})).unwrap();
    let err = staging.commit("alice", "").unwrap_err();
    assert!(matches!(err, RevisionError::BranchStale(_)));

    store
        .rebase(RebaseRequest::new(BranchPath::new("MAIN/project/task").unwrap()).author("alice"))
        .unwrap()
        .unwrap();
    assert_eq!(payload(&store, "MAIN/project/task", "1", None), Some(json!({"term": "Heart"})));

    // and the project lands on MAIN
    let commit = store.merge_branches("MAIN/project", "MAIN", "alice").unwrap().unwrap();
    assert_eq!(commit.changes.len(), 1);
    assert_eq!(payload(&store, "MAIN", "2", None), Some(json!({"term": "lung"})));
}

#[test]
fn test_merge_with_exclusion_and_comment() {
    let store = memory_store();
    fork(&store, "MAIN", "task");
    set(&store, "MAIN/task", "1", json!(1));
    set(&store, "MAIN/task", "2", json!(2));

    let request = MergeRequest::new(BranchPath::new("MAIN/task").unwrap(), BranchPath::main())
        .author("bob")
        .comment("promote 1")
        .exclude(key("2"));
    let commit = store.merge(request).unwrap().unwrap();
    assert_eq!(commit.comment, "promote 1");
    assert_eq!(payload(&store, "MAIN", "1", None), Some(json!(1)));
    assert_eq!(payload(&store, "MAIN", "2", None), None);
}

#[test]
fn test_deleted_branch_rejects_writes_but_keeps_history() {
    let store = memory_store();
    fork(&store, "MAIN", "old");
    let t = set(&store, "MAIN/old", "X", json!(1));
    store.delete_branch("MAIN/old").unwrap();

    assert_eq!(payload(&store, "MAIN/old", "X", Some(t)), Some(json!(1)));
    let mut staging = store.staging("MAIN/old").unwrap();
    staging.stage_new(key("Y"), json!(1)).unwrap();
    assert_eq!(staging.commit("t", "").unwrap_err().kind(), ErrorKind::BadRequest);

    let err = store.merge_branches("MAIN/old", "MAIN", "t").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    let err = store.delete_branch("MAIN").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn test_recreated_branch_starts_empty() {
    let store = memory_store();
    fork(&store, "MAIN", "a");
    set(&store, "MAIN/a", "X", json!({"v": 1}));
    store.delete_branch("MAIN/a").unwrap();

    let reopened = fork(&store, "MAIN", "a");
    assert!(!reopened.is_deleted());
    assert_eq!(payload(&store, "MAIN/a", "X", None), None);
    assert!(store.search("MAIN/a", &RevisionQuery::new("concept"), None).unwrap().is_empty());

    set(&store, "MAIN/a", "X", json!({"v": 2}));
    assert_eq!(payload(&store, "MAIN/a", "X", None), Some(json!({"v": 2})));
    assert!(store.merge_branches("MAIN/a", "MAIN", "alice").unwrap().is_some());
    assert_eq!(payload(&store, "MAIN", "X", None), Some(json!({"v": 2})));
}

#[test]
fn test_rebase_conflict_reports_kind() {
    let store = memory_store();
    set(&store, "MAIN", "X", json!(1));
    fork(&store, "MAIN", "task");
    set(&store, "MAIN/task", "X", json!(2));
    set(&store, "MAIN", "X", json!(3));

    let err = store.rebase_branch("MAIN/task", "t").unwrap_err();
    assert_eq!(err.conflicts()[0].kind, ConflictKind::ChangedInSourceAndTarget);
    assert_eq!(payload(&store, "MAIN/task", "X", None), Some(json!(2)));
}

#[test]
fn test_concurrent_commits_on_different_branches() {
    let store = memory_store();
    let branches: Vec<String> = (0..4)
        .map(|i| fork(&store, "MAIN", &format!("b{}", i)).path.to_string())
        .collect();

    let handles: Vec<_> = branches
        .iter()
        .cloned()
        .map(|branch| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    set(&store, &branch, &format!("k{}", i), json!(i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for branch in &branches {
        let all = store.search(branch, &RevisionQuery::new("concept"), None).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(store.branch(branch).unwrap().head_timestamp % 10, 0);
    }
    assert!(store.search("MAIN", &RevisionQuery::new("concept"), None).unwrap().is_empty());
}

#[test]
fn test_listener_sees_commits() {
    let store = memory_store();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    store.add_listener(move |branch: &RevisionBranch| {
        if branch.path.is_root() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    set(&store, "MAIN", "X", json!(1));
    set(&store, "MAIN", "X", json!(2));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
