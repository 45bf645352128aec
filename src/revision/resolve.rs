//! Revision Resolution Engine.
//!
//! Answers "which version of key K is visible on branch B at time T" by
//! walking the segments of a [`BranchView`], nearest first. The first segment
//! holding a visible version decides; a tombstone there means the key is
//! removed and ancestors are not consulted.
//!
//! Branch-scoped search runs the same walk over whole result sets, and
//! `compare` diffs two views by resolving every key either view may see
//! differently.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;

use tracing::warn;

use crate::branch::{BranchPath, RevisionBranching};
use crate::clock::Timestamp;
use crate::error::{RevisionError, RevisionResult};
use crate::index::{document, Document, Filter, Index, IndexReader, Query};
use crate::revision::model::{ChangeKind, Revision, RevisionKey};
use crate::revision::view::{BranchView, Segment};

/// A branch-scoped query over the payloads of one document type.
#[derive(Debug, Clone, Default)]
pub struct RevisionQuery {
    pub doc_type: String,
    /// filters on payload fields, e.g. `Filter::eq("active", true)`
    pub filters: Vec<Filter>,
    pub ids: Option<Vec<String>>,
    pub limit: Option<usize>,
}

impl RevisionQuery {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// How one key differs between two views.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionChange {
    pub key: RevisionKey,
    pub kind: ChangeKind,
    /// visible revision in the base view
    pub before: Option<Revision>,
    /// visible revision in the compared view
    pub after: Option<Revision>,
}

impl RevisionChange {
    /// false for a change that only moved the key to another segment or
    /// timestamp without touching its payload
    pub fn changes_payload(&self) -> bool {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => before.payload != after.payload,
            _ => true,
        }
    }
}

#[derive(Clone)]
pub struct RevisionResolver {
    index: Index,
    branching: RevisionBranching,
}

impl RevisionResolver {
    pub fn new(index: Index, branching: RevisionBranching) -> Self {
        Self { index, branching }
    }

    /// View of `path` as of `as_of` (default: its head).
    pub fn view(&self, path: &BranchPath, as_of: Option<Timestamp>) -> RevisionResult<BranchView> {
        let chain = self.branching.ancestry_chain(path)?;
        BranchView::new(&chain, as_of).ok_or_else(|| RevisionError::BranchNotFound(path.clone()))
    }

    /// The visible revision of `key`, or `None` when absent or removed.
    pub fn resolve(&self, view: &BranchView, key: &RevisionKey) -> RevisionResult<Option<Revision>> {
        self.index.read(|r| self.resolve_with(r, view, key))
    }

    /// Like [`resolve`](Self::resolve), but fails with `NotFound`.
    pub fn get(&self, view: &BranchView, key: &RevisionKey) -> RevisionResult<Revision> {
        self.resolve(view, key)?.ok_or_else(|| RevisionError::RevisionNotFound {
            key: key.clone(),
            branch: view.branch().clone(),
        })
    }

    pub(crate) fn resolve_with(
        &self,
        reader: &dyn IndexReader,
        view: &BranchView,
        key: &RevisionKey,
    ) -> RevisionResult<Option<Revision>> {
        Ok(self.lookup(reader, view, key)?.filter(|rev| !rev.tombstone))
    }

    /// The nearest visible revision of `key`, tombstones included.
    pub(crate) fn lookup(
        &self,
        reader: &dyn IndexReader,
        view: &BranchView,
        key: &RevisionKey,
    ) -> RevisionResult<Option<Revision>> {
        for segment in view.segments() {
            let query = Query::new(Revision::TYPE)
                .filter(Filter::eq("type", key.doc_type.as_str()))
                .filter(Filter::eq("id", key.id.as_str()))
                .filters(segment.visibility());
            let mut hits: Vec<Revision> = document::search(reader, query)?;

            if hits.len() > 1 {
                warn!(
                    target: "revstore::index",
                    key = %key,
                    segment = %segment.path,
                    count = hits.len(),
                    "multiple visible revisions on one segment"
                );
            }
            hits.sort_by_key(|rev| rev.created);
            if let Some(found) = hits.pop() {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// All visible revisions matching `query`, ordered by id.
    pub fn search(&self, view: &BranchView, query: &RevisionQuery) -> RevisionResult<Vec<Revision>> {
        self.index.read(|r| self.search_with(r, view, query))
    }

    fn search_with(
        &self,
        reader: &dyn IndexReader,
        view: &BranchView,
        query: &RevisionQuery,
    ) -> RevisionResult<Vec<Revision>> {
        let payload_filters: Vec<Filter> = query
            .filters
            .iter()
            .cloned()
            .map(|f| f.nested("payload"))
            .collect();

        let mut shadowed: HashSet<String> = HashSet::new();
        let mut found: BTreeMap<String, Revision> = BTreeMap::new();
        let last = view.segments().len().saturating_sub(1);

        for (i, segment) in view.segments().iter().enumerate() {
            let shadow = self.segment_query(segment, query);
            let matching = shadow.clone().filters(payload_filters.iter().cloned());

            for rev in document::search::<Revision>(reader, matching)? {
                if rev.tombstone || shadowed.contains(&rev.id) {
                    continue;
                }
                found.entry(rev.id.clone()).or_insert(rev);
            }

            // everything visible here hides the same ids further up
            if i < last {
                for rev in document::search::<Revision>(reader, shadow)? {
                    shadowed.insert(rev.id);
                }
            }
        }

        let mut results: Vec<Revision> = found.into_values().collect();
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn segment_query(&self, segment: &Segment, query: &RevisionQuery) -> Query {
        let mut q = Query::new(Revision::TYPE)
            .filter(Filter::eq("type", query.doc_type.as_str()))
            .filters(segment.visibility());
        if let Some(ids) = &query.ids {
            q = q.filter(Filter::one_of("id", ids.iter().map(String::as_str)));
        }
        q
    }

    /// Every key whose visible revision differs between `base` and `compare`.
    ///
    /// Only revisions written inside the part of history one view sees and
    /// the other does not can make a difference, so candidates are collected
    /// per segment from that window and then resolved in both views.
    pub fn compare(&self, base: &BranchView, compare: &BranchView) -> RevisionResult<Vec<RevisionChange>> {
        self.index.read(|r| {
            let mut paths: Vec<&BranchPath> = Vec::new();
            for segment in base.segments().iter().chain(compare.segments()) {
                if !paths.contains(&&segment.path) {
                    paths.push(&segment.path);
                }
            }

            let mut candidates: BTreeSet<RevisionKey> = BTreeSet::new();
            for path in paths {
                let window = match (base.segment_for(path), compare.segment_for(path)) {
                    (Some(a), Some(b)) if a == b => continue,
                    (Some(a), Some(b)) if a.since == b.since => {
                        let (lo, hi) = (a.bound.min(b.bound), a.bound.max(b.bound));
                        Filter::any([
                            Filter::range("created", Bound::Excluded(lo), Bound::Included(hi)),
                            Filter::range("revised", Bound::Excluded(lo), Bound::Included(hi)),
                        ])
                    }
                    // the path was reopened in between
                    (Some(a), Some(b)) => Filter::at_most("created", a.bound.max(b.bound)),
                    (Some(segment), None) | (None, Some(segment)) => Filter::at_most("created", segment.bound),
                    (None, None) => continue,
                };
                let query = Query::new(Revision::TYPE)
                    .filter(Filter::eq("branchPath", path.as_str()))
                    .filter(window);
                for rev in document::search::<Revision>(r, query)? {
                    candidates.insert(rev.key());
                }
            }

            let mut changes = Vec::new();
            for key in candidates {
                let before = self.resolve_with(r, base, &key)?;
                let after = self.resolve_with(r, compare, &key)?;
                let kind = match (&before, &after) {
                    (None, None) => continue,
                    (None, Some(_)) => ChangeKind::New,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(b), Some(a)) if b.revision_id() == a.revision_id() => continue,
                    (Some(_), Some(_)) => ChangeKind::Changed,
                };
                changes.push(RevisionChange {
                    key,
                    kind,
                    before,
                    after,
                });
            }
            Ok(changes)
        })
    }
}

impl std::fmt::Debug for RevisionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionResolver").finish_non_exhaustive()
    }
}
