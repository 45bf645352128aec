//! Branch views: which part of which segment is visible from a branch at a
//! point in time.

use crate::branch::{BranchPath, RevisionBranch};
use crate::clock::Timestamp;
use crate::index::Filter;

/// One ancestry segment and the latest timestamp visible on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: BranchPath,
    pub bound: Timestamp,
    /// revisions created at or before this belong to a deleted branch that
    /// had the same path
    pub since: Timestamp,
}

impl Segment {
    fn of(branch: &RevisionBranch, bound: Timestamp) -> Self {
        Self {
            path: branch.path.clone(),
            bound,
            since: branch.segment_start,
        }
    }

    /// index filters selecting the revisions of this segment visible at `bound`
    pub(crate) fn visibility(&self) -> Vec<Filter> {
        let mut filters = vec![
            Filter::eq("branchPath", self.path.as_str()),
            Filter::at_most("created", self.bound),
            Filter::any([Filter::missing("revised"), Filter::after("revised", self.bound)]),
        ];
        if self.since > 0 {
            filters.push(Filter::after("created", self.since));
        }
        filters
    }
}

/// A branch as seen at one timestamp.
///
/// The first segment is the branch itself, bounded by `as_of` (clamped to its
/// head). Every further segment is the next ancestor, bounded by the base the
/// child had at the previous bound, never later than the previous bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchView {
    branch: BranchPath,
    as_of: Timestamp,
    segments: Vec<Segment>,
}

impl BranchView {
    /// `chain` is the ancestry chain of the branch, the branch itself first
    pub(crate) fn new(chain: &[RevisionBranch], as_of: Option<Timestamp>) -> Option<Self> {
        let first = chain.first()?;
        let head = first.head_timestamp;
        let as_of = as_of.map_or(head, |t| t.min(head));

        let mut segments = Vec::with_capacity(chain.len());
        let mut bound = as_of;
        segments.push(Segment::of(first, bound));
        for pair in chain.windows(2) {
            bound = bound.min(pair[0].base_at(bound));
            segments.push(Segment::of(&pair[1], bound));
        }

        Some(Self {
            branch: first.path.clone(),
            as_of,
            segments,
        })
    }

    pub fn branch(&self) -> &BranchPath {
        &self.branch
    }

    pub fn as_of(&self) -> Timestamp {
        self.as_of
    }

    /// nearest segment first
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn bound_for(&self, path: &BranchPath) -> Option<Timestamp> {
        self.segment_for(path).map(|s| s.bound)
    }

    pub fn segment_for(&self, path: &BranchPath) -> Option<&Segment> {
        self.segments.iter().find(|s| &s.path == path)
    }
}
