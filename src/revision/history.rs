//! Commit history queries.

use std::ops::Bound;

use crate::branch::BranchPath;
use crate::clock::Timestamp;
use crate::error::{RevisionError, RevisionResult};
use crate::index::{document, Document, Filter, Index, Query};
use crate::revision::model::Commit;

/// Filters over commit documents. Results come back newest first.
#[derive(Debug, Clone, Default)]
pub struct CommitQuery {
    pub branch: Option<BranchPath>,
    pub author: Option<String>,
    /// inclusive lower timestamp bound
    pub from: Option<Timestamp>,
    /// inclusive upper timestamp bound
    pub to: Option<Timestamp>,
    /// case-insensitive text the comment must contain
    pub comment: Option<String>,
    pub limit: Option<usize>,
}

impl CommitQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(mut self, branch: BranchPath) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn comment_contains(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_query(&self) -> Query {
        let mut query = Query::new(Commit::TYPE).sort_by("timestamp", true);
        if let Some(branch) = &self.branch {
            query = query.filter(Filter::eq("branchPath", branch.as_str()));
        }
        if let Some(author) = &self.author {
            query = query.filter(Filter::eq("author", author.as_str()));
        }
        if self.from.is_some() || self.to.is_some() {
            let min = self.from.map_or(Bound::Unbounded, Bound::Included);
            let max = self.to.map_or(Bound::Unbounded, Bound::Included);
            query = query.filter(Filter::range("timestamp", min, max));
        }
        if let Some(text) = &self.comment {
            query = query.filter(Filter::contains("comment", text.as_str()));
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

/// Read access to commit documents.
#[derive(Debug, Clone)]
pub struct CommitHistory {
    index: Index,
}

impl CommitHistory {
    pub fn new(index: Index) -> Self {
        Self { index }
    }

    pub fn get(&self, id: &str) -> RevisionResult<Commit> {
        self.index
            .read(|r| document::read::<Commit>(r, id))?
            .ok_or_else(|| RevisionError::CommitNotFound(id.to_string()))
    }

    pub fn search(&self, query: &CommitQuery) -> RevisionResult<Vec<Commit>> {
        Ok(self.index.read(|r| document::search::<Commit>(r, query.to_query()))?)
    }
}
