//! In-memory branch tree.
//!
//! Branches are kept in a flat `Vec` with parent/child links stored as
//! indices, so ancestry walks are index chases instead of repeated path
//! parsing and index lookups.

use std::collections::HashMap;

use crate::branch::model::RevisionBranch;
use crate::branch::path::BranchPath;

struct Node {
    branch: RevisionBranch,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Default)]
pub(crate) struct BranchArena {
    nodes: Vec<Node>,
    by_path: HashMap<BranchPath, usize>,
}

impl BranchArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a branch. Returns `false` (and changes nothing) when
    /// the parent of a new branch is unknown. A known branch is only replaced
    /// by a version at least as new.
    pub fn upsert(&mut self, branch: RevisionBranch) -> bool {
        if let Some(&idx) = self.by_path.get(&branch.path) {
            if branch.version >= self.nodes[idx].branch.version {
                self.nodes[idx].branch = branch;
            }
            return true;
        }

        let parent = match &branch.parent_path {
            Some(parent_path) => match self.by_path.get(parent_path) {
                Some(&idx) => Some(idx),
                None => return false,
            },
            None => None,
        };

        let idx = self.nodes.len();
        self.by_path.insert(branch.path.clone(), idx);
        self.nodes.push(Node {
            branch,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(idx);
        }
        true
    }

    pub fn get(&self, path: &BranchPath) -> Option<&RevisionBranch> {
        self.by_path.get(path).map(|&idx| &self.nodes[idx].branch)
    }

    pub fn contains(&self, path: &BranchPath) -> bool {
        self.by_path.contains_key(path)
    }

    /// the branch itself followed by its ancestors up to the root
    pub fn ancestry(&self, path: &BranchPath) -> Option<Vec<&RevisionBranch>> {
        let mut next = self.by_path.get(path).copied();
        let mut chain = Vec::new();
        while let Some(idx) = next {
            let node = &self.nodes[idx];
            chain.push(&node.branch);
            next = node.parent;
        }
        if chain.is_empty() {
            None
        } else {
            Some(chain)
        }
    }

    pub fn children(&self, path: &BranchPath) -> Vec<&RevisionBranch> {
        match self.by_path.get(path) {
            Some(&idx) => self.nodes[idx]
                .children
                .iter()
                .map(|&child| &self.nodes[child].branch)
                .collect(),
            None => Vec::new(),
        }
    }

    /// all descendants, parents before children
    pub fn descendants(&self, path: &BranchPath) -> Vec<&RevisionBranch> {
        let mut result = Vec::new();
        let Some(&start) = self.by_path.get(path) else {
            return result;
        };
        let mut queue = std::collections::VecDeque::from(self.nodes[start].children.clone());
        while let Some(idx) = queue.pop_front() {
            let node = &self.nodes[idx];
            result.push(&node.branch);
            queue.extend(node.children.iter().copied());
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = &RevisionBranch> {
        self.nodes.iter().map(|node| &node.branch)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
