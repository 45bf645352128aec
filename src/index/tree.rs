//! tree operations for the git backend.
//!
//! the root tree holds one directory per document type, and each type
//! directory holds one JSON blob per document:
//!
//! ```text
//! /
//! ├── branch/MAIN.json
//! ├── commit/01j0....json
//! └── revision/concept:1@MAIN@00000000000000000010.json
//! ```

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::index::error::{IndexError, IndexResult};
use crate::index::types::{DocKey, DocPath};

/// A read only handle to a git tree at a specific commit
///
/// it won't change even if new batches are committed.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// names of all document type directories
    pub fn doc_types(&self) -> Vec<String> {
        self.tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| entry.name().map(str::to_string))
            .collect()
    }

    /// the directory for one document type, if any document of it exists
    pub fn type_tree(&self, repo: &'repo Repository, doc_type: &str) -> IndexResult<Option<Tree<'repo>>> {
        match self.tree.get_name(doc_type) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(IndexError::UnexpectedEntryType {
                        path: doc_type.to_string(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(repo.find_tree(entry.id())?))
            }
            None => Ok(None),
        }
    }

    /// blob id of a single document
    pub fn blob_for(&self, repo: &'repo Repository, path: &DocPath) -> IndexResult<Option<Oid>> {
        let Some(type_tree) = self.type_tree(repo, path.doc_type.as_str())? else {
            return Ok(None);
        };

        let file_name = path.key.to_file_name();
        let result = match type_tree.get_name(&file_name) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
            Some(entry) => Err(IndexError::UnexpectedEntryType {
                path: path.as_string(),
                expected: "blob (file)".to_string(),
                found: format!("{:?}", entry.kind()),
            }),
            None => Ok(None),
        };
        result
    }

    /// every document key and blob id of one type, ordered by file name
    pub fn entries(&self, repo: &'repo Repository, doc_type: &str) -> IndexResult<Vec<(DocKey, Oid)>> {
        let Some(type_tree) = self.type_tree(repo, doc_type)? else {
            return Ok(Vec::new());
        };

        let entries = type_tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| {
                let key = DocKey::from_file_name(entry.name()?)?;
                Some((key, entry.id()))
            })
            .collect();
        Ok(entries)
    }

    /// count documents across all types (for stats)
    pub fn count_documents(&self, repo: &'repo Repository) -> IndexResult<usize> {
        let mut count = 0;
        for doc_type in self.doc_types() {
            count += self.entries(repo, &doc_type)?.len();
        }
        Ok(count)
    }
}

/// a mutable tree builder for applying one batch
///
/// changes are accumulated per type directory and a new root tree is
/// produced by `write()`; the original tree is not modified
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// type directories touched by this batch
    modified_types: HashMap<String, Git2TreeBuilder<'repo>>,
    /// tree ids of the type directories before the batch
    original_types: HashMap<String, Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> IndexResult<Self> {
        let root_builder = repo.treebuilder(Some(&tree.tree))?;

        let mut original_types = HashMap::new();
        for entry in tree.tree.iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original_types.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified_types: HashMap::new(),
            original_types,
        })
    }

    pub fn empty(repo: &'repo Repository) -> IndexResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified_types: HashMap::new(),
            original_types: HashMap::new(),
        })
    }

    /// get or create a builder for a type directory
    fn type_builder(&mut self, doc_type: &str) -> IndexResult<&mut Git2TreeBuilder<'repo>> {
        if !self.modified_types.contains_key(doc_type) {
            let builder = match self.original_types.get(doc_type) {
                Some(original_id) => {
                    let original = self.repo.find_tree(*original_id)?;
                    self.repo.treebuilder(Some(&original))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified_types.insert(doc_type.to_string(), builder);
        }
        self.modified_types
            .get_mut(doc_type)
            .ok_or_else(|| IndexError::Internal(format!("missing tree builder for {}", doc_type)))
    }

    /// insert or replace a document blob
    pub fn upsert(&mut self, path: &DocPath, blob: Oid) -> IndexResult<()> {
        let file_name = path.key.to_file_name();
        let builder = self.type_builder(path.doc_type.as_str())?;
        builder.insert(file_name.as_str(), blob, FileMode::Blob.into())?;
        Ok(())
    }

    /// remove a document; returns whether it existed
    pub fn remove(&mut self, path: &DocPath) -> IndexResult<bool> {
        let file_name = path.key.to_file_name();
        let builder = self.type_builder(path.doc_type.as_str())?;
        if builder.get(file_name.as_str())?.is_none() {
            return Ok(false);
        }
        builder.remove(file_name.as_str())?;
        Ok(true)
    }

    /// write all changes and return the new root tree id
    ///
    /// type directories left empty by the batch are dropped from the root
    pub fn write(mut self) -> IndexResult<Oid> {
        for (doc_type, builder) in self.modified_types {
            if builder.len() == 0 {
                if self.root_builder.get(doc_type.as_str())?.is_some() {
                    self.root_builder.remove(doc_type.as_str())?;
                }
                continue;
            }
            let type_tree_id = builder.write()?;
            self.root_builder.insert(doc_type.as_str(), type_tree_id, FileMode::Tree.into())?;
        }
        Ok(self.root_builder.write()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn path(doc_type: &str, key: &str) -> DocPath {
        DocPath::new(doc_type, key).unwrap()
    }

    #[test]
    fn test_empty_tree_has_no_types() {
        let (_dir, repo) = setup_repo();
        let tree_id = TreeMutator::empty(&repo).unwrap().write().unwrap();
        let handle = TreeHandle::new(repo.find_tree(tree_id).unwrap());
        assert!(handle.doc_types().is_empty());
        assert_eq!(handle.count_documents(&repo).unwrap(), 0);
    }

    #[test]
    fn test_upsert_and_list_entries() {
        let (_dir, repo) = setup_repo();
        let blob = repo.blob(b"{}").unwrap();

        let mut mutator = TreeMutator::empty(&repo).unwrap();
        mutator.upsert(&path("branch", "MAIN"), blob).unwrap();
        mutator.upsert(&path("branch", "MAIN/a"), blob).unwrap();
        mutator.upsert(&path("commit", "c1"), blob).unwrap();
        let tree_id = mutator.write().unwrap();

        let handle = TreeHandle::new(repo.find_tree(tree_id).unwrap());
        let mut types = handle.doc_types();
        types.sort();
        assert_eq!(types, vec!["branch", "commit"]);

        let keys: Vec<_> = handle
            .entries(&repo, "branch")
            .unwrap()
            .into_iter()
            .map(|(key, _)| key.into_string())
            .collect();
        // file name order: "MAIN%2Fa.json" sorts before "MAIN.json"
        assert_eq!(keys, vec!["MAIN/a", "MAIN"]);
        assert_eq!(handle.blob_for(&repo, &path("branch", "MAIN/a")).unwrap(), Some(blob));
        assert_eq!(handle.blob_for(&repo, &path("branch", "MAIN/b")).unwrap(), None);
        assert_eq!(handle.blob_for(&repo, &path("revision", "x")).unwrap(), None);
    }

    #[test]
    fn test_remove_drops_empty_directory() {
        let (_dir, repo) = setup_repo();
        let blob = repo.blob(b"{}").unwrap();

        let mut mutator = TreeMutator::empty(&repo).unwrap();
        mutator.upsert(&path("commit", "c1"), blob).unwrap();
        let tree_id = mutator.write().unwrap();
        let handle = TreeHandle::new(repo.find_tree(tree_id).unwrap());

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        assert!(mutator.remove(&path("commit", "c1")).unwrap());
        assert!(!mutator.remove(&path("commit", "c2")).unwrap());
        let tree_id = mutator.write().unwrap();

        let handle = TreeHandle::new(repo.find_tree(tree_id).unwrap());
        assert!(handle.doc_types().is_empty());
    }
}
