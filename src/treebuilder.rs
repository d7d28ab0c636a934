//! mutable working set used to assemble a new tree object

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::object::write_tree;
use crate::oid::Oid;
use crate::repo::Repo;
use crate::types::{validate_entry_name, FileMode, Tree, TreeEntry};

/// collects entries by name and writes them out as one tree
///
/// inserted ids are trusted: neither their existence nor whether the mode
/// matches the pointee is checked.
#[derive(Clone, Debug, Default)]
pub struct TreeBuilder {
    entries: BTreeMap<String, TreeEntry>,
}

impl TreeBuilder {
    /// start empty, or from a copy of an existing tree's entries
    pub fn new(source: Option<&Tree>) -> Self {
        let entries = source
            .map(|tree| {
                tree.iter()
                    .map(|e| (e.name.clone(), e.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    /// add or replace the entry called `name`
    pub fn insert(&mut self, name: &str, oid: Oid, mode: FileMode) -> Result<&TreeEntry> {
        validate_entry_name(name)?;
        self.entries
            .insert(name.to_string(), TreeEntry::new(name, oid, mode));
        Ok(&self.entries[name])
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    /// drop every entry for which `predicate` returns true
    pub fn filter<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&TreeEntry) -> bool,
    {
        self.entries.retain(|_, entry| !predicate(entry));
    }

    /// entries in insertion-independent name order
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// serialize in canonical order and store the tree
    pub fn write(&self, repo: &Repo) -> Result<Oid> {
        let entries: Vec<TreeEntry> = self.entries.values().cloned().collect();
        write_tree(repo, &entries)
    }
}
