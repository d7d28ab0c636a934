use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::object::loose::{find_by_prefix, read_header, read_object_of_kind, write_object};
use crate::oid::{ObjectKind, Oid, OID_HEXSZ};
use crate::repo::Repo;
use crate::types::{sort_entries, validate_entry_name, FileMode, Tree, TreeEntry};

/// traversal order for [`Tree::walk`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkMode {
    /// a subtree entry is visited before its children
    PreOrder,
    /// a subtree entry is visited after its children
    PostOrder,
}

/// what a tree walk callback wants to happen next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeWalkResult {
    Continue,
    /// do not descend into this entry (pre-order only)
    Skip,
    /// stop the walk; surfaces as `Error::UserCancelled`
    Abort,
}

/// write a tree from a set of entries, in any order
pub fn write_tree(repo: &Repo, entries: &[TreeEntry]) -> Result<Oid> {
    let mut sorted = entries.to_vec();
    for entry in &sorted {
        validate_entry_name(&entry.name)?;
    }
    sort_entries(&mut sorted);
    let oid = write_object(repo, ObjectKind::Tree, &Tree::serialize(&sorted))?;
    tracing::debug!(oid = %oid, entries = sorted.len(), "wrote tree");
    Ok(oid)
}

/// read a tree from the object store
pub fn read_tree(repo: &Repo, oid: &Oid) -> Result<Tree> {
    let data = read_object_of_kind(repo, oid, ObjectKind::Tree)?;
    Tree::parse(*oid, &data)
}

/// look up a tree by an abbreviated hex id
///
/// only tree objects are candidates: a blob sharing the prefix does not make
/// the lookup ambiguous.
pub fn lookup_prefix(repo: &Repo, prefix: &str) -> Result<Tree> {
    if prefix.len() == OID_HEXSZ {
        return read_tree(repo, &Oid::from_hex(prefix)?);
    }

    let mut trees = Vec::new();
    for oid in find_by_prefix(repo, prefix)? {
        if let (ObjectKind::Tree, _) = read_header(repo, &oid)? {
            trees.push(oid);
        }
    }

    match trees.as_slice() {
        [] => Err(Error::PrefixNotFound(prefix.to_string())),
        [oid] => read_tree(repo, oid),
        _ => Err(Error::Ambiguous(format!(
            "{} trees match prefix {}",
            trees.len(),
            prefix
        ))),
    }
}

impl Tree {
    /// resolve a slash-separated path below this tree, loading subtrees
    pub fn entry_by_path(&self, repo: &Repo, path: &str) -> Result<TreeEntry> {
        let components: Vec<&str> = path.split('/').collect();
        if path.is_empty() || components.iter().any(|c| c.is_empty()) {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let (last, parents) = components
            .split_last()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;

        let mut owned: Option<Tree> = None;
        for component in parents {
            let current = owned.as_ref().unwrap_or(self);
            let entry = current
                .entry_by_name(component)
                .filter(|e| e.is_tree())
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            owned = Some(read_tree(repo, &entry.oid)?);
        }

        owned
            .as_ref()
            .unwrap_or(self)
            .entry_by_name(last)
            .cloned()
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    /// depth-first walk over every entry, loading subtrees as needed
    ///
    /// the callback receives the parent path (with a trailing `/`, empty at
    /// the top) and the entry.
    pub fn walk<F>(&self, repo: &Repo, mode: WalkMode, mut callback: F) -> Result<()>
    where
        F: FnMut(&str, &TreeEntry) -> TreeWalkResult,
    {
        if walk_tree(repo, self, "", mode, &mut callback)? {
            Ok(())
        } else {
            Err(Error::UserCancelled)
        }
    }
}

/// returns Ok(false) when the callback aborted
fn walk_tree<F>(
    repo: &Repo,
    tree: &Tree,
    root: &str,
    mode: WalkMode,
    callback: &mut F,
) -> Result<bool>
where
    F: FnMut(&str, &TreeEntry) -> TreeWalkResult,
{
    for entry in tree.iter() {
        let mut descend = entry.is_tree();

        if mode == WalkMode::PreOrder {
            match callback(root, entry) {
                TreeWalkResult::Continue => {}
                TreeWalkResult::Skip => descend = false,
                TreeWalkResult::Abort => return Ok(false),
            }
        }

        if descend {
            let subtree = read_tree(repo, &entry.oid)?;
            let sub_root = format!("{}{}/", root, entry.name);
            if !walk_tree(repo, &subtree, &sub_root, mode, callback)? {
                return Ok(false);
            }
        }

        if mode == WalkMode::PostOrder && callback(root, entry) == TreeWalkResult::Abort {
            return Ok(false);
        }
    }
    Ok(true)
}

/// build and store the nested trees described by a flat index
pub fn write_tree_from_index(repo: &Repo, index: &Index) -> Result<Oid> {
    // directory path ("" for the root) -> its direct entries
    let mut dirs: BTreeMap<String, Vec<TreeEntry>> = BTreeMap::new();
    dirs.insert(String::new(), Vec::new());

    for (path, entry) in index.iter() {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        };
        dirs.entry(dir.to_string())
            .or_default()
            .push(TreeEntry::new(name, entry.oid, entry.mode));

        // make sure every ancestor directory exists
        let mut ancestor = dir;
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            dirs.entry(parent.to_string()).or_default();
            ancestor = parent;
        }
    }

    // deepest directories first so children are written before parents
    let mut order: Vec<String> = dirs.keys().cloned().collect();
    order.sort_by_key(|d| std::cmp::Reverse(depth(d)));

    let mut root = Oid::ZERO;
    for dir in order {
        let entries = dirs.remove(&dir).unwrap_or_default();
        let oid = write_tree(repo, &entries)?;
        if dir.is_empty() {
            root = oid;
            continue;
        }
        let (parent, name) = match dir.rsplit_once('/') {
            Some((parent, name)) => (parent.to_string(), name.to_string()),
            None => (String::new(), dir.clone()),
        };
        dirs.entry(parent)
            .or_default()
            .push(TreeEntry::new(name, oid, FileMode::Tree));
    }

    Ok(root)
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::write_blob;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        (dir, repo)
    }

    /// root: a.txt, src/{lib.rs, util/mod.rs}, z.txt
    fn sample_tree(repo: &Repo) -> Tree {
        let blob = write_blob(repo, b"content\n").unwrap();
        let util = write_tree(repo, &[TreeEntry::new("mod.rs", blob, FileMode::Blob)]).unwrap();
        let src = write_tree(
            repo,
            &[
                TreeEntry::new("util", util, FileMode::Tree),
                TreeEntry::new("lib.rs", blob, FileMode::Blob),
            ],
        )
        .unwrap();
        let root = write_tree(
            repo,
            &[
                TreeEntry::new("z.txt", blob, FileMode::Blob),
                TreeEntry::new("src", src, FileMode::Tree),
                TreeEntry::new("a.txt", blob, FileMode::Blob),
            ],
        )
        .unwrap();
        read_tree(repo, &root).unwrap()
    }

    #[test]
    fn test_empty_tree_has_git_id() {
        let (_dir, repo) = test_repo();
        let oid = write_tree(&repo, &[]).unwrap();
        assert_eq!(oid.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
        assert!(read_tree(&repo, &oid).unwrap().is_empty());
    }

    #[test]
    fn test_write_tree_rejects_bad_names() {
        let (_dir, repo) = test_repo();
        let entry = TreeEntry::new("a/b", Oid::ZERO, FileMode::Blob);
        assert!(matches!(
            write_tree(&repo, &[entry]),
            Err(Error::InvalidEntryName(_))
        ));
    }

    #[test]
    fn test_read_tree_missing_and_wrong_kind() {
        let (_dir, repo) = test_repo();
        assert!(matches!(
            read_tree(&repo, &Oid::from_bytes([0x22; 20])),
            Err(Error::ObjectNotFound(_))
        ));
        let blob = write_blob(&repo, b"x").unwrap();
        assert!(matches!(
            read_tree(&repo, &blob),
            Err(Error::InvalidObjectType { .. })
        ));
    }

    #[test]
    fn test_lookup_prefix() {
        let (_dir, repo) = test_repo();
        let tree = sample_tree(&repo);
        let hex = tree.id().to_hex();

        assert_eq!(lookup_prefix(&repo, &hex[..7]).unwrap().id(), tree.id());
        assert_eq!(lookup_prefix(&repo, &hex).unwrap().id(), tree.id());
        assert!(lookup_prefix(&repo, "0000000").unwrap_err().is_not_found());
        assert!(lookup_prefix(&repo, "abc").is_err());
    }

    #[test]
    fn test_lookup_prefix_ambiguous() {
        let (_dir, repo) = test_repo();
        // write trees until two share their first four hex digits
        let mut seen: std::collections::HashMap<String, Oid> = Default::default();
        let blob = write_blob(&repo, b"x").unwrap();
        let mut prefix = None;
        for i in 0..5000 {
            let oid = write_tree(
                &repo,
                &[TreeEntry::new(format!("f{}", i), blob, FileMode::Blob)],
            )
            .unwrap();
            let key = oid.to_hex()[..4].to_string();
            if seen.insert(key.clone(), oid).is_some() {
                prefix = Some(key);
                break;
            }
        }
        let prefix = prefix.unwrap();
        assert!(matches!(
            lookup_prefix(&repo, &prefix),
            Err(Error::Ambiguous(_))
        ));
    }

    #[test]
    fn test_entry_by_path() {
        let (_dir, repo) = test_repo();
        let tree = sample_tree(&repo);

        let entry = tree.entry_by_path(&repo, "src/util/mod.rs").unwrap();
        assert_eq!(entry.name, "mod.rs");
        assert_eq!(entry.mode, FileMode::Blob);

        assert!(tree.entry_by_path(&repo, "src/util").unwrap().is_tree());
        assert!(tree.entry_by_path(&repo, "a.txt").is_ok());

        assert!(matches!(
            tree.entry_by_path(&repo, "src/missing.rs"),
            Err(Error::PathNotFound(_))
        ));
        // a.txt is a blob, cannot descend through it
        assert!(matches!(
            tree.entry_by_path(&repo, "a.txt/x"),
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            tree.entry_by_path(&repo, "src//lib.rs"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            tree.entry_by_path(&repo, ""),
            Err(Error::InvalidPath(_))
        ));
    }

    fn collect(tree: &Tree, repo: &Repo, mode: WalkMode, skip: Option<&str>) -> Vec<String> {
        let mut seen = Vec::new();
        tree.walk(repo, mode, |root, entry| {
            seen.push(format!("{}{}", root, entry.name));
            if Some(entry.name.as_str()) == skip {
                TreeWalkResult::Skip
            } else {
                TreeWalkResult::Continue
            }
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_walk_orders() {
        let (_dir, repo) = test_repo();
        let tree = sample_tree(&repo);

        assert_eq!(
            collect(&tree, &repo, WalkMode::PreOrder, None),
            vec!["a.txt", "src", "src/lib.rs", "src/util", "src/util/mod.rs", "z.txt"]
        );
        assert_eq!(
            collect(&tree, &repo, WalkMode::PostOrder, None),
            vec!["a.txt", "src/lib.rs", "src/util/mod.rs", "src/util", "src", "z.txt"]
        );
    }

    #[test]
    fn test_walk_skip_and_abort() {
        let (_dir, repo) = test_repo();
        let tree = sample_tree(&repo);

        assert_eq!(
            collect(&tree, &repo, WalkMode::PreOrder, Some("src")),
            vec!["a.txt", "src", "z.txt"]
        );
        // skip means nothing in post-order
        assert_eq!(collect(&tree, &repo, WalkMode::PostOrder, Some("util")).len(), 6);

        let mut count = 0;
        let result = tree.walk(&repo, WalkMode::PreOrder, |_, _| {
            count += 1;
            if count == 2 {
                TreeWalkResult::Abort
            } else {
                TreeWalkResult::Continue
            }
        });
        assert!(matches!(result, Err(Error::UserCancelled)));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_write_tree_from_index() {
        let (_dir, repo) = test_repo();
        let blob = write_blob(&repo, b"content\n").unwrap();

        let mut index = Index::default();
        index.add_entry("a.txt", blob, FileMode::Blob);
        index.add_entry("src/lib.rs", blob, FileMode::Blob);
        index.add_entry("src/util/mod.rs", blob, FileMode::Blob);
        index.add_entry("z.txt", blob, FileMode::Blob);

        let oid = write_tree_from_index(&repo, &index).unwrap();
        assert_eq!(oid, sample_tree(&repo).id());
    }
}
