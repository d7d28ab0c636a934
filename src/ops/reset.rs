//! moving HEAD, and optionally the index and working tree, to a commit

use crate::error::{Error, Result};
use crate::index::{Index, IndexEntry};
use crate::object::{peel_to_commit, read_tree, TreeWalkResult, WalkMode};
use crate::oid::Oid;
use crate::ops::checkout::checkout_index;
use crate::pathspec::Pathspec;
use crate::refs::update_head;
use crate::repo::Repo;
use crate::types::Tree;

/// how much state a reset rewrites; ordered by scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResetKind {
    /// HEAD only
    Soft,
    /// HEAD and the index
    Mixed,
    /// HEAD, the index and tracked working files
    Hard,
}

/// point HEAD (or the branch it names) at `target`
///
/// `target` may be an annotated tag; it is peeled to the commit it names.
/// a hard reset keeps untracked and ignored files.
pub fn reset(repo: &Repo, target: &Oid, kind: ResetKind) -> Result<()> {
    if kind > ResetKind::Soft && repo.is_bare() {
        return Err(Error::BareRepo);
    }
    let _lock = repo.lock()?;

    let (commit_oid, commit) = peel_to_commit(repo, target)?;
    tracing::debug!(rev = %target, commit = %commit_oid, ?kind, "reset");

    if kind >= ResetKind::Mixed {
        let tree = read_tree(repo, &commit.tree)?;
        let mut index = Index::load(repo)?;
        let tracked: Vec<String> = index.iter().map(|(p, _)| p.to_string()).collect();
        index.read_tree(repo, &tree)?;

        if kind == ResetKind::Hard {
            let removed: Vec<String> = tracked
                .into_iter()
                .filter(|p| !index.contains(p))
                .collect();
            checkout_index(repo, &mut index, &removed)?;
        }
        index.save(repo)?;
    }

    update_head(repo, &commit_oid)
}

/// reset only the index entries selected by `pathspecs`
///
/// with a target each selected entry takes the target tree's version, or is
/// dropped when the tree lacks it. without one, selected entries are
/// unstaged. HEAD and the working tree stay as they are.
pub fn reset_default<S: AsRef<str>>(
    repo: &Repo,
    target: Option<&Oid>,
    pathspecs: &[S],
) -> Result<()> {
    repo.require_workdir()?;
    let pathspec = Pathspec::new(pathspecs, false, repo.ignore_case())?;
    let _lock = repo.lock()?;

    let tree = match target {
        Some(oid) => {
            let (_, commit) = peel_to_commit(repo, oid)?;
            Some(read_tree(repo, &commit.tree)?)
        }
        None => None,
    };

    let mut index = Index::load(repo)?;
    let selected: Vec<String> = index
        .iter()
        .map(|(p, _)| p)
        .filter(|p| pathspec.matches(p))
        .map(|p| p.to_string())
        .collect();

    let mut changed = 0;
    for path in &selected {
        match tree.as_ref().map(|t| target_entry(repo, t, path)).transpose()?.flatten() {
            Some(entry) => {
                let current = index.get(path);
                if current.map(|c| (c.oid, c.mode)) != Some((entry.oid, entry.mode)) {
                    index.insert(path, entry);
                    changed += 1;
                }
            }
            None => {
                index.remove(path);
                changed += 1;
            }
        }
    }

    if let Some(tree) = &tree {
        let mut missing = Vec::new();
        tree.walk(repo, WalkMode::PreOrder, |root, entry| {
            if entry.is_tree() {
                let dir = format!("{}{}", root, entry.name);
                if !pathspec.may_match_within(&dir) {
                    return TreeWalkResult::Skip;
                }
                return TreeWalkResult::Continue;
            }
            let path = format!("{}{}", root, entry.name);
            if pathspec.matches(&path) && !index.contains(&path) {
                missing.push((path, IndexEntry::new(entry.oid, entry.mode)));
            }
            TreeWalkResult::Continue
        })?;
        changed += missing.len();
        for (path, entry) in missing {
            index.insert(&path, entry);
        }
    }

    tracing::debug!(changed, "reset index entries");
    index.save(repo)
}

/// the target tree's blob entry at `path`, `None` when there is none
fn target_entry(repo: &Repo, tree: &Tree, path: &str) -> Result<Option<IndexEntry>> {
    match tree.entry_by_path(repo, path) {
        Ok(entry) if !entry.is_tree() => Ok(Some(IndexEntry::new(entry.oid, entry.mode))),
        Ok(_) => Ok(None),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
