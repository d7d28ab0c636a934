//! reachability: which objects a set of tips drags along

use std::collections::HashSet;

use crate::error::Result;
use crate::object::loose::{object_exists, read_object};
use crate::object::tree::read_tree;
use crate::oid::{ObjectKind, Oid};
use crate::repo::Repo;
use crate::types::{Commit, FileMode, Tag};

/// every object reachable from `tips` that is not reachable from `exclude`
///
/// excluded tips that are missing locally are ignored, so a remote's
/// advertised refs can be passed directly. gitlink entries are never
/// followed. objects come back in discovery order (commits before the
/// trees and blobs they reference).
pub fn collect_reachable(repo: &Repo, tips: &[Oid], exclude: &[Oid]) -> Result<Vec<Oid>> {
    let mut seen = HashSet::new();
    let mut sink = Vec::new();
    for tip in exclude {
        if object_exists(repo, tip) {
            collect_object(repo, *tip, &mut seen, &mut sink)?;
        }
    }

    let mut out = Vec::new();
    for tip in tips {
        collect_object(repo, *tip, &mut seen, &mut out)?;
    }

    tracing::debug!(tips = tips.len(), objects = out.len(), "collected reachable objects");
    Ok(out)
}

fn collect_object(
    repo: &Repo,
    oid: Oid,
    seen: &mut HashSet<Oid>,
    out: &mut Vec<Oid>,
) -> Result<()> {
    let mut pending = vec![oid];

    while let Some(oid) = pending.pop() {
        if seen.contains(&oid) {
            continue;
        }

        let (kind, data) = read_object(repo, &oid)?;
        if kind == ObjectKind::Tree {
            collect_tree(repo, oid, seen, out)?;
            continue;
        }

        seen.insert(oid);
        out.push(oid);
        match kind {
            ObjectKind::Commit => {
                let commit = Commit::parse(oid, &data)?;
                pending.extend(commit.parents.iter().rev());
                collect_tree(repo, commit.tree, seen, out)?;
            }
            ObjectKind::Tag => pending.push(Tag::parse(oid, &data)?.target),
            ObjectKind::Tree | ObjectKind::Blob => {}
        }
    }
    Ok(())
}

fn collect_tree(
    repo: &Repo,
    tree_oid: Oid,
    seen: &mut HashSet<Oid>,
    out: &mut Vec<Oid>,
) -> Result<()> {
    if !seen.insert(tree_oid) {
        return Ok(());
    }
    out.push(tree_oid);

    let tree = read_tree(repo, &tree_oid)?;
    for entry in tree.iter() {
        match entry.mode {
            FileMode::Tree => collect_tree(repo, entry.oid, seen, out)?,
            FileMode::Commit => {}
            _ => {
                if seen.insert(entry.oid) {
                    out.push(entry.oid);
                }
            }
        }
    }
    Ok(())
}

/// commits reachable from `tips`, newest first, at most `limit` of them
///
/// missing parents end the walk quietly (shallow or partial histories).
pub fn ancestry(repo: &Repo, tips: &[Oid], limit: usize) -> Result<Vec<Oid>> {
    let mut seen = HashSet::new();
    let mut queue: std::collections::VecDeque<Oid> = tips.iter().copied().collect();
    let mut out = Vec::new();

    while let Some(oid) = queue.pop_front() {
        if out.len() >= limit {
            break;
        }
        if !seen.insert(oid) || !object_exists(repo, &oid) {
            continue;
        }
        let (kind, data) = read_object(repo, &oid)?;
        if kind != ObjectKind::Commit {
            continue;
        }
        out.push(oid);
        queue.extend(Commit::parse(oid, &data)?.parents);
    }
    Ok(out)
}

/// is `ancestor` reachable from `descendant` through parent links
pub fn is_ancestor(repo: &Repo, ancestor: &Oid, descendant: &Oid) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    Ok(ancestry(repo, &[*descendant], usize::MAX)?.contains(ancestor))
}
