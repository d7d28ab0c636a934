use crate::error::Result;
use crate::index::Index;
use crate::object::{peel_to_commit, write_commit, write_tree_from_index};
use crate::oid::Oid;
use crate::refs::{head_oid, update_head};
use crate::repo::Repo;
use crate::types::{Commit, Signature};

/// record the index as a new commit on top of HEAD and advance HEAD
///
/// an unborn branch gets a root commit. author and committer are both
/// `signature`.
pub fn commit(repo: &Repo, index: &Index, signature: &Signature, message: &str) -> Result<Oid> {
    let tree = write_tree_from_index(repo, index)?;

    let parents = match head_oid(repo)? {
        Some(head) => vec![peel_to_commit(repo, &head)?.0],
        None => Vec::new(),
    };

    let commit = Commit::new(tree, parents, signature.clone(), message);
    let oid = write_commit(repo, &commit)?;
    update_head(repo, &oid)?;

    tracing::debug!(commit = %oid, tree = %tree, "committed index");
    Ok(oid)
}
