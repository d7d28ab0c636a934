use crate::error::{Error, Result};
use crate::object::loose::{read_object, read_object_of_kind, write_object};
use crate::oid::{ObjectKind, Oid};
use crate::repo::Repo;
use crate::types::{Commit, Tag};

/// annotated tags nested deeper than this are treated as a cycle
const MAX_PEEL_DEPTH: usize = 64;

/// write a commit to the object store
pub fn write_commit(repo: &Repo, commit: &Commit) -> Result<Oid> {
    write_object(repo, ObjectKind::Commit, &commit.serialize())
}

/// read a commit from the object store
pub fn read_commit(repo: &Repo, oid: &Oid) -> Result<Commit> {
    let data = read_object_of_kind(repo, oid, ObjectKind::Commit)?;
    Commit::parse(*oid, &data)
}

/// write an annotated tag to the object store
pub fn write_tag(repo: &Repo, tag: &Tag) -> Result<Oid> {
    write_object(repo, ObjectKind::Tag, &tag.serialize())
}

/// read an annotated tag from the object store
pub fn read_tag(repo: &Repo, oid: &Oid) -> Result<Tag> {
    let data = read_object_of_kind(repo, oid, ObjectKind::Tag)?;
    Tag::parse(*oid, &data)
}

/// follow annotated tags until a commit is reached
///
/// returns the id of the commit and the commit itself. a chain ending in a
/// tree or blob is `PeelFailed` for the id that was asked for.
pub fn peel_to_commit(repo: &Repo, oid: &Oid) -> Result<(Oid, Commit)> {
    let mut current = *oid;
    for _ in 0..MAX_PEEL_DEPTH {
        let (kind, data) = read_object(repo, &current)?;
        match kind {
            ObjectKind::Commit => return Ok((current, Commit::parse(current, &data)?)),
            ObjectKind::Tag => {
                let tag = Tag::parse(current, &data)?;
                tracing::trace!(tag = %current, peeled = %tag.target, "peeling tag");
                current = tag.target;
            }
            ObjectKind::Tree | ObjectKind::Blob => return Err(Error::PeelFailed(*oid)),
        }
    }
    Err(Error::PeelFailed(*oid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::write_tree;
    use crate::types::Signature;
    use tempfile::tempdir;

    fn sig() -> Signature {
        Signature::with_time("Test", "test@example.com", 1_700_000_000, 0)
    }

    fn tag_of(target: Oid, target_kind: ObjectKind, name: &str) -> Tag {
        Tag {
            target,
            target_kind,
            name: name.to_string(),
            tagger: Some(sig()),
            message: "tag\n".to_string(),
        }
    }

    #[test]
    fn test_write_read_commit() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        let tree = write_tree(&repo, &[]).unwrap();
        let commit = Commit::new(tree, vec![], sig(), "initial\n");

        let oid = write_commit(&repo, &commit).unwrap();
        assert_eq!(read_commit(&repo, &oid).unwrap(), commit);
        assert!(matches!(
            read_commit(&repo, &tree),
            Err(Error::InvalidObjectType { .. })
        ));
    }

    #[test]
    fn test_peel_through_nested_tags() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        let tree = write_tree(&repo, &[]).unwrap();
        let commit = write_commit(&repo, &Commit::new(tree, vec![], sig(), "c\n")).unwrap();

        let inner = write_tag(&repo, &tag_of(commit, ObjectKind::Commit, "v1")).unwrap();
        let outer = write_tag(&repo, &tag_of(inner, ObjectKind::Tag, "v1-signed")).unwrap();

        let (peeled, _) = peel_to_commit(&repo, &outer).unwrap();
        assert_eq!(peeled, commit);
        assert_eq!(read_tag(&repo, &inner).unwrap().name, "v1");
    }

    #[test]
    fn test_peel_tag_of_tree_fails() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        let tree = write_tree(&repo, &[]).unwrap();
        let tag = write_tag(&repo, &tag_of(tree, ObjectKind::Tree, "t")).unwrap();

        assert!(matches!(
            peel_to_commit(&repo, &tag),
            Err(Error::PeelFailed(id)) if id == tag
        ));
        assert!(matches!(
            peel_to_commit(&repo, &tree),
            Err(Error::PeelFailed(_))
        ));
    }
}
