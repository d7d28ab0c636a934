use std::path::Path;

use crate::error::Result;
use crate::fs::{read_blob_content, FileMetadata};
use crate::object::loose::{object_exists, read_object_of_kind, write_object};
use crate::oid::{ObjectKind, Oid};
use crate::repo::Repo;

/// write a blob to the object store
pub fn write_blob(repo: &Repo, content: &[u8]) -> Result<Oid> {
    write_object(repo, ObjectKind::Blob, content)
}

/// store the content of a working tree entry (file bytes or link target)
pub fn write_blob_from_path(repo: &Repo, path: &Path, meta: &FileMetadata) -> Result<Oid> {
    let content = read_blob_content(path, meta)?;
    write_blob(repo, &content)
}

/// read a blob's content
pub fn read_blob(repo: &Repo, oid: &Oid) -> Result<Vec<u8>> {
    read_object_of_kind(repo, oid, ObjectKind::Blob)
}

/// check if a blob exists in the object store
pub fn blob_exists(repo: &Repo, oid: &Oid) -> bool {
    object_exists(repo, oid)
}
